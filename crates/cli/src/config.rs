//! Configuration: credentials from the environment, everything else from
//! an optional `weather-agent.toml`.

use runtime::ToolCallRequest;
use serde::Deserialize;
use std::path::Path;

pub const CONFIG_FILE: &str = "weather-agent.toml";
pub const API_KEY_VAR: &str = "QWEN_API_KEY";
pub const BASE_URL_VAR: &str = "QWEN_BASE_URL";

pub const DEFAULT_MODEL: &str = "qwen-max";
pub const DEFAULT_QUESTION: &str =
    "What's the weather like in Hangzhou today? If it's sunny, give me some advice on what to wear.";
pub const DEFAULT_TOOL: &str = "get_daily_forecast";
pub const DEFAULT_LOCATION: &str = "Hangzhou";

/// Contents of `weather-agent.toml`. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Model name sent to the chat-completions endpoint.
    pub model: Option<String>,

    /// Question asked when none is given on the command line.
    pub question: Option<String>,

    pub server: ServerSection,

    /// Tool call to make instead of the default forecast for Hangzhou.
    pub tool: Option<ToolCallRequest>,
}

/// How to reach the tool host.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    /// Host executable, launched with its stdin/stdout as the channel.
    pub command: Option<String>,
    pub args: Vec<String>,

    /// Address of an already running host. Takes precedence over `command`.
    pub connect: Option<String>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

/// Chat-completions endpoint and key. Only ever read from the environment.
pub struct Credentials {
    pub api_key: String,
    pub base_url: String,
}

impl Credentials {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |name: &'static str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or(ConfigError::MissingEnv(name))
        };
        Ok(Self {
            api_key: required(API_KEY_VAR)?,
            base_url: required(BASE_URL_VAR)?,
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn empty_config_is_valid() {
        let config = Config::parse("").unwrap();
        assert!(config.model.is_none());
        assert!(config.server.command.is_none());
        assert!(config.tool.is_none());
    }

    #[test]
    fn full_config() {
        let config = Config::parse(
            r#"
            model = "qwen-plus"
            question = "Any storms in Lisbon?"

            [server]
            command = "/usr/local/bin/weather-server"
            args = ["--source", "open-meteo"]

            [tool]
            name = "get_weather_warning"
            arguments = { location = "Lisbon" }
            "#,
        )
        .unwrap();

        assert_eq!(config.model.as_deref(), Some("qwen-plus"));
        assert_eq!(config.server.args, vec!["--source", "open-meteo"]);
        let tool = config.tool.unwrap();
        assert_eq!(tool.name, "get_weather_warning");
        assert_eq!(tool.arguments["location"], "Lisbon");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = Config::parse("modle = \"qwen-max\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn credentials_need_both_variables() {
        let creds = Credentials::from_lookup(env(&[
            (API_KEY_VAR, "sk-test"),
            (BASE_URL_VAR, "https://dashscope.aliyuncs.com/compatible-mode/v1"),
        ]))
        .unwrap();
        assert_eq!(creds.api_key, "sk-test");

        let err = Credentials::from_lookup(env(&[(API_KEY_VAR, "sk-test")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv(BASE_URL_VAR)));
    }

    #[test]
    fn blank_credentials_count_as_missing() {
        let err = Credentials::from_lookup(env(&[(API_KEY_VAR, "  "), (BASE_URL_VAR, "http://x")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv(API_KEY_VAR)));
    }

    #[test]
    fn debug_hides_api_key() {
        let creds = Credentials {
            api_key: "sk-secret".into(),
            base_url: "http://x".into(),
        };
        assert!(!format!("{creds:?}").contains("sk-secret"));
    }
}
