//! Choosing which tool to call for a question.

use mcp::Tool;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A tool name and the arguments to call it with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCallRequest {
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    pub fn arguments_value(&self) -> Value {
        Value::Object(self.arguments.clone())
    }
}

/// Strategy for turning a question into a tool call.
///
/// Returning `None` means none of the discovered tools fits.
pub trait ToolSelector: Send + Sync {
    fn decide(&self, question: &str, tools: &[Tool]) -> Option<ToolCallRequest>;
}

/// Always proposes the same call, provided the host offers that tool.
#[derive(Debug, Clone)]
pub struct StaticSelector {
    request: ToolCallRequest,
}

impl StaticSelector {
    pub fn new(request: ToolCallRequest) -> Self {
        Self { request }
    }
}

impl ToolSelector for StaticSelector {
    fn decide(&self, _question: &str, tools: &[Tool]) -> Option<ToolCallRequest> {
        tools
            .iter()
            .any(|tool| tool.name == self.request.name)
            .then(|| self.request.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str) -> Tool {
        Tool {
            name: name.into(),
            description: None,
            input_schema: json!({ "type": "object" }),
        }
    }

    fn forecast_request() -> ToolCallRequest {
        let Value::Object(arguments) = json!({ "location": "Hangzhou" }) else {
            unreachable!()
        };
        ToolCallRequest::new("get_daily_forecast", arguments)
    }

    #[test]
    fn picks_discovered_tool() {
        let selector = StaticSelector::new(forecast_request());
        let tools = [tool("get_daily_forecast"), tool("get_weather_warning")];
        assert_eq!(selector.decide("weather?", &tools), Some(forecast_request()));
    }

    #[test]
    fn declines_when_tool_missing() {
        let selector = StaticSelector::new(forecast_request());
        assert_eq!(selector.decide("weather?", &[tool("get_weather_warning")]), None);
        assert_eq!(selector.decide("weather?", &[]), None);
    }

    #[test]
    fn name_match_is_exact() {
        let selector = StaticSelector::new(forecast_request());
        assert_eq!(selector.decide("weather?", &[tool("Get_Daily_Forecast")]), None);
    }

    #[test]
    fn request_from_toml_like_table() {
        let request: ToolCallRequest =
            serde_json::from_value(json!({ "name": "get_daily_forecast" })).unwrap();
        assert!(request.arguments.is_empty());
        assert_eq!(request.arguments_value(), json!({}));
    }
}
