//! Tool registry: named tools, their parameter schemas, and handlers.
//!
//! Populated once at host startup and shared read-only across sessions.
//! Arguments are validated against the declared schema before a handler
//! ever runs, and handler failures (including panics) come back as
//! [`Error::ToolExecution`] instead of taking the session down.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::{Map, Value, json};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::protocol::{CallToolResult, Tool, ToolContent};

/// Validated, default-filled arguments handed to a handler.
pub type Arguments = Map<String, Value>;

/// Future returned by a tool handler.
pub type HandlerFuture = BoxFuture<'static, std::result::Result<Vec<ToolContent>, HandlerError>>;

/// Failure reported by a tool handler.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Something that can execute a tool call.
///
/// Implemented for any `Fn(Arguments) -> impl Future` closure, so most
/// handlers are registered as `|args| async move { ... }`.
pub trait ToolHandler: Send + Sync + 'static {
    fn call(&self, arguments: Arguments) -> HandlerFuture;
}

impl<F, Fut> ToolHandler for F
where
    F: Fn(Arguments) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Vec<ToolContent>, HandlerError>> + Send + 'static,
{
    fn call(&self, arguments: Arguments) -> HandlerFuture {
        (self)(arguments).boxed()
    }
}

/// JSON type a parameter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
}

impl ParamType {
    fn schema_name(self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
        }
    }

    /// Convert `value` to this type if it is compatible.
    fn coerce(self, value: &Value) -> Option<Value> {
        match (self, value) {
            (ParamType::String, Value::String(_)) => Some(value.clone()),
            (ParamType::Integer, Value::Number(n)) => {
                if n.is_i64() || n.is_u64() {
                    Some(value.clone())
                } else {
                    n.as_f64()
                        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                        .map(|f| json!(f as i64))
                }
            }
            (ParamType::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
            (ParamType::Number, Value::Number(_)) => Some(value.clone()),
            (ParamType::Number, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),
            (ParamType::Boolean, Value::Bool(_)) => Some(value.clone()),
            (ParamType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Schema for a single parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    types: Vec<ParamType>,
    required: bool,
    default: Option<Value>,
    description: Option<String>,
}

impl ParamSpec {
    /// A parameter that must be supplied.
    pub fn required(ty: ParamType) -> Self {
        Self {
            types: vec![ty],
            required: true,
            default: None,
            description: None,
        }
    }

    /// A parameter that may be omitted.
    pub fn optional(ty: ParamType) -> Self {
        Self {
            required: false,
            ..Self::required(ty)
        }
    }

    /// Accept `ty` as an alternative type. Alternatives are tried in order.
    pub fn or(mut self, ty: ParamType) -> Self {
        if !self.types.contains(&ty) {
            self.types.push(ty);
        }
        self
    }

    /// Value used when the argument is omitted. Makes the parameter optional.
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.required = false;
        self.default = Some(default.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    fn coerce(&self, value: &Value) -> Option<Value> {
        self.types.iter().find_map(|ty| ty.coerce(value))
    }

    fn type_label(&self) -> String {
        self.types
            .iter()
            .map(|t| t.schema_name())
            .collect::<Vec<_>>()
            .join(" or ")
    }

    fn schema(&self) -> Value {
        let mut schema = Map::new();
        match self.types.as_slice() {
            [single] => {
                schema.insert("type".into(), json!(single.schema_name()));
            }
            many => {
                let any_of: Vec<Value> = many
                    .iter()
                    .map(|t| json!({ "type": t.schema_name() }))
                    .collect();
                schema.insert("anyOf".into(), Value::Array(any_of));
            }
        }
        if let Some(default) = &self.default {
            schema.insert("default".into(), default.clone());
        }
        if let Some(description) = &self.description {
            schema.insert("description".into(), json!(description));
        }
        Value::Object(schema)
    }
}

/// Name, description and parameter schema of a tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    name: String,
    description: String,
    parameters: Vec<(String, ParamSpec)>,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    /// Add a parameter. Arguments are validated in declaration order.
    pub fn param(mut self, name: impl Into<String>, spec: ParamSpec) -> Self {
        let name = name.into();
        self.parameters.retain(|(existing, _)| *existing != name);
        self.parameters.push((name, spec));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameter(&self, name: &str) -> Option<&ParamSpec> {
        self.parameters
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, spec)| spec)
    }

    /// Wire representation with a JSON Schema for the parameters.
    pub fn to_tool(&self) -> Tool {
        let properties: Map<String, Value> = self
            .parameters
            .iter()
            .map(|(name, spec)| (name.clone(), spec.schema()))
            .collect();
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|(_, spec)| spec.is_required())
            .map(|(name, _)| name.as_str())
            .collect();

        Tool {
            name: self.name.clone(),
            description: Some(self.description.clone()),
            input_schema: json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }

    /// Check `arguments` against the schema and fill in defaults.
    pub fn validate(&self, arguments: Option<Value>) -> Result<Arguments> {
        let mut provided = match arguments {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(self.invalid(
                    "arguments",
                    format!("must be an object, got {}", json_type(&other)),
                ));
            }
        };

        let mut validated = Map::new();
        for (name, spec) in &self.parameters {
            match provided.remove(name) {
                None | Some(Value::Null) => {
                    if spec.is_required() {
                        return Err(self.invalid(name, "is required"));
                    }
                    if let Some(default) = spec.default_value() {
                        validated.insert(name.clone(), default.clone());
                    }
                }
                Some(value) => {
                    let coerced = spec.coerce(&value).ok_or_else(|| {
                        self.invalid(
                            name,
                            format!("expected {}, got {}", spec.type_label(), json_type(&value)),
                        )
                    })?;
                    validated.insert(name.clone(), coerced);
                }
            }
        }
        Ok(validated)
    }

    fn invalid(&self, parameter: &str, reason: impl Into<String>) -> Error {
        Error::InvalidArguments {
            tool: self.name.clone(),
            parameter: parameter.to_string(),
            reason: reason.into(),
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    handler: Arc<dyn ToolHandler>,
}

/// Registered tools in registration order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Names are unique and case-sensitive.
    pub fn register(&mut self, descriptor: ToolDescriptor, handler: impl ToolHandler) -> Result<()> {
        if self.index.contains_key(descriptor.name()) {
            return Err(Error::DuplicateTool(descriptor.name().to_string()));
        }
        self.index
            .insert(descriptor.name().to_string(), self.tools.len());
        self.tools.push(RegisteredTool {
            descriptor,
            handler: Arc::new(handler),
        });
        Ok(())
    }

    /// Descriptors in registration order.
    pub fn list(&self) -> Vec<&ToolDescriptor> {
        self.tools.iter().map(|t| &t.descriptor).collect()
    }

    /// Wire-format snapshot for `tools/list`.
    pub fn tools(&self) -> Vec<Tool> {
        self.tools.iter().map(|t| t.descriptor.to_tool()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&i| &self.tools[i].descriptor)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validate arguments and run the tool's handler.
    pub async fn invoke(&self, name: &str, arguments: Option<Value>) -> Result<CallToolResult> {
        let tool = self
            .index
            .get(name)
            .map(|&i| &self.tools[i])
            .ok_or_else(|| Error::UnknownTool(name.to_string()))?;

        let arguments = tool.descriptor.validate(arguments)?;
        let handler = Arc::clone(&tool.handler);

        // Own task, so a panicking handler only fails this call. Dropping
        // the call aborts the task.
        let mut task = HandlerTask(tokio::spawn(async move { handler.call(arguments).await }));
        let outcome = (&mut task.0).await;

        match outcome {
            Ok(Ok(content)) => Ok(CallToolResult::new(content)),
            Ok(Err(e)) => Err(Error::ToolExecution {
                tool: name.to_string(),
                message: e.to_string(),
            }),
            Err(join_error) => {
                let message = if join_error.is_panic() {
                    let payload = join_error.into_panic();
                    payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .map(|s| format!("handler panicked: {s}"))
                        .unwrap_or_else(|| "handler panicked".to_string())
                } else {
                    "handler cancelled".to_string()
                };
                Err(Error::ToolExecution {
                    tool: name.to_string(),
                    message,
                })
            }
        }
    }
}

/// Running handler, aborted when dropped.
struct HandlerTask(JoinHandle<std::result::Result<Vec<ToolContent>, HandlerError>>);

impl Drop for HandlerTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.tools.iter().map(|t| t.descriptor.name()))
            .finish()
    }
}
