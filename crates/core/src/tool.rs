//! Tool trait and registries: the abstraction over side-effecting capabilities.
//!
//! Tools are what give the language model the ability to act in the world:
//! look up the time, fetch a URL, wait for something to happen. A
//! [`ToolRegistry`] exposes a catalog of tools and executes one by name with
//! arguments validated against the tool's declared parameters.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// A model-issued request to execute a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the LLM's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

/// The primitive type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    String,
    Integer,
    Number,
    Boolean,
}

impl ParameterKind {
    /// JSON Schema type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
        }
    }
}

/// A declared argument of a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub description: String,
    pub kind: ParameterKind,
    #[serde(default)]
    pub required: bool,
}

impl Parameter {
    pub fn required(
        name: impl Into<String>,
        kind: ParameterKind,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind,
            required: true,
        }
    }

    pub fn optional(
        name: impl Into<String>,
        kind: ParameterKind,
        description: impl Into<String>,
    ) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }
}

/// A validated argument value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Boolean(bool),
    Integer(i64),
    Number(f64),
    String(String),
}

impl ParameterValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Integers widen to floating point.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Coerce a raw JSON value into `kind`.
    ///
    /// Models frequently send numbers and booleans as strings, so those are
    /// parsed rather than rejected.
    fn coerce(kind: ParameterKind, raw: &serde_json::Value) -> Option<Self> {
        use serde_json::Value;

        match (kind, raw) {
            (ParameterKind::String, Value::String(s)) => Some(Self::String(s.clone())),
            (ParameterKind::String, Value::Number(n)) => Some(Self::String(n.to_string())),
            (ParameterKind::String, Value::Bool(b)) => Some(Self::String(b.to_string())),
            (ParameterKind::Integer, Value::Number(n)) => n
                .as_i64()
                .or_else(|| {
                    // `i64::MAX as f64` rounds up to 2^63, so the upper bound is exclusive.
                    n.as_f64()
                        .filter(|f| f.fract() == 0.0 && (i64::MIN as f64..i64::MAX as f64).contains(f))
                        .map(|f| f as i64)
                })
                .map(Self::Integer),
            (ParameterKind::Integer, Value::String(s)) => s.trim().parse().ok().map(Self::Integer),
            (ParameterKind::Number, Value::Number(n)) => n.as_f64().map(Self::Number),
            (ParameterKind::Number, Value::String(s)) => s.trim().parse().ok().map(Self::Number),
            (ParameterKind::Boolean, Value::Bool(b)) => Some(Self::Boolean(*b)),
            (ParameterKind::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(Self::Boolean(true)),
                "false" => Some(Self::Boolean(false)),
                _ => None,
            },
            _ => None,
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// Arguments for one invocation, keyed by declared parameter name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolArguments(BTreeMap<String, ParameterValue>);

impl ToolArguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ParameterValue) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.0.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ParameterValue::as_str)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(ParameterValue::as_i64)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(ParameterValue::as_f64)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(ParameterValue::as_bool)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Validate raw model-supplied arguments against a parameter list.
    ///
    /// Accepts a JSON object, a JSON-encoded object string, or null.
    /// Undeclared keys are dropped; missing required parameters and values
    /// that cannot be coerced to the declared kind are rejected.
    pub fn parse(parameters: &[Parameter], raw: &serde_json::Value) -> Result<Self, ToolError> {
        use serde_json::Value;

        let decoded = match raw {
            Value::String(s) if s.trim().is_empty() => Value::Null,
            Value::String(s) => serde_json::from_str::<Value>(s).map_err(|e| {
                ToolError::InvalidArguments(format!("arguments are not valid JSON: {e}"))
            })?,
            other => other.clone(),
        };

        let empty = serde_json::Map::new();
        let object = match &decoded {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(ToolError::InvalidArguments(format!(
                    "expected an object, got {other}"
                )));
            }
        };

        let mut args = Self::new();
        for param in parameters {
            match object.get(&param.name) {
                None | Some(Value::Null) => {
                    if param.required {
                        return Err(ToolError::InvalidArguments(format!(
                            "missing required parameter '{}'",
                            param.name
                        )));
                    }
                }
                Some(value) => {
                    let coerced = ParameterValue::coerce(param.kind, value).ok_or_else(|| {
                        ToolError::InvalidArguments(format!(
                            "parameter '{}' expects {}, got {value}",
                            param.name,
                            param.kind.as_str()
                        ))
                    })?;
                    args.insert(param.name.clone(), coerced);
                }
            }
        }

        for key in object.keys() {
            if !parameters.iter().any(|p| &p.name == key) {
                debug!(parameter = %key, "Ignoring undeclared tool argument");
            }
        }

        Ok(args)
    }
}

/// The core Tool trait.
///
/// Each tool declares its parameters and an async executable. Tools are
/// offered to the model through a [`ToolRegistry`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "get_current_time").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// Declared parameters, in order.
    fn parameters(&self) -> Vec<Parameter> {
        Vec::new()
    }

    /// Execute the tool with validated arguments.
    async fn invoke(
        &self,
        arguments: ToolArguments,
        cancel: CancellationToken,
    ) -> std::result::Result<String, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        let parameters = self.parameters();
        let properties: serde_json::Map<String, serde_json::Value> = parameters
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    serde_json::json!({
                        "type": p.kind.as_str(),
                        "description": p.description,
                    }),
                )
            })
            .collect();
        let required: Vec<&str> = parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }
}

type ToolFn = dyn Fn(ToolArguments, CancellationToken) -> BoxFuture<'static, Result<String, ToolError>>
    + Send
    + Sync;

/// A tool backed by an async closure.
pub struct FnTool {
    name: String,
    description: String,
    parameters: Vec<Parameter>,
    function: Arc<ToolFn>,
}

impl FnTool {
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, function: F) -> Self
    where
        F: Fn(ToolArguments, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, ToolError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            function: Arc::new(move |args, cancel| Box::pin(function(args, cancel))),
        }
    }

    /// Declare another parameter.
    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Vec<Parameter> {
        self.parameters.clone()
    }

    async fn invoke(
        &self,
        arguments: ToolArguments,
        cancel: CancellationToken,
    ) -> Result<String, ToolError> {
        (self.function)(arguments, cancel).await
    }
}

/// A source of tools.
///
/// The tool-call loop uses this to:
/// 1. Get the catalog to offer to the LLM
/// 2. Execute a tool when the LLM requests it
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// The catalog of invocable tools.
    async fn list_tools(
        &self,
        cancel: &CancellationToken,
    ) -> std::result::Result<Vec<Arc<dyn Tool>>, ToolError>;

    /// Validate the call's arguments against `tool` and execute it.
    ///
    /// Errors from the tool itself propagate unchanged.
    async fn invoke(
        &self,
        tool: &dyn Tool,
        call: &ToolCall,
        cancel: CancellationToken,
    ) -> std::result::Result<String, ToolError> {
        let arguments = ToolArguments::parse(&tool.parameters(), &call.arguments)?;
        debug!(tool = %call.name, call_id = %call.id, args = arguments.len(), "Invoking tool");
        tool.invoke(arguments, cancel).await
    }
}

/// A fixed, ordered catalog of tools.
pub struct StaticToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl StaticToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    /// Register an already shared tool. Replaces any existing tool with the same name.
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        match self.tools.iter().position(|t| t.name() == tool.name()) {
            Some(i) => self.tools[i] = tool,
            None => self.tools.push(tool),
        }
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Get all tool definitions (for sending to the LLM).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.to_definition()).collect()
    }

    /// List all registered tool names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for StaticToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolRegistry for StaticToolRegistry {
    async fn list_tools(
        &self,
        _cancel: &CancellationToken,
    ) -> std::result::Result<Vec<Arc<dyn Tool>>, ToolError> {
        Ok(self.tools.clone())
    }
}

/// Consolidates several tool sources into one catalog.
///
/// When two sources expose the same name the earlier source wins.
#[derive(Default)]
pub struct CompositeToolRegistry {
    sources: Vec<Arc<dyn ToolRegistry>>,
}

impl CompositeToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: Arc<dyn ToolRegistry>) -> Self {
        self.sources.push(source);
        self
    }
}

#[async_trait]
impl ToolRegistry for CompositeToolRegistry {
    async fn list_tools(
        &self,
        cancel: &CancellationToken,
    ) -> std::result::Result<Vec<Arc<dyn Tool>>, ToolError> {
        let mut seen = HashSet::new();
        let mut catalog = Vec::new();
        for source in &self.sources {
            for tool in source.list_tools(cancel).await? {
                if seen.insert(tool.name().to_string()) {
                    catalog.push(tool);
                } else {
                    warn!(tool = %tool.name(), "Duplicate tool name in composite catalog, keeping first");
                }
            }
        }
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters(&self) -> Vec<Parameter> {
            vec![
                Parameter::required("text", ParameterKind::String, "Text to echo"),
                Parameter::optional("times", ParameterKind::Integer, "Repeat count"),
            ]
        }
        async fn invoke(
            &self,
            arguments: ToolArguments,
            _cancel: CancellationToken,
        ) -> Result<String, ToolError> {
            let text = arguments.get_str("text").unwrap_or_default();
            let times = arguments.get_i64("times").unwrap_or(1).max(1) as usize;
            Ok(text.repeat(times))
        }
    }

    fn call(name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "call_1".into(),
            name: name.into(),
            arguments,
        }
    }

    #[test]
    fn definition_lists_required_parameters() {
        let def = EchoTool.to_definition();
        assert_eq!(def.name, "echo");
        assert_eq!(def.parameters["type"], "object");
        assert_eq!(def.parameters["properties"]["times"]["type"], "integer");
        assert_eq!(def.parameters["required"], serde_json::json!(["text"]));
    }

    #[test]
    fn parse_coerces_stringly_typed_values() {
        let params = vec![
            Parameter::required("count", ParameterKind::Integer, ""),
            Parameter::required("ratio", ParameterKind::Number, ""),
            Parameter::required("flag", ParameterKind::Boolean, ""),
        ];
        let args = ToolArguments::parse(
            &params,
            &serde_json::json!({"count": "42", "ratio": 2, "flag": "TRUE"}),
        )
        .unwrap();
        assert_eq!(args.get_i64("count"), Some(42));
        assert_eq!(args.get_f64("ratio"), Some(2.0));
        assert_eq!(args.get_bool("flag"), Some(true));
    }

    #[test]
    fn parse_accepts_json_encoded_object() {
        let params = vec![Parameter::required("text", ParameterKind::String, "")];
        let args =
            ToolArguments::parse(&params, &serde_json::json!("{\"text\":\"hi\"}")).unwrap();
        assert_eq!(args.get_str("text"), Some("hi"));
    }

    #[test]
    fn parse_rejects_missing_required() {
        let params = vec![Parameter::required("text", ParameterKind::String, "")];
        let err = ToolArguments::parse(&params, &serde_json::json!({})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(msg) if msg.contains("text")));
    }

    #[test]
    fn parse_rejects_type_mismatch() {
        let params = vec![Parameter::required("count", ParameterKind::Integer, "")];
        let err = ToolArguments::parse(&params, &serde_json::json!({"count": "many"})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));

        for out_of_range in [serde_json::json!(1e300), serde_json::json!(-1e300), serde_json::json!(9.3e18)] {
            let err = ToolArguments::parse(&params, &serde_json::json!({"count": out_of_range}))
                .unwrap_err();
            assert!(matches!(err, ToolError::InvalidArguments(_)));
        }

        let args = ToolArguments::parse(&params, &serde_json::json!({"count": 42.0})).unwrap();
        assert_eq!(args.get_i64("count"), Some(42));
    }

    #[test]
    fn parse_drops_undeclared_and_allows_null() {
        let params = vec![Parameter::optional("text", ParameterKind::String, "")];
        let args =
            ToolArguments::parse(&params, &serde_json::json!({"other": 1, "text": null})).unwrap();
        assert!(args.is_empty());
        assert!(ToolArguments::parse(&params, &serde_json::Value::Null).unwrap().is_empty());
    }

    #[test]
    fn registry_register_replaces_by_name() {
        let mut registry = StaticToolRegistry::new();
        registry.register(EchoTool);
        registry.register(FnTool::new("echo", "replacement", |_, _| async {
            Ok("replaced".to_string())
        }));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("echo").unwrap().description(), "replacement");
        assert!(registry.get("nonexistent").is_none());
    }

    #[tokio::test]
    async fn registry_invokes_with_validated_arguments() {
        let mut registry = StaticToolRegistry::new();
        registry.register(EchoTool);
        let cancel = CancellationToken::new();

        let tools = registry.list_tools(&cancel).await.unwrap();
        let output = registry
            .invoke(
                tools[0].as_ref(),
                &call("echo", serde_json::json!({"text": "ab", "times": "3"})),
                cancel,
            )
            .await
            .unwrap();
        assert_eq!(output, "ababab");
    }

    #[tokio::test]
    async fn tool_errors_propagate_unchanged() {
        let failing = FnTool::new("explode", "always fails", |_, _| async {
            Err(ToolError::ExecutionFailed {
                tool_name: "explode".into(),
                reason: "boom".into(),
            })
        });
        let registry = StaticToolRegistry::new();
        let err = registry
            .invoke(&failing, &call("explode", serde_json::json!({})), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { reason, .. } if reason == "boom"));
    }

    #[tokio::test]
    async fn composite_registry_keeps_first_duplicate() {
        let mut first = StaticToolRegistry::new();
        first.register(EchoTool);
        let mut second = StaticToolRegistry::new();
        second.register(FnTool::new("echo", "shadowed", |_, _| async { Ok(String::new()) }));
        second.register(FnTool::new("noop", "does nothing", |_, _| async { Ok(String::new()) }));

        let composite = CompositeToolRegistry::new()
            .with_source(Arc::new(first))
            .with_source(Arc::new(second));
        let tools = composite.list_tools(&CancellationToken::new()).await.unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name().to_string()).collect();
        assert_eq!(names, vec!["echo", "noop"]);
        assert_eq!(tools[0].description(), "Echoes back the input");
    }
}
