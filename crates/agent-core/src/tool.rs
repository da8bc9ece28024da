//! Tool System
//!
//! Tools are declared to backends through [`ToolSchema`] and invoked by the
//! generation loop through the [`ToolExecutor`] boundary. The loop never
//! sees a tool error: anything that goes wrong becomes a failure result.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{AgentError, Result};
use crate::message::{Arguments, ToolCall, ToolCallResult};

/// Parameter definition for building a tool schema
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Parameter name
    pub name: String,

    /// JSON Schema type (string, number, boolean, object, array)
    #[serde(rename = "type")]
    pub param_type: String,

    /// Human-readable description
    pub description: String,

    /// Whether this parameter is required
    #[serde(default)]
    pub required: bool,

    /// Enum of allowed values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
}

impl ParameterSchema {
    pub fn new(
        name: impl Into<String>,
        param_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
            required: false,
            enum_values: None,
        }
    }

    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn one_of(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.enum_values = Some(values.into_iter().collect());
        self
    }
}

/// Common tool declaration: name, description and a JSON parameter schema
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (shown to the model)
    pub description: String,

    /// JSON-schema object describing the arguments
    pub parameters: Value,
}

impl ToolSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Build an object schema from flat parameter definitions
    pub fn from_parameters(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: &[ParameterSchema],
    ) -> Self {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in parameters {
            let mut property = json!({
                "type": param.param_type,
                "description": param.description,
            });
            if let Some(values) = &param.enum_values {
                property["enum"] = Value::Array(values.clone());
            }
            properties.insert(param.name.clone(), property);
            if param.required {
                required.push(Value::String(param.name.clone()));
            }
        }

        Self::new(
            name,
            description,
            json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        )
    }

    /// Names listed under the schema's `required` key
    pub fn required_parameters(&self) -> impl Iterator<Item = &str> {
        self.parameters
            .get("required")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
    }
}

/// Tool execution callback consumed by the generation loop
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Schemas declared to the backend on every request
    fn schemas(&self) -> Vec<ToolSchema>;

    /// Execute one call. Errors are turned into failure results by the loop.
    async fn call_tool(&self, name: &str, arguments: &Arguments, raw_call: &ToolCall)
    -> Result<ToolCallResult>;
}

/// Tool trait - implement to add new capabilities
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool's schema for function calling
    fn schema(&self) -> ToolSchema;

    /// Execute the tool with given arguments
    async fn execute(&self, call: &ToolCall) -> Result<ToolCallResult>;

    /// Validate arguments before execution
    fn validate(&self, call: &ToolCall) -> Result<()> {
        if let Some(raw) = call.arguments.get("_raw") {
            return Err(AgentError::ToolExecution(format!(
                "Arguments are not a JSON object: {raw}"
            )));
        }

        let schema = self.schema();
        for name in schema.required_parameters() {
            if !call.arguments.contains_key(name) {
                return Err(AgentError::ToolExecution(format!(
                    "Missing required parameter: {name}"
                )));
            }
        }

        Ok(())
    }
}

/// Registry for available tools
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new tool
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.register_shared(Arc::new(tool));
    }

    /// Register a shared tool
    pub fn register_shared(&mut self, tool: Arc<dyn Tool>) {
        let schema = tool.schema();
        self.tools.insert(schema.name, tool);
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Get tool names
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.values().map(|t| t.schema()).collect()
    }

    async fn call_tool(
        &self,
        name: &str,
        _arguments: &Arguments,
        raw_call: &ToolCall,
    ) -> Result<ToolCallResult> {
        let tool = self
            .get(name)
            .ok_or_else(|| AgentError::ToolExecution(format!("Unknown tool: {name}")))?;

        tool.validate(raw_call)?;
        tool.execute(raw_call).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema::from_parameters(
                "echo",
                "Echo the input back",
                &[ParameterSchema::new("text", "string", "Text to echo").required()],
            )
        }

        async fn execute(&self, call: &ToolCall) -> Result<ToolCallResult> {
            Ok(ToolCallResult::ok(call.get_str("text").unwrap_or_default()))
        }
    }

    fn echo_call(arguments: Value) -> ToolCall {
        let Value::Object(map) = arguments else {
            panic!("arguments must be an object")
        };
        ToolCall::new("1", "echo", map)
    }

    #[test]
    fn schema_from_parameters() {
        let schema = ToolSchema::from_parameters(
            "datetime",
            "Get the current date and time",
            &[ParameterSchema::new("format", "string", "Output format")
                .one_of([json!("iso"), json!("unix")])],
        );

        assert_eq!(schema.parameters["type"], "object");
        assert_eq!(schema.parameters["properties"]["format"]["enum"], json!(["iso", "unix"]));
        assert_eq!(schema.required_parameters().count(), 0);
    }

    #[test]
    fn test_tool_registry() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.names(), vec!["echo"]);
        assert!(registry.get("unknown").is_none());
    }

    #[tokio::test]
    async fn registry_executes_valid_calls() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);

        let call = echo_call(json!({"text": "hi"}));
        let result = registry.call_tool("echo", &call.arguments, &call).await.unwrap();
        assert_eq!(result, ToolCallResult::ok("hi"));
    }

    #[tokio::test]
    async fn registry_rejects_missing_and_raw_arguments() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);

        let missing = echo_call(json!({}));
        assert!(registry.call_tool("echo", &missing.arguments, &missing).await.is_err());

        let raw = echo_call(json!({"_raw": "{oops"}));
        assert!(registry.call_tool("echo", &raw.arguments, &raw).await.is_err());

        assert!(registry.call_tool("nope", &raw.arguments, &raw).await.is_err());
    }
}
