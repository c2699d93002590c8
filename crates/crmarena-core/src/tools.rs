// Tool Abstraction
//
// Tools are defined with the `Tool` trait and collected in an ordered
// `ToolRegistry`. The registry validates required arguments, dispatches calls
// and turns every outcome into the observation string the agent sees.
//
// Design decisions:
// - Tools never hold a backend handle; the backend arrives in ToolContext
// - Expected failures (ToolError) and unexpected ones (InternalError, panics)
//   both reach the agent as "Error: {message}"; internal ones are also logged
// - Registration order is preserved so prompts and schemas are deterministic

use crate::backend::SharedBackend;
use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

// ============================================================================
// Tool Execution Result - Error Handling Contract
// ============================================================================

/// Result of a tool execution.
///
/// - `Success`: the value is rendered as the observation
/// - `ToolError`: expected failure (bad argument shape, backend rejected a
///   query); shown to the agent so it can correct itself
/// - `InternalError`: unexpected failure (transport, panic); logged at error
///   level and shown to the agent like a tool error
#[derive(Debug)]
pub enum ToolExecutionResult {
    /// Successful execution with a JSON result
    Success(Value),

    /// Expected tool-level error
    ToolError(String),

    /// Unexpected failure outside the tool's own validation
    InternalError(ToolInternalError),
}

impl ToolExecutionResult {
    /// Create a successful result
    pub fn success(value: impl Into<Value>) -> Self {
        ToolExecutionResult::Success(value.into())
    }

    /// Create a tool-level error
    pub fn tool_error(message: impl Into<String>) -> Self {
        ToolExecutionResult::ToolError(message.into())
    }

    /// Create an internal error
    pub fn internal_error(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        ToolExecutionResult::InternalError(ToolInternalError::new(error))
    }

    /// Create an internal error from a string message
    pub fn internal_error_msg(message: impl Into<String>) -> Self {
        ToolExecutionResult::InternalError(ToolInternalError::from_message(message))
    }

    /// Convert into the observation text, or the error observation.
    ///
    /// Strings are returned raw, other values as compact JSON. Errors are
    /// prefixed with `Error: `.
    pub fn into_observation(self, tool_name: &str) -> std::result::Result<String, String> {
        match self {
            ToolExecutionResult::Success(Value::String(text)) => Ok(text),
            ToolExecutionResult::Success(value) => Ok(value.to_string()),
            ToolExecutionResult::ToolError(message) => Err(format!("Error: {message}")),
            ToolExecutionResult::InternalError(err) => {
                error!(tool = %tool_name, error = %err.message, "Tool internal error");
                Err(format!("Error: {}", err.message))
            }
        }
    }
}

/// Details of an unexpected tool failure
#[derive(Debug)]
pub struct ToolInternalError {
    /// Error message for logging
    pub message: String,
    /// Optional source error
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ToolInternalError {
    pub fn new(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self {
            message: error.to_string(),
            source: Some(Box::new(error)),
        }
    }

    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }
}

impl std::fmt::Display for ToolInternalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ToolInternalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ============================================================================
// Tool Trait - Core Tool Abstraction
// ============================================================================

/// Runtime context handed to every tool call
#[derive(Clone)]
pub struct ToolContext {
    pub backend: SharedBackend,
}

impl ToolContext {
    pub fn new(backend: SharedBackend) -> Self {
        Self { backend }
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext").finish_non_exhaustive()
    }
}

/// Tool description exported to providers and prompts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the argument object
    pub parameters: Value,
}

impl ToolDefinition {
    /// Names listed in the schema's `required` array
    pub fn required_parameters(&self) -> Vec<&str> {
        self.parameters
            .get("required")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// Trait for tools the agent can call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name the model uses to invoke the tool
    fn name(&self) -> &str;

    /// Description shown to the model
    fn description(&self) -> &str;

    /// JSON schema for the tool's argument object
    fn parameters_schema(&self) -> Value;

    /// Execute the tool.
    ///
    /// Implementations validate argument shapes themselves and return a
    /// `ToolError` on mismatch rather than panicking.
    async fn execute(&self, arguments: Value, context: &ToolContext) -> ToolExecutionResult;

    /// Convert this tool to a ToolDefinition
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

// ============================================================================
// ToolRegistry - Ordered Collection of Tools
// ============================================================================

/// Failure of a dispatched call, carrying the observation text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolDispatchError {
    /// No tool with that name is registered
    #[error("Unknown action {0}")]
    UnknownTool(String),

    /// The tool ran and failed; the payload already starts with `Error:`
    #[error("{0}")]
    Failed(String),
}

/// An ordered registry of tools.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool.
    ///
    /// A tool with the same name is replaced in place, keeping its position.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        match self.index.get(&name) {
            Some(&position) => self.tools[position] = tool,
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.index.get(name).map(|&position| &self.tools[position])
    }

    pub fn has(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool names in registration order
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Definitions in registration order
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.to_definition()).collect()
    }

    /// Check that every `required` argument of a known tool is present.
    ///
    /// Unknown tools pass; dispatch reports them.
    pub fn validate_arguments(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
    ) -> std::result::Result<(), String> {
        let Some(tool) = self.get(name) else {
            return Ok(());
        };
        let definition = tool.to_definition();
        let missing: Vec<&str> = definition
            .required_parameters()
            .into_iter()
            .filter(|param| !arguments.contains_key(*param))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!(
                "missing required argument(s) for {name}: {}",
                missing.join(", ")
            ))
        }
    }

    /// Run a tool and produce its observation.
    ///
    /// Nothing escapes this call: tool errors, internal errors and panics all
    /// come back as `ToolDispatchError::Failed` with an `Error:` observation.
    pub async fn dispatch(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        context: &ToolContext,
    ) -> std::result::Result<String, ToolDispatchError> {
        let Some(tool) = self.get(name) else {
            debug!(tool = %name, "Unknown tool requested");
            return Err(ToolDispatchError::UnknownTool(name.to_string()));
        };

        let result = AssertUnwindSafe(tool.execute(Value::Object(arguments), context))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                ToolExecutionResult::internal_error_msg(format!(
                    "tool panicked: {}",
                    panic_message(payload.as_ref())
                ))
            });

        let outcome = result
            .into_observation(name)
            .map_err(ToolDispatchError::Failed);
        debug!(tool = %name, ok = outcome.is_ok(), "Tool dispatched");
        outcome
    }

    /// Render the text catalogue used when the model has no native tool calling.
    pub fn render_catalogue(&self) -> String {
        let entries: Vec<String> = self
            .tools
            .iter()
            .map(|tool| render_tool_entry(&tool.to_definition()))
            .collect();

        format!(
            "You have access to the following tools:\n{}\n\nUse the following format if using a tool:\n```\nAction: tool name (one of [{}])\nAction Input: the input to the tool, in a JSON format representing the kwargs (e.g. ```{{\"input\": \"hello world\", \"num_beams\": 5}}```)\n```\n",
            entries.join("\n\n"),
            self.tool_names().join(", ")
        )
    }

    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::new()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

fn render_tool_entry(definition: &ToolDefinition) -> String {
    let required = definition.required_parameters();
    let mut entry = format!(
        "> Tool Name: {}\nTool Description: {}\nTool Args:\n",
        definition.name, definition.description
    );
    if let Some(properties) = definition
        .parameters
        .get("properties")
        .and_then(Value::as_object)
    {
        for (param, details) in properties {
            let param_type = details.get("type").and_then(Value::as_str).unwrap_or("any");
            let required_marker = if required.contains(&param.as_str()) {
                ", required"
            } else {
                ""
            };
            let description = details
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("")
                .trim();
            entry.push_str(&format!(
                "  - {param} ({param_type}{required_marker}): {description}\n"
            ));
        }
    }
    entry.trim().to_string()
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tool_names())
            .finish()
    }
}

// ============================================================================
// ToolRegistryBuilder - Fluent API for Building Registry
// ============================================================================

/// Builder for creating a ToolRegistry with a fluent API.
pub struct ToolRegistryBuilder {
    registry: ToolRegistry,
}

impl ToolRegistryBuilder {
    pub fn new() -> Self {
        Self {
            registry: ToolRegistry::new(),
        }
    }

    /// Add a tool to the registry
    pub fn tool(mut self, tool: impl Tool + 'static) -> Self {
        self.registry.register(tool);
        self
    }

    pub fn build(self) -> ToolRegistry {
        self.registry
    }
}

impl Default for ToolRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo back the provided message."
        }

        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "message": {"type": "string", "description": "The message to echo back"},
                    "times": {"type": "integer", "description": "Repeat count"}
                },
                "required": ["message"]
            })
        }

        async fn execute(&self, arguments: Value, _context: &ToolContext) -> ToolExecutionResult {
            match arguments.get("message").and_then(Value::as_str) {
                Some(message) => ToolExecutionResult::success(message),
                None => ToolExecutionResult::tool_error("message must be a string"),
            }
        }
    }

    struct FailingTool {
        internal: bool,
    }

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "failing_tool"
        }

        fn description(&self) -> &str {
            "A tool that always fails"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }

        async fn execute(&self, _arguments: Value, _context: &ToolContext) -> ToolExecutionResult {
            if self.internal {
                ToolExecutionResult::internal_error_msg("connection refused at 10.0.0.3")
            } else {
                ToolExecutionResult::tool_error("Input 'cases' is empty")
            }
        }
    }

    struct PanickingTool;

    #[async_trait]
    impl Tool for PanickingTool {
        fn name(&self) -> &str {
            "panicking_tool"
        }

        fn description(&self) -> &str {
            "Panics"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }

        async fn execute(&self, _arguments: Value, _context: &ToolContext) -> ToolExecutionResult {
            panic!("index out of bounds")
        }
    }

    fn context() -> ToolContext {
        ToolContext::new(Arc::new(InMemoryBackend::new()))
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_registration_order_and_replacement() {
        let mut registry = ToolRegistry::builder()
            .tool(EchoTool)
            .tool(FailingTool { internal: false })
            .build();
        registry.register(EchoTool);
        assert_eq!(registry.tool_names(), vec!["echo", "failing_tool"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_validate_arguments() {
        let registry = ToolRegistry::builder().tool(EchoTool).build();
        assert!(registry
            .validate_arguments("echo", &args(json!({"message": "hi"})))
            .is_ok());
        let err = registry
            .validate_arguments("echo", &args(json!({"times": 2})))
            .unwrap_err();
        assert!(err.contains("message"));
        assert!(registry.validate_arguments("nope", &Map::new()).is_ok());
    }

    #[tokio::test]
    async fn test_dispatch_success_and_unknown() {
        let registry = ToolRegistry::builder().tool(EchoTool).build();
        let ctx = context();

        let observation = registry
            .dispatch("echo", args(json!({"message": "hello"})), &ctx)
            .await;
        assert_eq!(observation, Ok("hello".to_string()));

        let err = registry.dispatch("missing", Map::new(), &ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "Unknown action missing");
    }

    #[tokio::test]
    async fn test_dispatch_errors_never_escape() {
        let registry = ToolRegistry::builder()
            .tool(FailingTool { internal: false })
            .tool(PanickingTool)
            .build();
        let ctx = context();

        let err = registry
            .dispatch("failing_tool", Map::new(), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Error: Input 'cases' is empty");

        let err = registry
            .dispatch("panicking_tool", Map::new(), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Error: tool panicked: index out of bounds");
    }

    #[tokio::test]
    async fn test_internal_error_message_reaches_agent() {
        let registry = ToolRegistry::builder()
            .tool(FailingTool { internal: true })
            .build();
        let err = registry
            .dispatch("failing_tool", Map::new(), &context())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Error: connection refused at 10.0.0.3");
    }

    #[test]
    fn test_render_catalogue() {
        let registry = ToolRegistry::builder().tool(EchoTool).build();
        let catalogue = registry.render_catalogue();
        assert!(catalogue.starts_with("You have access to the following tools:\n> Tool Name: echo\n"));
        assert!(catalogue.contains("  - message (string, required): The message to echo back"));
        assert!(catalogue.contains("  - times (integer): Repeat count"));
        assert!(catalogue.contains("Action: tool name (one of [echo])"));
    }
}
