// LLM Driver Abstractions
//
// This module holds everything the harness needs to talk to a model:
// - LlmDriver trait (one non-streaming chat completion per call)
// - Message types shared by the agent history, the simulated user and the judge
// - Call configuration and completion metadata (tokens, cost)
//
// Tool-call arguments are kept as the raw string the provider returned.
// Decoding them is the action parser's job, so a malformed payload surfaces as
// an invalid action instead of being silently replaced.

use crate::error::Result;
use crate::model_profiles::get_model_quirks;
use crate::retry::RetryPolicy;
use crate::tools::ToolDefinition;
use crate::usage::UsageLog;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

// ============================================================================
// LlmDriver Trait
// ============================================================================

/// Trait for LLM drivers
///
/// Implementations handle provider-specific API calls and response parsing.
/// Errors returned here are treated as transient and retried by the caller.
#[async_trait]
pub trait LlmDriver: Send + Sync {
    async fn chat_completion(
        &self,
        messages: Vec<LlmMessage>,
        config: &LlmCallConfig,
    ) -> Result<LlmResponse>;
}

/// Shared handle to a driver; the agent, judge and simulated user may share one
pub type SharedLlmDriver = Arc<dyn LlmDriver>;

// ============================================================================
// Message Types
// ============================================================================

/// Message role in conversation (OpenAI format)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmMessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation as returned by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON argument string, not yet validated
    pub arguments: String,
}

/// Message format for LLM calls (provider-agnostic)
///
/// Also the unit of the persisted transcript, hence the serde derives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: LlmMessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<LlmToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool name on tool-result messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl LlmMessage {
    /// Create a message with text content
    pub fn text(role: LlmMessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text(LlmMessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(LlmMessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(LlmMessageRole::Assistant, content)
    }

    /// Assistant turn carrying native tool calls
    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        tool_calls: Vec<LlmToolCall>,
    ) -> Self {
        Self {
            tool_calls: Some(tool_calls),
            ..Self::assistant(content)
        }
    }

    /// Tool result answering a specific call
    pub fn tool(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
            ..Self::text(LlmMessageRole::Tool, content)
        }
    }
}

// ============================================================================
// Call Configuration
// ============================================================================

/// Per-call generation parameters.
///
/// `None` means "do not send"; some model families reject parameters
/// outright, so omission is different from sending a default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmCallConfig {
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Reasoning effort level for reasoning models ("low", "medium", "high")
    #[serde(default)]
    pub reasoning_effort: Option<String>,
    /// Tools exposed for native function calling; empty disables it
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

impl LlmCallConfig {
    pub fn builder(model: impl Into<String>) -> LlmCallConfigBuilder {
        LlmCallConfigBuilder {
            config: LlmCallConfig {
                model: model.into(),
                ..Default::default()
            },
        }
    }
}

/// Builder for LlmCallConfig with fluent API
pub struct LlmCallConfigBuilder {
    config: LlmCallConfig,
}

impl LlmCallConfigBuilder {
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.config.temperature = Some(temperature);
        self
    }

    pub fn top_p(mut self, top_p: f32) -> Self {
        self.config.top_p = Some(top_p);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.config.max_tokens = Some(max_tokens);
        self
    }

    pub fn reasoning_effort(mut self, effort: impl Into<String>) -> Self {
        self.config.reasoning_effort = Some(effort.into());
        self
    }

    pub fn tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.config.tools = tools;
        self
    }

    pub fn build(self) -> LlmCallConfig {
        self.config
    }
}

/// Build a call config with the model's quirks applied.
///
/// Parameters the model family rejects are left unset.
pub fn quirk_aware_config(model_id: &str, temperature: f32, top_p: f32) -> LlmCallConfigBuilder {
    let quirks = get_model_quirks(model_id);
    let mut builder = LlmCallConfig::builder(model_id).max_tokens(quirks.max_output_tokens);
    if !quirks.omit_temperature {
        builder = builder.temperature(temperature);
    }
    if !quirks.omit_top_p {
        builder = builder.top_p(top_p);
    }
    if let Some(effort) = quirks.reasoning_effort() {
        builder = builder.reasoning_effort(effort);
    }
    builder
}

// ============================================================================
// ModelEndpoint - a driver bound to one model id
// ============================================================================

/// A driver bound to a model id with a retry policy.
///
/// The judge and the simulated user each own one and keep their usage apart
/// from the agent's.
#[derive(Clone)]
pub struct ModelEndpoint {
    pub driver: SharedLlmDriver,
    pub model: String,
    pub retry: RetryPolicy,
}

impl ModelEndpoint {
    pub fn new(driver: SharedLlmDriver, model: impl Into<String>) -> Self {
        Self {
            driver,
            model: model.into(),
            retry: RetryPolicy::llm_default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// One deterministic completion, retried on transient failures.
    ///
    /// Usage is recorded into `usage` once the call succeeds.
    pub async fn complete(
        &self,
        operation: &str,
        messages: Vec<LlmMessage>,
        usage: &mut UsageLog,
    ) -> Result<LlmResponse> {
        let config = quirk_aware_config(&self.model, 0.0, 1.0).build();
        let response = self
            .retry
            .run(operation, || self.driver.chat_completion(messages.clone(), &config))
            .await?;
        usage.record_priced(&self.model, &response.metadata);
        debug!(operation, model = %self.model, "Secondary model call completed");
        Ok(response)
    }
}

impl std::fmt::Debug for ModelEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelEndpoint")
            .field("model", &self.model)
            .field("retry", &self.retry)
            .finish()
    }
}

// ============================================================================
// Response Types
// ============================================================================

/// Metadata about LLM completion
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmCompletionMetadata {
    pub total_tokens: Option<u32>,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub model: Option<String>,
    pub finish_reason: Option<String>,
    /// Call cost in USD, if the driver could price it
    pub cost: Option<f64>,
}

/// Complete (non-streaming) model response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmResponse {
    pub text: String,
    pub tool_calls: Option<Vec<LlmToolCall>>,
    pub metadata: LlmCompletionMetadata,
}

impl LlmResponse {
    /// Text-only response
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// First tool call, if any
    pub fn first_tool_call(&self) -> Option<&LlmToolCall> {
        self.tool_calls.as_ref().and_then(|calls| calls.first())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let msg = LlmMessage::tool("call_1", "get_issues", "[]");
        assert_eq!(msg.role, LlmMessageRole::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.name.as_deref(), Some("get_issues"));

        let msg = LlmMessage::assistant_with_tool_calls(
            "",
            vec![LlmToolCall {
                id: "call_2".into(),
                name: "respond".into(),
                arguments: "{\"content\": \"x\"}".into(),
            }],
        );
        assert_eq!(msg.role, LlmMessageRole::Assistant);
        assert_eq!(msg.tool_calls.unwrap().len(), 1);
    }

    #[test]
    fn test_transcript_serialization_skips_empty_fields() {
        let json = serde_json::to_value(LlmMessage::user("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn test_quirk_aware_config_drops_rejected_parameters() {
        let config = quirk_aware_config("o1-preview", 0.0, 1.0).build();
        assert!(config.temperature.is_none());
        assert!(config.top_p.is_none());
        assert_eq!(config.max_tokens, Some(50000));

        let config = quirk_aware_config("gpt-4o", 0.0, 1.0).build();
        assert_eq!(config.temperature, Some(0.0));
        assert_eq!(config.top_p, Some(1.0));
        assert_eq!(config.max_tokens, Some(3500));
    }

    #[test]
    fn test_call_config_builder() {
        let config = LlmCallConfig::builder("gpt-4o")
            .temperature(0.0)
            .top_p(1.0)
            .max_tokens(3500)
            .build();
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.temperature, Some(0.0));
        assert_eq!(config.max_tokens, Some(3500));
        assert!(config.reasoning_effort.is_none());
        assert!(config.tools.is_empty());
    }
}
