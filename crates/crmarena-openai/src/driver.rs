// OpenAI LLM Driver
//
// Production implementation for OpenAI-compatible chat completion APIs.
// One request per call, no streaming. Token usage from the response is copied
// into the completion metadata and priced with the model quirk table.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::types::{
    ChatRequest, OpenAiFunction, OpenAiFunctionCall, OpenAiMessage, OpenAiResponse, OpenAiTool,
    OpenAiToolCall,
};
use crmarena_core::error::{EvalError, Result};
use crmarena_core::llm::{
    LlmCallConfig, LlmCompletionMetadata, LlmDriver, LlmMessage, LlmMessageRole, LlmResponse,
    LlmToolCall,
};
use crmarena_core::model_profiles::estimate_cost;
use crmarena_core::tools::ToolDefinition;

pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI LLM Driver
///
/// # Example
///
/// ```ignore
/// use crmarena_openai::OpenAILlmDriver;
///
/// let driver = OpenAILlmDriver::from_env()?;
/// // or
/// let driver = OpenAILlmDriver::new("your-api-key");
/// // or with a compatible gateway
/// let driver = OpenAILlmDriver::with_base_url("your-api-key", "https://gateway.example.com/v1/chat/completions");
/// ```
#[derive(Clone)]
pub struct OpenAILlmDriver {
    client: Client,
    api_key: String,
    api_url: String,
}

impl OpenAILlmDriver {
    /// Create a new driver with the given API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_API_URL)
    }

    /// Create a new driver from the OPENAI_API_KEY environment variable
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| EvalError::config("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self::new(api_key))
    }

    /// Create a new driver with a custom API URL (full chat completions URL)
    pub fn with_base_url(api_key: impl Into<String>, api_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            api_url: api_url.into(),
        }
    }

    /// Get the API URL
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn convert_role(role: LlmMessageRole) -> &'static str {
        match role {
            LlmMessageRole::System => "system",
            LlmMessageRole::User => "user",
            LlmMessageRole::Assistant => "assistant",
            LlmMessageRole::Tool => "tool",
        }
    }

    fn convert_message(msg: &LlmMessage) -> OpenAiMessage {
        let tool_calls = msg.tool_calls.as_ref().map(|calls| {
            calls
                .iter()
                .map(|tc| OpenAiToolCall {
                    id: tc.id.clone(),
                    r#type: "function".to_string(),
                    function: OpenAiFunctionCall {
                        name: tc.name.clone(),
                        arguments: tc.arguments.clone(),
                    },
                })
                .collect::<Vec<_>>()
        });

        // An assistant turn that only carries tool calls goes out with null content
        let content = if msg.content.is_empty() && tool_calls.is_some() {
            None
        } else {
            Some(msg.content.clone())
        };

        OpenAiMessage {
            role: Self::convert_role(msg.role).to_string(),
            content,
            tool_calls,
            tool_call_id: msg.tool_call_id.clone(),
            name: msg.name.clone(),
        }
    }

    fn convert_tools(tools: &[ToolDefinition]) -> Vec<OpenAiTool> {
        tools
            .iter()
            .map(|tool| OpenAiTool {
                r#type: "function".to_string(),
                function: OpenAiFunction {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                },
            })
            .collect()
    }

    fn build_request(messages: &[LlmMessage], config: &LlmCallConfig) -> ChatRequest {
        let tools = if config.tools.is_empty() {
            None
        } else {
            Some(Self::convert_tools(&config.tools))
        };

        ChatRequest {
            model: config.model.clone(),
            messages: messages.iter().map(Self::convert_message).collect(),
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_tokens,
            reasoning_effort: config.reasoning_effort.clone(),
            tools,
        }
    }

    fn convert_response(response: OpenAiResponse, requested_model: &str) -> Result<LlmResponse> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| EvalError::llm("OpenAI API returned no choices"))?;

        let tool_calls = choice
            .message
            .tool_calls
            .filter(|calls| !calls.is_empty())
            .map(|calls| {
                calls
                    .into_iter()
                    .map(|tc| LlmToolCall {
                        id: tc.id,
                        name: tc.function.name,
                        arguments: tc.function.arguments,
                    })
                    .collect()
            });

        let model = response
            .model
            .unwrap_or_else(|| requested_model.to_string());
        let mut metadata = LlmCompletionMetadata {
            model: Some(model),
            finish_reason: choice.finish_reason,
            ..Default::default()
        };
        if let Some(usage) = response.usage {
            metadata.prompt_tokens = Some(usage.prompt_tokens);
            metadata.completion_tokens = Some(usage.completion_tokens);
            metadata.total_tokens = Some(usage.total_tokens);
            // Priced by the id we asked for; gateways often report a dated snapshot name
            metadata.cost = Some(estimate_cost(
                requested_model,
                usage.prompt_tokens,
                usage.completion_tokens,
            ));
        }

        Ok(LlmResponse {
            text: choice.message.content.unwrap_or_default(),
            tool_calls,
            metadata,
        })
    }
}

/// Rate limits, timeouts and server errors are worth another attempt.
/// Any other client error means the request itself is wrong.
fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

#[async_trait]
impl LlmDriver for OpenAILlmDriver {
    async fn chat_completion(
        &self,
        messages: Vec<LlmMessage>,
        config: &LlmCallConfig,
    ) -> Result<LlmResponse> {
        let request = Self::build_request(&messages, config);
        debug!(
            model = %config.model,
            messages = request.messages.len(),
            tools = request.tools.as_ref().map_or(0, Vec::len),
            "Sending chat completion request"
        );

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| EvalError::llm(format!("Failed to send request: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(model = %config.model, status = %status, "Chat completion failed");
            let message = format!("OpenAI API error ({}): {}", status, error_text);
            return Err(if is_retryable_status(status) {
                EvalError::llm(message)
            } else {
                EvalError::Internal(anyhow::anyhow!(message))
            });
        }

        let body: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| EvalError::llm(format!("Failed to parse response: {}", e)))?;

        Self::convert_response(body, &config.model)
    }
}

impl std::fmt::Debug for OpenAILlmDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAILlmDriver")
            .field("api_url", &self.api_url())
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_assistant_tool_call_has_null_content() {
        let msg = LlmMessage::assistant_with_tool_calls(
            "",
            vec![LlmToolCall {
                id: "call_1".into(),
                name: "get_cases".into(),
                arguments: "{\"agent_ids\": []}".into(),
            }],
        );
        let converted = OpenAILlmDriver::convert_message(&msg);
        let value = serde_json::to_value(&converted).unwrap();
        assert_eq!(value["role"], "assistant");
        assert!(value.get("content").is_none());
        assert_eq!(value["tool_calls"][0]["function"]["arguments"], "{\"agent_ids\": []}");
    }

    #[test]
    fn test_omitted_parameters_are_not_serialized() {
        let config = LlmCallConfig::builder("o1-preview").max_tokens(50000).build();
        let request = OpenAILlmDriver::build_request(&[LlmMessage::user("hi")], &config);
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("temperature").is_none());
        assert!(value.get("top_p").is_none());
        assert!(value.get("tools").is_none());
        assert_eq!(value["max_tokens"], 50000);
    }

    #[test]
    fn test_response_without_choices_is_an_error() {
        let response: OpenAiResponse =
            serde_json::from_value(json!({"model": "gpt-4o", "choices": []})).unwrap();
        let err = OpenAILlmDriver::convert_response(response, "gpt-4o").unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
    }
}
