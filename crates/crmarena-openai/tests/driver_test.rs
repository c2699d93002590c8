// HTTP-level tests for the OpenAI driver against a mock server

use crmarena_core::llm::{LlmCallConfig, LlmDriver, LlmMessage};
use crmarena_core::tools::ToolRegistry;
use crmarena_core::EvalError;
use crmarena_openai::OpenAILlmDriver;
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn driver_for(server: &MockServer) -> OpenAILlmDriver {
    OpenAILlmDriver::with_base_url("test-key", format!("{}/v1/chat/completions", server.uri()))
}

#[tokio::test]
async fn test_text_completion_with_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer test-key"))
        .and(body_partial_json(json!({"model": "gpt-4o", "temperature": 0.0})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "gpt-4o-2024-08-06",
            "choices": [{
                "message": {"role": "assistant", "content": "<respond>100</respond>"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 1000, "completion_tokens": 100, "total_tokens": 1100}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = LlmCallConfig::builder("gpt-4o").temperature(0.0).build();
    let response = driver_for(&server)
        .chat_completion(vec![LlmMessage::user("How many?")], &config)
        .await
        .unwrap();

    assert_eq!(response.text, "<respond>100</respond>");
    assert!(response.tool_calls.is_none());
    assert_eq!(response.metadata.total_tokens, Some(1100));
    assert_eq!(response.metadata.model.as_deref(), Some("gpt-4o-2024-08-06"));
    let cost = response.metadata.cost.unwrap();
    assert!((cost - 0.0035).abs() < 1e-9);
}

#[tokio::test]
async fn test_native_tool_calls_round_trip_raw_arguments() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {"name": "respond", "arguments": "{\"content\": \"005Wt\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        })))
        .mount(&server)
        .await;

    let registry = ToolRegistry::crm();
    let config = LlmCallConfig::builder("gpt-4o")
        .tools(registry.tool_definitions())
        .build();
    let response = driver_for(&server)
        .chat_completion(vec![LlmMessage::user("Who?")], &config)
        .await
        .unwrap();

    assert_eq!(response.text, "");
    let call = response.first_tool_call().unwrap();
    assert_eq!(call.id, "call_abc");
    assert_eq!(call.name, "respond");
    assert_eq!(call.arguments, "{\"content\": \"005Wt\"}");
    assert!(response.metadata.cost.is_none());

    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["tools"].as_array().unwrap().len(), registry.len());
    assert_eq!(body["tools"][0]["type"], "function");
}

#[tokio::test]
async fn test_rate_limit_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;

    let config = LlmCallConfig::builder("gpt-4o").build();
    let err = driver_for(&server)
        .chat_completion(vec![LlmMessage::user("hi")], &config)
        .await
        .unwrap_err();

    assert!(matches!(err, EvalError::Llm(_)));
    assert!(err.is_transient());
    assert!(err.to_string().contains("slow down"));
}

#[tokio::test]
async fn test_bad_request_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({"error": {"message": "context_length_exceeded"}})),
        )
        .mount(&server)
        .await;

    let config = LlmCallConfig::builder("gpt-4o").build();
    let err = driver_for(&server)
        .chat_completion(vec![LlmMessage::user("hi")], &config)
        .await
        .unwrap_err();

    assert!(!err.is_transient());
    assert!(err.to_string().contains("context_length_exceeded"));
}

#[tokio::test]
async fn test_unreachable_endpoint_is_transient() {
    let driver = OpenAILlmDriver::with_base_url("k", "http://127.0.0.1:9/v1/chat/completions");
    let config = LlmCallConfig::builder("gpt-4o").build();
    let err = driver
        .chat_completion(vec![LlmMessage::user("hi")], &config)
        .await
        .unwrap_err();
    assert!(err.is_transient());
}
