// OpenAI Driver Implementation
//
// This crate provides an OpenAI-compatible LLM driver implementation.
// It implements the LlmDriver trait from crmarena-core, so the agent loop,
// the answer judge and the simulated user can all talk to any endpoint that
// speaks the chat completions protocol (OpenAI itself or a compatible gateway).

mod driver;
mod types;

pub use driver::{OpenAILlmDriver, DEFAULT_API_URL};
pub use types::{
    ChatRequest, OpenAiChoice, OpenAiFunction, OpenAiFunctionCall, OpenAiMessage,
    OpenAiResponse, OpenAiTool, OpenAiToolCall, OpenAiUsage,
};

// Re-export core types for convenience
pub use crmarena_core::llm::LlmDriver;
