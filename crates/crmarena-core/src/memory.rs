// In-memory implementations for demos and testing
//
// These implementations keep all data in memory:
// - InMemoryBackend answers queries from fragment-matched canned results
// - ScriptedLlmDriver replays a fixed sequence of model replies
// - Both record what they were asked so tests can assert on traffic

use crate::backend::{BackendFactory, QueryBackend, QueryOutcome, Record, SharedBackend};
use crate::error::{EvalError, Result};
use crate::llm::{LlmCallConfig, LlmDriver, LlmMessage, LlmResponse};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// InMemoryBackend - canned query results
// ============================================================================

#[derive(Debug, Clone)]
struct CannedResult {
    fragment: String,
    outcome: QueryOutcome,
}

/// Backend that answers from canned results.
///
/// The first rule whose fragment occurs in the query wins; unmatched queries
/// return no rows.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    rules: Vec<CannedResult>,
    queries: Mutex<Vec<String>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer queries containing `fragment` with these rows (JSON objects)
    pub fn with_rows(mut self, fragment: impl Into<String>, rows: Vec<Value>) -> Self {
        let rows: Vec<Record> = rows
            .into_iter()
            .filter_map(|row| match row {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        self.rules.push(CannedResult {
            fragment: fragment.into(),
            outcome: QueryOutcome::Rows(rows),
        });
        self
    }

    /// Reject queries containing `fragment` with a backend error
    pub fn with_error(mut self, fragment: impl Into<String>, message: impl Into<String>) -> Self {
        self.rules.push(CannedResult {
            fragment: fragment.into(),
            outcome: QueryOutcome::Error(message.into()),
        });
        self
    }

    /// Every query executed so far, in order
    pub fn queries(&self) -> Vec<String> {
        lock(&self.queries).clone()
    }
}

#[async_trait]
impl QueryBackend for InMemoryBackend {
    async fn execute(&self, query: &str) -> Result<QueryOutcome> {
        lock(&self.queries).push(query.to_string());
        Ok(self
            .rules
            .iter()
            .find(|rule| query.contains(&rule.fragment))
            .map(|rule| rule.outcome.clone())
            .unwrap_or(QueryOutcome::Rows(Vec::new())))
    }
}

/// Factory handing out the same shared in-memory backend for every episode
#[derive(Clone)]
pub struct InMemoryBackendFactory {
    backend: Arc<InMemoryBackend>,
}

impl InMemoryBackendFactory {
    pub fn new(backend: InMemoryBackend) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    pub fn backend(&self) -> Arc<InMemoryBackend> {
        self.backend.clone()
    }
}

#[async_trait]
impl BackendFactory for InMemoryBackendFactory {
    async fn connect(&self) -> Result<SharedBackend> {
        Ok(self.backend.clone())
    }
}

// ============================================================================
// ScriptedLlmDriver - replays canned replies
// ============================================================================

/// One recorded model call
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<LlmMessage>,
    pub config: LlmCallConfig,
}

/// LLM driver that replays scripted replies in order.
///
/// Running out of replies is a non-transient error so retry loops stop.
#[derive(Debug, Default)]
pub struct ScriptedLlmDriver {
    replies: Mutex<VecDeque<Result<LlmResponse>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedLlmDriver {
    pub fn new(replies: impl IntoIterator<Item = LlmResponse>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(Ok).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Script from plain text replies
    pub fn from_texts<S: Into<String>>(texts: impl IntoIterator<Item = S>) -> Self {
        Self::new(texts.into_iter().map(LlmResponse::text))
    }

    pub fn push_reply(&self, reply: LlmResponse) {
        lock(&self.replies).push_back(Ok(reply));
    }

    /// Queue a failure (e.g. a transient provider error)
    pub fn push_error(&self, error: EvalError) {
        lock(&self.replies).push_back(Err(error));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn remaining(&self) -> usize {
        lock(&self.replies).len()
    }
}

#[async_trait]
impl LlmDriver for ScriptedLlmDriver {
    async fn chat_completion(
        &self,
        messages: Vec<LlmMessage>,
        config: &LlmCallConfig,
    ) -> Result<LlmResponse> {
        lock(&self.calls).push(RecordedCall {
            messages,
            config: config.clone(),
        });
        lock(&self.replies)
            .pop_front()
            .unwrap_or_else(|| Err(EvalError::Internal(anyhow::anyhow!("scripted replies exhausted"))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_backend_rules_and_log() {
        let backend = InMemoryBackend::new()
            .with_rows("FROM Case", vec![json!({"Id": "500A"})])
            .with_error("FROM Bad", "INVALID_TYPE: Bad");

        let rows = backend.execute("SELECT Id FROM Case").await.unwrap();
        assert_eq!(rows.status(), 1);
        assert_eq!(backend.execute("SELECT Id FROM Bad").await.unwrap().status(), 0);
        assert_eq!(
            backend.execute("SELECT Id FROM Other").await.unwrap(),
            QueryOutcome::Rows(vec![])
        );
        assert_eq!(backend.queries().len(), 3);
    }

    #[tokio::test]
    async fn test_scripted_driver_replays_then_fails() {
        let driver = ScriptedLlmDriver::from_texts(["one"]);
        let config = LlmCallConfig::builder("gpt-4o").build();

        let reply = driver
            .chat_completion(vec![LlmMessage::user("hi")], &config)
            .await
            .unwrap();
        assert_eq!(reply.text, "one");

        let err = driver.chat_completion(vec![], &config).await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(driver.call_count(), 2);
        assert_eq!(driver.calls()[0].messages[0].content, "hi");
    }
}
