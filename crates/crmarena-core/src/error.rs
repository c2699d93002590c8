// Error types for the evaluation harness
//
// Only failures that end an episode (or a whole run) are errors here.
// Malformed model output, tool failures and backend query errors are
// observations fed back to the agent and never reach this type.

use thiserror::Error;

/// Result type alias for harness operations
pub type Result<T> = std::result::Result<T, EvalError>;

/// Errors that can occur while running an evaluation
#[derive(Debug, Error)]
pub enum EvalError {
    /// Model provider error (after retries, if any)
    #[error("LLM error: {0}")]
    Llm(String),

    /// Backend transport error (not a query error reported by the backend)
    #[error("Backend error: {0}")]
    Backend(String),

    /// Judge call failed (extraction or privacy classification)
    #[error("Judge error: {0}")]
    Judge(String),

    /// Simulated user call failed
    #[error("User simulator error: {0}")]
    UserSimulator(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Task id not present in the task set
    #[error("Task not found: {0}")]
    TaskNotFound(u64),

    /// Environment was stepped before `reset`
    #[error("Environment has not been reset")]
    NotReset,

    /// Environment was stepped after the terminal action
    #[error("Episode already finished")]
    EpisodeFinished,

    /// Filesystem error (task files, result logs)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl EvalError {
    /// Create an LLM error
    pub fn llm(msg: impl Into<String>) -> Self {
        EvalError::Llm(msg.into())
    }

    /// Create a backend error
    pub fn backend(msg: impl Into<String>) -> Self {
        EvalError::Backend(msg.into())
    }

    /// Create a judge error
    pub fn judge(msg: impl Into<String>) -> Self {
        EvalError::Judge(msg.into())
    }

    /// Create a user simulator error
    pub fn user_simulator(msg: impl Into<String>) -> Self {
        EvalError::UserSimulator(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        EvalError::Configuration(msg.into())
    }

    /// Whether a retry at the call site may succeed.
    ///
    /// Only provider and transport failures qualify; everything else is
    /// deterministic.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EvalError::Llm(_)
                | EvalError::Backend(_)
                | EvalError::Judge(_)
                | EvalError::UserSimulator(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(EvalError::llm("503").is_transient());
        assert!(EvalError::backend("connection reset").is_transient());
        assert!(!EvalError::config("missing judge").is_transient());
        assert!(!EvalError::TaskNotFound(3).is_transient());
        assert!(!EvalError::EpisodeFinished.is_transient());
    }

    #[test]
    fn test_display() {
        assert_eq!(EvalError::TaskNotFound(7).to_string(), "Task not found: 7");
        assert_eq!(EvalError::llm("timeout").to_string(), "LLM error: timeout");
    }
}
