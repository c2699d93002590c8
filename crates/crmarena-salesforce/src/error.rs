// Salesforce connector errors

use crmarena_core::EvalError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SalesforceError>;

#[derive(Debug, Error)]
pub enum SalesforceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed ({status}): {message}")]
    Auth { status: u16, message: String },

    #[error("Connection error: {0}")]
    Connection(#[from] reqwest::Error),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl SalesforceError {
    pub fn config(msg: impl Into<String>) -> Self {
        SalesforceError::Config(msg.into())
    }
}

impl From<SalesforceError> for EvalError {
    fn from(err: SalesforceError) -> Self {
        match err {
            SalesforceError::Config(_) | SalesforceError::Auth { .. } => {
                EvalError::config(err.to_string())
            }
            other => EvalError::backend(other.to_string()),
        }
    }
}
