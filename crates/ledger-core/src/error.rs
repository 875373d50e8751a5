use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("a conversation is already in flight")]
    Busy,
}

impl LedgerError {
    /// Wrap a rusqlite error with a short description of the failed operation.
    pub(crate) fn storage(op: &str, err: rusqlite::Error) -> Self {
        Self::Storage(format!("failed to {op}: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
