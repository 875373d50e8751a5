use serde::{Deserialize, Serialize};

use super::budget::BudgetStatus;

/// Outcome of one user turn with the assistant.
///
/// Serializes to `{"type": "transaction", "data": {...}}`,
/// `{"type": "message", "content": "..."}` or `{"type": "error", "content": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AiResponse {
    Transaction { data: LoggedTransaction },
    Message { content: String },
    Error { content: String },
}

impl AiResponse {
    pub fn message(content: impl Into<String>) -> Self {
        Self::Message {
            content: content.into(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::Error {
            content: content.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transaction { .. } => "transaction",
            Self::Message { .. } => "message",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// The parsed fields of a logged transaction plus the id of the stored expense.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedTransaction {
    pub amount: f64,
    pub category: String,
    pub merchant: Option<String>,
    pub id: i64,
    pub budget: Option<BudgetStatus>,
}
