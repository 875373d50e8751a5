use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::currency::Currency;
use super::response::AiResponse;

pub const EMPTY_ANSWER_TEXT: &str = "I processed that but have nothing to say.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Ai,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Transaction,
    Error,
    Message,
}

macro_rules! impl_str_enum {
    ($ty:ty { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s,)+
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant),)+
                    other => Err(format!("unknown {}: '{other}'", stringify!($ty))),
                }
            }
        }
    };
}

impl_str_enum!(Sender { User => "user", Ai => "ai" });
impl_str_enum!(MessageKind {
    Text => "text",
    Transaction => "transaction",
    Error => "error",
    Message => "message",
});

/// One line of the chat transcript.
///
/// A `Transaction` message always carries `data.id` of the stored expense so
/// it can later be undone or recategorized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub text: String,
    pub sender: Sender,
    pub kind: MessageKind,
    pub data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            text: text.into(),
            sender: Sender::User,
            kind: MessageKind::Text,
            data: None,
            created_at: Utc::now(),
        }
    }

    pub fn greeting() -> Self {
        Self {
            sender: Sender::Ai,
            ..Self::user(
                "Hi! I'm your financial assistant. Tell me what you spent \
                 (e.g., 'Spent $15 on lunch') or ask about your expenses.",
            )
        }
    }

    /// Render an assistant response as the AI side of the transcript.
    pub fn from_response(response: &AiResponse, currency: &Currency) -> Self {
        let (text, kind, data) = match response {
            AiResponse::Transaction { data } => (
                format!(
                    "Saved: {} - {}{} ({})",
                    data.merchant.as_deref().unwrap_or("Expense"),
                    currency.symbol,
                    data.amount,
                    data.category
                ),
                MessageKind::Transaction,
                serde_json::to_value(data).ok(),
            ),
            AiResponse::Message { content } => {
                let text = if content.trim().is_empty() {
                    EMPTY_ANSWER_TEXT.to_string()
                } else {
                    content.clone()
                };
                (text, MessageKind::Message, None)
            }
            AiResponse::Error { content } => {
                let text = if content.is_empty() {
                    "Error processing request".to_string()
                } else {
                    content.clone()
                };
                (text, MessageKind::Error, None)
            }
        };

        Self {
            id: Uuid::now_v7().to_string(),
            text,
            sender: Sender::Ai,
            kind,
            data,
            created_at: Utc::now(),
        }
    }

    /// Expense id referenced by a transaction message.
    pub fn expense_id(&self) -> Option<i64> {
        if self.kind != MessageKind::Transaction {
            return None;
        }
        self.data.as_ref()?.get("id")?.as_i64()
    }
}
