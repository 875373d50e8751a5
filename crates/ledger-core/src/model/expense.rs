use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};

pub const MAX_DESCRIPTION_LENGTH: usize = 2_000;

/// A persisted expense row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    pub id: i64,
    pub amount: f64,
    pub description: String,
    pub category: String,
    pub merchant: Option<String>,
    /// ISO-8601 timestamp of when the expense happened.
    pub date: String,
    pub receipt_image_uri: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Expense {
    /// Merchant name for display, `"Expense"` when none was recorded.
    pub fn display_merchant(&self) -> &str {
        self.merchant.as_deref().unwrap_or("Expense")
    }

    /// `YYYY-MM` of the expense date.
    pub fn month(&self) -> &str {
        self.date.get(..7).unwrap_or(&self.date)
    }
}

/// Input for inserting an expense.
#[derive(Debug, Clone, PartialEq)]
pub struct NewExpense {
    pub amount: f64,
    pub category: String,
    pub merchant: Option<String>,
    pub description: String,
    pub date: String,
    pub receipt_image_uri: Option<String>,
    /// Written in the same statement as the row when present.
    pub embedding: Option<Vec<f32>>,
}

impl NewExpense {
    /// An expense dated now, without merchant, receipt or embedding.
    pub fn new(amount: f64, category: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            amount,
            category: category.into(),
            merchant: None,
            description: description.into(),
            date: now_iso(),
            receipt_image_uri: None,
            embedding: None,
        }
    }

    pub fn with_merchant(mut self, merchant: Option<String>) -> Self {
        self.merchant = merchant;
        self
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = date.into();
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_amount(self.amount)?;
        if self.category.trim().is_empty() {
            return Err(LedgerError::InvalidInput("category cannot be empty".into()));
        }
        if self.description.len() > MAX_DESCRIPTION_LENGTH {
            return Err(LedgerError::InvalidInput(format!(
                "description exceeds maximum length of {MAX_DESCRIPTION_LENGTH} characters"
            )));
        }
        validate_date(&self.date)
    }
}

/// Partial update of an expense. `None` fields are left untouched; the
/// embedding is never touched by an update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateExpenseInput {
    pub amount: Option<f64>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub merchant: Option<Option<String>>,
    pub date: Option<String>,
    pub receipt_image_uri: Option<Option<String>>,
}

impl UpdateExpenseInput {
    pub fn recategorize(category: impl Into<String>) -> Self {
        Self {
            category: Some(category.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(amount) = self.amount {
            validate_amount(amount)?;
        }
        if let Some(ref category) = self.category {
            if category.trim().is_empty() {
                return Err(LedgerError::InvalidInput("category cannot be empty".into()));
            }
        }
        if let Some(ref description) = self.description {
            if description.len() > MAX_DESCRIPTION_LENGTH {
                return Err(LedgerError::InvalidInput(format!(
                    "description exceeds maximum length of {MAX_DESCRIPTION_LENGTH} characters"
                )));
            }
        }
        if let Some(ref date) = self.date {
            validate_date(date)?;
        }
        Ok(())
    }
}

/// Filter for listing expenses. Dates compare against the ISO date prefix
/// (`YYYY-MM-DD`), both ends inclusive.
#[derive(Debug, Clone, Default)]
pub struct ExpenseFilter {
    pub category: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub limit: Option<usize>,
}

/// An expense together with its stored embedding text, exactly as persisted.
#[derive(Debug, Clone)]
pub struct EmbeddedExpense {
    pub expense: Expense,
    pub embedding: String,
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

fn validate_amount(amount: f64) -> Result<()> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(LedgerError::InvalidInput(format!(
            "amount must be a positive number, got {amount}"
        )));
    }
    Ok(())
}

fn validate_date(date: &str) -> Result<()> {
    if DateTime::parse_from_rfc3339(date).is_ok()
        || chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok()
    {
        return Ok(());
    }
    Err(LedgerError::InvalidInput(format!(
        "date must be ISO-8601 (YYYY-MM-DD or RFC 3339), got '{date}'"
    )))
}
