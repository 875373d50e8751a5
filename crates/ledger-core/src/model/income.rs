use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Income {
    pub id: i64,
    pub amount: f64,
    pub description: String,
    /// Free-form source, e.g. "salary" or "freelance".
    pub kind: String,
    pub date: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewIncome {
    pub amount: f64,
    pub description: String,
    pub kind: String,
    pub date: String,
}
