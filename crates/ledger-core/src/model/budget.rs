use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Reserved budget category holding the overall monthly limit.
pub const GLOBAL_BUDGET_CATEGORY_NAME: &str = "GLOBAL_MONTHLY_BUDGET";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub id: i64,
    pub category: String,
    pub amount: f64,
    /// Only `"monthly"` is used today.
    pub period: String,
}

impl Budget {
    pub fn is_global(&self) -> bool {
        self.category == GLOBAL_BUDGET_CATEGORY_NAME
    }
}

/// Snapshot of one category's budget right after a transaction was logged.
/// `spend` already includes that transaction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub limit: f64,
    pub spend: f64,
    pub remaining: f64,
}

impl BudgetStatus {
    pub fn new(limit: f64, spend: f64) -> Self {
        Self {
            limit,
            spend,
            remaining: limit - spend,
        }
    }

    pub fn is_over(&self) -> bool {
        self.remaining < 0.0
    }
}

/// Month-level summary across all budgets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BudgetOverview {
    pub total_budget: f64,
    pub total_spent: f64,
    pub remaining: f64,
    /// Share of the budget spent, capped at 100. Zero when there is no budget.
    pub percentage: f64,
}

impl BudgetOverview {
    /// The global budget wins when set; otherwise category budgets are summed.
    /// Spend counts every category, budgeted or not.
    pub fn calculate(budgets: &[Budget], category_spends: &HashMap<String, f64>) -> Self {
        let global = budgets.iter().find(|b| b.is_global());
        let category_sum: f64 = budgets
            .iter()
            .filter(|b| !b.is_global())
            .map(|b| b.amount)
            .sum();

        let total_budget = global.map(|b| b.amount).unwrap_or(category_sum);
        let total_spent: f64 = category_spends.values().sum();
        let percentage = if total_budget > 0.0 {
            (total_spent / total_budget * 100.0).min(100.0)
        } else {
            0.0
        };

        Self {
            total_budget,
            total_spent,
            remaining: total_budget - total_spent,
            percentage,
        }
    }

    pub fn health(&self) -> BudgetHealth {
        BudgetHealth::from_percentage(self.percentage)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetHealth {
    OnTrack,
    Warning,
    Over,
}

impl BudgetHealth {
    pub fn from_percentage(percentage: f64) -> Self {
        if percentage > 85.0 {
            Self::Over
        } else if percentage > 60.0 {
            Self::Warning
        } else {
            Self::OnTrack
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            Self::OnTrack => "#4CAF50",
            Self::Warning => "#FFC107",
            Self::Over => "#F44336",
        }
    }
}
