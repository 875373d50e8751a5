use std::future::Future;

use crate::error::Result;
use crate::model::*;

/// Persistence collaborator for expenses, categories, budgets, incomes and
/// the chat transcript. SQLite is the only implementation today.
pub trait LedgerStore: Send + Sync {
    // -- Expenses --

    /// Insert an expense and return its new id. An embedding on the input is
    /// written in the same statement.
    fn insert_expense(&self, expense: &NewExpense) -> impl Future<Output = Result<i64>> + Send;

    fn get_expense(&self, id: i64) -> impl Future<Output = Result<Expense>> + Send;

    /// Expenses newest first.
    fn list_expenses(
        &self,
        filter: &ExpenseFilter,
    ) -> impl Future<Output = Result<Vec<Expense>>> + Send;

    fn update_expense(
        &self,
        id: i64,
        input: &UpdateExpenseInput,
    ) -> impl Future<Output = Result<Expense>> + Send;

    fn delete_expense(&self, id: i64) -> impl Future<Output = Result<()>> + Send;

    // -- Embeddings --

    /// Overwrite the embedding of one expense.
    fn update_expense_embedding(
        &self,
        id: i64,
        vector: &[f32],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Every expense whose embedding is non-null, with the raw stored text.
    fn expenses_with_embedding(&self) -> impl Future<Output = Result<Vec<EmbeddedExpense>>> + Send;

    fn expenses_missing_embedding(&self) -> impl Future<Output = Result<Vec<Expense>>> + Send;

    // -- Categories --

    fn list_categories(&self) -> impl Future<Output = Result<Vec<Category>>> + Send;

    fn add_category(&self, category: &NewCategory) -> impl Future<Output = Result<i64>> + Send;

    fn delete_category(&self, id: i64) -> impl Future<Output = Result<()>> + Send;

    // -- Budgets --

    /// Create or replace the monthly budget of a category.
    fn set_budget(&self, category: &str, amount: f64) -> impl Future<Output = Result<()>> + Send;

    fn list_budgets(&self) -> impl Future<Output = Result<Vec<Budget>>> + Send;

    fn delete_budget(&self, category: &str) -> impl Future<Output = Result<()>> + Send;

    fn category_budget_limit(
        &self,
        category: &str,
    ) -> impl Future<Output = Result<Option<f64>>> + Send;

    /// Sum of the category's expenses dated in the current calendar month.
    fn month_to_date_spend(&self, category: &str) -> impl Future<Output = Result<f64>> + Send;

    /// Per-category totals for a `YYYY-MM` month, largest first.
    fn spend_by_category(
        &self,
        month: &str,
    ) -> impl Future<Output = Result<Vec<(String, f64)>>> + Send;

    // -- Incomes --

    fn insert_income(&self, income: &NewIncome) -> impl Future<Output = Result<i64>> + Send;

    fn list_incomes(&self) -> impl Future<Output = Result<Vec<Income>>> + Send;

    fn delete_income(&self, id: i64) -> impl Future<Output = Result<()>> + Send;

    // -- Chat transcript --

    fn save_message(&self, message: &ChatMessage) -> impl Future<Output = Result<()>> + Send;

    /// The most recent `limit` messages, oldest first.
    fn recent_messages(&self, limit: usize)
        -> impl Future<Output = Result<Vec<ChatMessage>>> + Send;

    fn clear_messages(&self) -> impl Future<Output = Result<usize>> + Send;
}
