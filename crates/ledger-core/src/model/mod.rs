mod budget;
mod category;
mod currency;
mod expense;
mod income;
mod message;
mod response;

pub use budget::{
    Budget, BudgetHealth, BudgetOverview, BudgetStatus, GLOBAL_BUDGET_CATEGORY_NAME,
};
pub use category::{Category, NewCategory, PREDEFINED_CATEGORIES};
pub use currency::{Currency, SUPPORTED_CURRENCIES};
pub use expense::{
    now_iso, EmbeddedExpense, Expense, ExpenseFilter, NewExpense, UpdateExpenseInput,
    MAX_DESCRIPTION_LENGTH,
};
pub use income::{Income, NewIncome};
pub use message::{ChatMessage, MessageKind, Sender, EMPTY_ANSWER_TEXT};
pub use response::{AiResponse, LoggedTransaction};

#[cfg(test)]
mod tests;
