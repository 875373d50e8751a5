use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::error::{LedgerError, Result};
use crate::model::{BudgetOverview, Category, Expense, ExpenseFilter};
use crate::storage::LedgerStore;

/// Colors handed out to categories that have none of their own.
pub const DEFAULT_PALETTE: &[&str] = &[
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#FFA07A", "#98D8C8", "#F7DC6F", "#BB8FCE", "#95A5A6",
    "#A9DFBF", "#F5B7B1", "#D7BDE2", "#AED6F1",
];

pub const TOP_MERCHANTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorySlice {
    pub category: String,
    pub total: f64,
    /// Share of all spending in the period, 0..=100.
    pub percentage: f64,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MerchantTotal {
    pub name: String,
    pub amount: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyTotal {
    pub day: u32,
    pub total: f64,
}

/// Everything `ledger report` shows for one month.
#[derive(Debug, Clone, Serialize)]
pub struct MonthlyReport {
    pub month: String,
    pub expense_count: usize,
    pub overview: BudgetOverview,
    pub categories: Vec<CategorySlice>,
    pub merchants: Vec<MerchantTotal>,
    pub daily: Vec<DailyTotal>,
}

/// Sum `amount` per key, keeping keys in first-seen order.
fn totals_in_order<'a>(
    expenses: &'a [Expense],
    key: impl Fn(&'a Expense) -> &'a str,
) -> Vec<(&'a str, f64, usize)> {
    let mut order: Vec<(&str, f64, usize)> = Vec::new();
    for expense in expenses {
        let k = key(expense);
        match order.iter_mut().find(|(name, _, _)| *name == k) {
            Some(entry) => {
                entry.1 += expense.amount;
                entry.2 += 1;
            }
            None => order.push((k, expense.amount, 1)),
        }
    }
    order
}

/// Spending per category, largest first.
pub fn category_breakdown(expenses: &[Expense], categories: &[Category]) -> Vec<CategorySlice> {
    let totals = totals_in_order(expenses, |e| e.category.as_str());
    let grand_total: f64 = totals.iter().map(|(_, total, _)| total).sum();

    let mut slices: Vec<CategorySlice> = totals
        .into_iter()
        .enumerate()
        .map(|(index, (name, total, _))| {
            let color = categories
                .iter()
                .find(|c| c.name == name)
                .map(|c| c.color.clone())
                .unwrap_or_else(|| DEFAULT_PALETTE[index % DEFAULT_PALETTE.len()].to_string());
            let percentage = if grand_total > 0.0 {
                total / grand_total * 100.0
            } else {
                0.0
            };
            CategorySlice {
                category: name.to_string(),
                total,
                percentage,
                color,
            }
        })
        .collect();
    slices.sort_by(|a, b| b.total.total_cmp(&a.total));
    slices
}

/// Biggest merchants by amount. Expenses without one count as "Unknown".
pub fn top_merchants(expenses: &[Expense], limit: usize) -> Vec<MerchantTotal> {
    let mut merchants: Vec<MerchantTotal> =
        totals_in_order(expenses, |e| e.merchant.as_deref().unwrap_or("Unknown"))
            .into_iter()
            .map(|(name, amount, count)| MerchantTotal {
                name: name.to_string(),
                amount,
                count,
            })
            .collect();
    merchants.sort_by(|a, b| b.amount.total_cmp(&a.amount));
    merchants.truncate(limit);
    merchants
}

/// First day and number of days of a `YYYY-MM` month.
pub fn month_bounds(month: &str) -> Result<(NaiveDate, u32)> {
    let first = NaiveDate::parse_from_str(&format!("{month}-01"), "%Y-%m-%d")
        .map_err(|_| LedgerError::InvalidInput(format!("month must be YYYY-MM, got '{month}'")))?;
    let next = if first.month() == 12 {
        NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)
    };
    let days = next
        .map(|n| (n - first).num_days() as u32)
        .ok_or_else(|| LedgerError::InvalidInput(format!("month out of range: '{month}'")))?;
    Ok((first, days))
}

/// One entry per day of the month, zero-filled.
pub fn daily_totals(expenses: &[Expense], month: &str) -> Result<Vec<DailyTotal>> {
    let (_, days) = month_bounds(month)?;
    let mut daily: Vec<DailyTotal> = (1..=days).map(|day| DailyTotal { day, total: 0.0 }).collect();
    for expense in expenses {
        if expense.month() != month {
            continue;
        }
        let day = expense
            .date
            .get(8..10)
            .and_then(|d| d.parse::<u32>().ok())
            .filter(|d| (1..=days).contains(d));
        if let Some(day) = day {
            daily[(day - 1) as usize].total += expense.amount;
        }
    }
    Ok(daily)
}

/// Collect the monthly report from storage.
pub async fn monthly_report<S: LedgerStore>(store: &S, month: &str) -> Result<MonthlyReport> {
    let (first, days) = month_bounds(month)?;
    let last = first + chrono::Duration::days(i64::from(days) - 1);
    let expenses = store
        .list_expenses(&ExpenseFilter {
            start_date: Some(first.format("%Y-%m-%d").to_string()),
            end_date: Some(last.format("%Y-%m-%d").to_string()),
            ..Default::default()
        })
        .await?;
    let categories = store.list_categories().await?;
    let budgets = store.list_budgets().await?;

    let spends: HashMap<String, f64> = store.spend_by_category(month).await?.into_iter().collect();

    Ok(MonthlyReport {
        month: month.to_string(),
        expense_count: expenses.len(),
        overview: BudgetOverview::calculate(&budgets, &spends),
        categories: category_breakdown(&expenses, &categories),
        merchants: top_merchants(&expenses, TOP_MERCHANTS),
        daily: daily_totals(&expenses, month)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewExpense;
    use crate::storage::SqliteStorage;

    fn expense(category: &str, merchant: Option<&str>, amount: f64, date: &str) -> Expense {
        Expense {
            id: 0,
            amount,
            description: String::new(),
            category: category.into(),
            merchant: merchant.map(String::from),
            date: date.into(),
            receipt_image_uri: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn sample() -> Vec<Expense> {
        vec![
            expense("Food", Some("Chipotle"), 15.0, "2025-03-02T12:00:00Z"),
            expense("Transport", None, 60.0, "2025-03-05"),
            expense("Food", Some("Chipotle"), 10.0, "2025-03-09"),
            expense("Mystery", Some("Kiosk"), 15.0, "2025-03-31"),
        ]
    }

    fn food_category() -> Category {
        Category {
            id: 1,
            name: "Food".into(),
            emoji: "🍔".into(),
            color: "#FF6B6B".into(),
        }
    }

    #[test]
    fn test_category_breakdown() {
        let slices = category_breakdown(&sample(), &[food_category()]);
        let names: Vec<&str> = slices.iter().map(|s| s.category.as_str()).collect();
        assert_eq!(names, vec!["Transport", "Food", "Mystery"]);
        assert_eq!(slices[0].percentage, 60.0);
        assert_eq!(slices[1].total, 25.0);
        assert_eq!(slices[1].color, "#FF6B6B");
        // third category seen, palette index 2
        assert_eq!(slices[2].color, DEFAULT_PALETTE[2]);
    }

    #[test]
    fn test_category_breakdown_empty() {
        assert!(category_breakdown(&[], &[]).is_empty());
    }

    #[test]
    fn test_top_merchants() {
        let merchants = top_merchants(&sample(), 2);
        assert_eq!(merchants.len(), 2);
        assert_eq!(merchants[0].name, "Unknown");
        assert_eq!(merchants[0].amount, 60.0);
        assert_eq!(merchants[1].name, "Chipotle");
        assert_eq!(merchants[1].count, 2);
    }

    #[test]
    fn test_month_bounds() {
        assert_eq!(month_bounds("2024-02").unwrap().1, 29);
        assert_eq!(month_bounds("2025-12").unwrap().1, 31);
        assert_eq!(
            month_bounds("2025-04").unwrap().0,
            NaiveDate::from_ymd_opt(2025, 4, 1).unwrap()
        );
        assert!(month_bounds("March").is_err());
    }

    #[test]
    fn test_daily_totals() {
        let daily = daily_totals(&sample(), "2025-03").unwrap();
        assert_eq!(daily.len(), 31);
        assert_eq!(daily[1].total, 15.0);
        assert_eq!(daily[30].total, 15.0);
        assert_eq!(daily[0].total, 0.0);
    }

    #[tokio::test]
    async fn test_monthly_report_from_storage() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        for (amount, category, date) in [
            (40.0, "Food", "2025-03-03"),
            (60.0, "Bills", "2025-03-15T09:30:00+00:00"),
            (500.0, "Bills", "2025-04-01"),
        ] {
            storage
                .insert_expense(&NewExpense::new(amount, category, "x").with_date(date))
                .await
                .unwrap();
        }
        storage.set_budget("Food", 200.0).await.unwrap();

        let report = monthly_report(&storage, "2025-03").await.unwrap();
        assert_eq!(report.expense_count, 2);
        assert_eq!(report.overview.total_budget, 200.0);
        assert_eq!(report.overview.total_spent, 100.0);
        assert_eq!(report.overview.percentage, 50.0);
        assert_eq!(report.categories[0].category, "Bills");
        assert_eq!(report.daily.len(), 31);
    }
}
