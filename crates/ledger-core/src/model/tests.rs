use std::collections::HashMap;

use crate::model::*;

fn budget(category: &str, amount: f64) -> Budget {
    Budget {
        id: 0,
        category: category.to_string(),
        amount,
        period: "monthly".to_string(),
    }
}

fn spends() -> HashMap<String, f64> {
    HashMap::from([
        ("Food".to_string(), 250.0),
        ("Transport".to_string(), 50.0),
        // Unbudgeted spend still counts
        ("Entertainment".to_string(), 100.0),
    ])
}

// ── Expense ──────────────────────────────────────────────────────

#[test]
fn test_new_expense_defaults() {
    let expense = NewExpense::new(15.0, "Food", "Spent $15 on lunch");
    assert_eq!(expense.amount, 15.0);
    assert_eq!(expense.category, "Food");
    assert!(expense.merchant.is_none());
    assert!(expense.embedding.is_none());
    assert!(chrono::DateTime::parse_from_rfc3339(&expense.date).is_ok());
    assert!(expense.validate().is_ok());
}

#[test]
fn test_new_expense_rejects_non_positive_amount() {
    assert!(NewExpense::new(0.0, "Food", "x").validate().is_err());
    assert!(NewExpense::new(-3.0, "Food", "x").validate().is_err());
    assert!(NewExpense::new(f64::NAN, "Food", "x").validate().is_err());
}

#[test]
fn test_new_expense_rejects_blank_category_and_bad_date() {
    assert!(NewExpense::new(1.0, "  ", "x").validate().is_err());
    let bad_date = NewExpense::new(1.0, "Food", "x").with_date("last tuesday");
    assert!(bad_date.validate().is_err());
    let plain_date = NewExpense::new(1.0, "Food", "x").with_date("2025-03-09");
    assert!(plain_date.validate().is_ok());
}

#[test]
fn test_description_length_limit() {
    let long = "x".repeat(MAX_DESCRIPTION_LENGTH + 1);
    assert!(NewExpense::new(1.0, "Food", long).validate().is_err());
}

#[test]
fn test_update_input_helpers() {
    assert!(UpdateExpenseInput::default().is_empty());
    let input = UpdateExpenseInput::recategorize("Transport");
    assert!(!input.is_empty());
    assert_eq!(input.category.as_deref(), Some("Transport"));
    assert!(input.validate().is_ok());
    assert!(UpdateExpenseInput::recategorize("").validate().is_err());
}

#[test]
fn test_update_input_validates_every_field() {
    let edit = UpdateExpenseInput {
        amount: Some(9.5),
        description: Some("team lunch".into()),
        merchant: Some(None),
        date: Some("2025-05-02".into()),
        ..Default::default()
    };
    assert!(edit.validate().is_ok());

    for bad in [
        UpdateExpenseInput {
            amount: Some(0.0),
            ..Default::default()
        },
        UpdateExpenseInput {
            amount: Some(f64::NAN),
            ..Default::default()
        },
        UpdateExpenseInput {
            date: Some("yesterday".into()),
            ..Default::default()
        },
        UpdateExpenseInput {
            description: Some("x".repeat(MAX_DESCRIPTION_LENGTH + 1)),
            ..Default::default()
        },
    ] {
        assert!(bad.validate().is_err(), "{bad:?} should be rejected");
    }
}

#[test]
fn test_expense_display_helpers() {
    let mut expense = Expense {
        id: 1,
        amount: 12.5,
        description: "coffee".into(),
        category: "Food".into(),
        merchant: None,
        date: "2025-06-14T08:00:00+00:00".into(),
        receipt_image_uri: None,
        created_at: String::new(),
        updated_at: String::new(),
    };
    assert_eq!(expense.display_merchant(), "Expense");
    assert_eq!(expense.month(), "2025-06");
    expense.merchant = Some("Blue Bottle".into());
    assert_eq!(expense.display_merchant(), "Blue Bottle");
}

// ── Category ─────────────────────────────────────────────────────

#[test]
fn test_category_find_by_name_case_insensitive() {
    let categories: Vec<Category> = PREDEFINED_CATEGORIES
        .iter()
        .enumerate()
        .map(|(i, (name, emoji, color))| Category {
            id: i as i64 + 1,
            name: name.to_string(),
            emoji: emoji.to_string(),
            color: color.to_string(),
        })
        .collect();

    let found = Category::find_by_name(&categories, " food ").unwrap();
    assert_eq!(found.name, "Food");
    assert!(Category::find_by_name(&categories, "Groceries").is_none());
}

#[test]
fn test_predefined_categories() {
    assert_eq!(PREDEFINED_CATEGORIES.len(), 8);
    assert!(PREDEFINED_CATEGORIES.iter().any(|(n, _, _)| *n == "Food"));
    assert!(PREDEFINED_CATEGORIES.iter().any(|(n, _, _)| *n == "Other"));
}

// ── Budget ───────────────────────────────────────────────────────

#[test]
fn test_budget_status_remaining_includes_new_spend() {
    // limit 500, prior spend 200, new expense 50
    let status = BudgetStatus::new(500.0, 200.0 + 50.0);
    assert_eq!(status.spend, 250.0);
    assert_eq!(status.remaining, 250.0);
    assert!(!status.is_over());
    assert!(BudgetStatus::new(100.0, 120.0).is_over());
}

#[test]
fn test_overview_sums_category_budgets() {
    let budgets = vec![budget("Food", 500.0), budget("Transport", 300.0)];
    let overview = BudgetOverview::calculate(&budgets, &spends());
    assert_eq!(overview.total_budget, 800.0);
    assert_eq!(overview.total_spent, 400.0);
    assert_eq!(overview.remaining, 400.0);
    assert_eq!(overview.percentage, 50.0);
}

#[test]
fn test_overview_prefers_global_budget() {
    let budgets = vec![
        budget("Food", 500.0),
        budget(GLOBAL_BUDGET_CATEGORY_NAME, 1000.0),
    ];
    let overview = BudgetOverview::calculate(&budgets, &spends());
    assert_eq!(overview.total_budget, 1000.0);
    assert_eq!(overview.percentage, 40.0);
}

#[test]
fn test_overview_zero_budget() {
    let overview = BudgetOverview::calculate(&[], &spends());
    assert_eq!(overview.total_budget, 0.0);
    assert_eq!(overview.total_spent, 400.0);
    assert_eq!(overview.remaining, -400.0);
    assert_eq!(overview.percentage, 0.0);
}

#[test]
fn test_overview_caps_percentage() {
    let budgets = vec![budget("Food", 500.0), budget("Transport", 300.0)];
    let mut over = spends();
    over.insert("Food".into(), 1000.0);
    let overview = BudgetOverview::calculate(&budgets, &over);
    assert_eq!(overview.percentage, 100.0);
    assert_eq!(overview.health(), BudgetHealth::Over);
}

#[test]
fn test_budget_health_thresholds() {
    assert_eq!(BudgetHealth::from_percentage(50.0), BudgetHealth::OnTrack);
    assert_eq!(BudgetHealth::from_percentage(70.0), BudgetHealth::Warning);
    assert_eq!(BudgetHealth::from_percentage(90.0), BudgetHealth::Over);
    assert_eq!(BudgetHealth::OnTrack.color(), "#4CAF50");
    assert_eq!(BudgetHealth::Warning.color(), "#FFC107");
    assert_eq!(BudgetHealth::Over.color(), "#F44336");
}

// ── Currency ─────────────────────────────────────────────────────

#[test]
fn test_currency_lookup() {
    assert_eq!(Currency::from_code("usd").unwrap().symbol, "$");
    assert_eq!(Currency::from_code("NGN").unwrap().symbol, "₦");
    assert!(Currency::from_code("XYZ").is_none());
    assert_eq!(Currency::default_currency().code, "USD");
}

#[test]
fn test_currency_format_amount() {
    let usd = Currency::default_currency();
    assert_eq!(usd.format_amount(1234.5), "$ 1,234.50");
    assert_eq!(usd.format_amount(15.0), "$ 15.00");
    assert_eq!(usd.format_amount(1_000_000.0), "$ 1,000,000.00");
    assert_eq!(usd.format_amount(-42.1), "$ -42.10");
    assert_eq!(usd.format_amount(0.0), "$ 0.00");
}

// ── AiResponse / ChatMessage ─────────────────────────────────────

fn logged(merchant: Option<&str>) -> AiResponse {
    AiResponse::Transaction {
        data: LoggedTransaction {
            amount: 15.0,
            category: "Food".into(),
            merchant: merchant.map(String::from),
            id: 7,
            budget: Some(BudgetStatus::new(500.0, 250.0)),
        },
    }
}

#[test]
fn test_ai_response_serializes_tagged() {
    let json = serde_json::to_value(logged(None)).unwrap();
    assert_eq!(json["type"], "transaction");
    assert_eq!(json["data"]["id"], 7);
    assert_eq!(json["data"]["merchant"], serde_json::Value::Null);
    assert_eq!(json["data"]["budget"]["remaining"], 250.0);

    let json = serde_json::to_value(AiResponse::message("hi")).unwrap();
    assert_eq!(json, serde_json::json!({"type": "message", "content": "hi"}));

    let json = serde_json::to_value(AiResponse::error("nope")).unwrap();
    assert_eq!(json, serde_json::json!({"type": "error", "content": "nope"}));
}

#[test]
fn test_chat_message_from_transaction() {
    let msg = ChatMessage::from_response(&logged(None), Currency::default_currency());
    assert_eq!(msg.text, "Saved: Expense - $15 (Food)");
    assert_eq!(msg.sender, Sender::Ai);
    assert_eq!(msg.kind, MessageKind::Transaction);
    assert_eq!(msg.expense_id(), Some(7));

    let msg = ChatMessage::from_response(&logged(Some("Chipotle")), Currency::default_currency());
    assert_eq!(msg.text, "Saved: Chipotle - $15 (Food)");
}

#[test]
fn test_chat_message_empty_answer() {
    let msg = ChatMessage::from_response(&AiResponse::message("  "), Currency::default_currency());
    assert_eq!(msg.text, EMPTY_ANSWER_TEXT);
    assert_eq!(msg.kind, MessageKind::Message);
    assert_eq!(msg.expense_id(), None);
}

#[test]
fn test_chat_message_error() {
    let msg =
        ChatMessage::from_response(&AiResponse::error("Model is loading..."), Currency::default_currency());
    assert_eq!(msg.kind, MessageKind::Error);
    assert_eq!(msg.text, "Model is loading...");
}

#[test]
fn test_sender_and_kind_parse() {
    assert_eq!("user".parse::<Sender>().unwrap(), Sender::User);
    assert_eq!("ai".parse::<Sender>().unwrap(), Sender::Ai);
    assert_eq!(
        "transaction".parse::<MessageKind>().unwrap(),
        MessageKind::Transaction
    );
    assert!("robot".parse::<Sender>().is_err());
    assert_eq!(MessageKind::Message.to_string(), "message");
}

#[test]
fn test_greeting_is_from_ai() {
    let msg = ChatMessage::greeting();
    assert_eq!(msg.sender, Sender::Ai);
    assert!(msg.text.starts_with("Hi!"));
}
