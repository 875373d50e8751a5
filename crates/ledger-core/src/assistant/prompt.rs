use crate::llm::LlmMessage;
use crate::model::{Currency, Expense};

pub const EMPTY_CONTEXT: &str = "(no transactions recorded yet)";

/// System + user messages for the extraction phase.
pub fn extraction_messages(text: &str, categories: &[String], fallback: &str) -> Vec<LlmMessage> {
    let category_list = if categories.is_empty() {
        fallback.to_string()
    } else {
        categories.join(", ")
    };

    let system = format!(
        "You are a financial assistant that classifies a single user message.\n\
         1. If the message records spending, reply with \
         {{\"amount\": number, \"category\": string, \"merchant\": string | null}}.\n\
         \x20  Pick category from: {category_list}. Use \"{fallback}\" when none fits.\n\
         \x20  Use null for merchant when no merchant is named.\n\
         2. If the message is a question, reply with {{\"intent\": \"query\"}}.\n\
         Output JSON only. No prose, no markdown fences."
    );

    vec![
        LlmMessage::system(system),
        LlmMessage::user(format!("Input: \"{text}\"")),
    ]
}

/// One bullet per expense: `- {date}: {merchant} ({symbol}{amount}) - {category}`.
pub fn render_context(expenses: &[Expense], currency: &Currency) -> String {
    if expenses.is_empty() {
        return EMPTY_CONTEXT.to_string();
    }
    expenses
        .iter()
        .map(|e| {
            format!(
                "- {}: {} ({}{}) - {}",
                e.date,
                e.display_merchant(),
                currency.symbol,
                e.amount,
                e.category
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Single user message asking for an answer grounded in `context`.
pub fn rag_messages(question: &str, context: &str) -> Vec<LlmMessage> {
    vec![LlmMessage::user(format!(
        "Context:\n{context}\n\nUser Question: \"{question}\"\n\
         Answer the question based on the context provided."
    ))]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;

    fn expense(merchant: Option<&str>, amount: f64) -> Expense {
        Expense {
            id: 1,
            amount,
            description: String::new(),
            category: "Food".into(),
            merchant: merchant.map(String::from),
            date: "2025-06-14T12:00:00.000Z".into(),
            receipt_image_uri: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_render_context_lines() {
        let usd = Currency::default_currency();
        let rendered = render_context(&[expense(Some("Chipotle"), 15.0), expense(None, 7.25)], usd);
        assert_eq!(
            rendered,
            "- 2025-06-14T12:00:00.000Z: Chipotle ($15) - Food\n\
             - 2025-06-14T12:00:00.000Z: Expense ($7.25) - Food"
        );
    }

    #[test]
    fn test_render_context_uses_currency_symbol() {
        let eur = Currency::from_code("EUR").unwrap();
        assert!(render_context(&[expense(None, 3.0)], eur).contains("(€3)"));
    }

    #[test]
    fn test_render_empty_context() {
        assert_eq!(render_context(&[], Currency::default_currency()), EMPTY_CONTEXT);
    }

    #[test]
    fn test_extraction_prompt_lists_categories() {
        let messages = extraction_messages(
            "Spent $15 on lunch",
            &["Food".into(), "Transport".into()],
            "Uncategorized",
        );
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("Food, Transport"));
        assert!(messages[0].content.contains("\"Uncategorized\""));
        assert!(messages[0].content.contains("{\"intent\": \"query\"}"));
        assert!(messages[1].content.contains("Spent $15 on lunch"));
    }

    #[test]
    fn test_rag_prompt_shape() {
        let messages = rag_messages("How much on food?", "- a\n- b");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
        assert!(messages[0].content.starts_with("Context:\n- a\n- b\n\nUser Question: \"How much on food?\""));
        assert!(messages[0].content.ends_with("based on the context provided."));
    }
}
