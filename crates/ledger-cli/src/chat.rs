//! Interactive chat loop over stdin.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use ledger_core::config::LedgerConfig;
use ledger_core::error::LedgerError;
use ledger_core::model::{
    AiResponse, BudgetStatus, ChatMessage, Currency, MessageKind, Sender,
};
use ledger_core::storage::{LedgerStore, SqliteStorage};
use owo_colors::OwoColorize;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::Assistant;

/// Saved messages replayed when a chat starts.
const REPLAY_MESSAGES: usize = 10;

pub(crate) async fn run_repl(
    assistant: Assistant,
    storage: Arc<SqliteStorage>,
    config: &LedgerConfig,
) -> Result<()> {
    let currency = config.currency.currency();
    let persist = config.assistant.persist_messages;

    if persist {
        match storage.recent_messages(REPLAY_MESSAGES).await {
            Ok(messages) => {
                for message in &messages {
                    print_message(message);
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to load chat history"),
        }
    }
    print_message(&ChatMessage::greeting());
    wait_for_model(&assistant).await;
    println!("{}", "Type /help for commands, /quit to leave.".dimmed());

    let mut last_expense: Option<i64> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        show_prompt();
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let text = line.trim();
        match text {
            "" => continue,
            "/quit" | "/exit" => break,
            "/help" => {
                print_help();
                continue;
            }
            "/undo" => {
                undo(&storage, last_expense.take()).await;
                continue;
            }
            _ => {}
        }

        let user = ChatMessage::user(text);
        let response = match assistant.ask(text).await {
            Ok(response) => response,
            Err(LedgerError::Busy) => {
                println!("{}", "Still working on the previous message.".yellow());
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let reply = ChatMessage::from_response(&response, currency);
        print_message(&reply);
        if let AiResponse::Transaction { data } = &response {
            if let Some(budget) = &data.budget {
                print_budget(&data.category, budget, currency);
            }
        }
        if let Some(id) = reply.expense_id() {
            last_expense = Some(id);
        }
        if persist {
            persist_exchange(&storage, &user, &reply).await;
        }
    }
    Ok(())
}

/// Prepare the model in the background, showing pull progress until it
/// finishes. A failure is reported but does not end the chat.
async fn wait_for_model(assistant: &Assistant) {
    if assistant.model_ready() {
        return;
    }

    let preparing = {
        let assistant = assistant.clone();
        tokio::spawn(async move { assistant.model().prepare().await })
    };

    let mut shown = false;
    while !preparing.is_finished() {
        let progress = assistant.download_progress();
        if progress > 0.0 {
            print!(
                "\r{} {:>3.0}%",
                "Downloading model...".dimmed(),
                progress * 100.0
            );
            let _ = std::io::stdout().flush();
            shown = true;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    if shown {
        println!();
    }

    match preparing.await {
        Ok(Ok(())) => println!(
            "{} {}",
            "Model ready:".dimmed(),
            assistant.model().model().cyan()
        ),
        Ok(Err(e)) => eprintln!(
            "{} {e}\n  Messages will fail until the model is available.",
            "Model unavailable:".yellow()
        ),
        Err(e) => eprintln!("{} {e}", "Model setup crashed:".red()),
    }
}

async fn undo(storage: &SqliteStorage, expense_id: Option<i64>) {
    let Some(id) = expense_id else {
        println!("{}", "Nothing to undo.".dimmed());
        return;
    };
    match storage.delete_expense(id).await {
        Ok(()) => println!("{} expense {}", "Removed".green(), id.to_string().cyan()),
        Err(e) => println!("{} {e}", "Could not undo:".red()),
    }
}

/// Save one user/assistant exchange. Failures are logged and otherwise ignored.
pub(crate) async fn persist_exchange(
    storage: &SqliteStorage,
    user: &ChatMessage,
    reply: &ChatMessage,
) {
    for message in [user, reply] {
        if let Err(e) = storage.save_message(message).await {
            tracing::warn!(message_id = %message.id, error = %e, "failed to save chat message");
        }
    }
}

pub(crate) fn print_message(message: &ChatMessage) {
    match (message.sender, message.kind) {
        (Sender::User, _) => println!("{} {}", "you>".bold(), message.text),
        (Sender::Ai, MessageKind::Transaction) => {
            println!("{} {}", "ai>".cyan().bold(), message.text.green())
        }
        (Sender::Ai, MessageKind::Error) => {
            println!("{} {}", "ai>".cyan().bold(), message.text.red())
        }
        (Sender::Ai, _) => println!("{} {}", "ai>".cyan().bold(), message.text),
    }
}

pub(crate) fn print_budget(category: &str, status: &BudgetStatus, currency: &Currency) {
    if status.is_over() {
        println!(
            "    {} {} is {} over its {} budget",
            "!".red().bold(),
            category,
            currency.format_amount(-status.remaining).red(),
            currency.format_amount(status.limit)
        );
    } else {
        println!(
            "    {} {} left of {} for {} this month",
            "·".dimmed(),
            currency.format_amount(status.remaining).green(),
            currency.format_amount(status.limit),
            category
        );
    }
}

fn show_prompt() {
    print!("{} ", ">".bold());
    let _ = std::io::stdout().flush();
}

fn print_help() {
    println!("  {}  log an expense, e.g. \"spent 12 on a taxi\"", "<text>".cyan());
    println!("  {}  ask a question, e.g. \"how much on food lately?\"", "<text>".cyan());
    println!("  {}   delete the expense logged last", "/undo".cyan());
    println!("  {}   leave the chat", "/quit".cyan());
}
