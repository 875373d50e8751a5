mod chat;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ledger_core::assistant::{AssistantSettings, ExpenseAssistant};
use ledger_core::config::{LedgerConfig, VALID_LLM_PROVIDERS, VALID_PROVIDERS};
use ledger_core::embedding::EmbeddingService;
use ledger_core::llm::LlmService;
use ledger_core::model::*;
use ledger_core::report::{self, MonthlyReport};
use ledger_core::storage::{create_backend, LedgerStore, SqliteStorage};
use ledger_core::vector::VectorStore;
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;

/// The assistant as wired by the binary: HTTP model, SQLite store, linear
/// vector scan over the same store.
pub(crate) type Assistant =
    ExpenseAssistant<LlmService, SqliteStorage, VectorStore<SqliteStorage>>;

#[derive(Parser)]
#[command(name = "ledger", about = "Ledger: a chat-driven expense tracker", version)]
enum Cli {
    /// Create .ledger/config.toml in the current directory
    Init {
        /// Language model provider (ollama, openai, anthropic, claude, gemini)
        #[arg(long, default_value = "ollama")]
        llm_provider: String,
        /// Embedding provider (random, hash, ollama, openai)
        #[arg(long, default_value = "random")]
        embedding_provider: String,
    },
    /// Talk to the assistant: log expenses or ask about them
    Chat,
    /// Send a single message to the assistant
    Ask {
        /// Message text, e.g. "spent $15 on lunch at Chipotle"
        #[arg(required = true)]
        text: Vec<String>,
        /// Output the raw response as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add an expense without going through the model
    Add {
        amount: f64,
        #[arg(short, long)]
        category: Option<String>,
        #[arg(short, long)]
        merchant: Option<String>,
        #[arg(short, long, default_value = "")]
        description: String,
        /// ISO date or timestamp (default: now)
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// List expenses, newest first
    List {
        #[arg(short, long)]
        category: Option<String>,
        /// First day to include (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,
        /// Last day to include (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,
        #[arg(short, long, default_value = "20")]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Delete an expense
    Delete { id: i64 },
    /// Move an expense to another category
    Recategorize { id: i64, category: String },
    /// Change fields of an expense; unset flags are left alone
    Edit {
        id: i64,
        #[arg(long)]
        amount: Option<f64>,
        #[arg(short, long)]
        category: Option<String>,
        /// Empty string clears the merchant
        #[arg(short, long)]
        merchant: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
        /// ISO date or timestamp
        #[arg(long)]
        date: Option<String>,
        /// Receipt image path or URI; empty string clears it
        #[arg(long)]
        receipt: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// List categories
    Categories {
        #[arg(long)]
        json: bool,
    },
    /// Add a category
    CategoryAdd {
        name: String,
        #[arg(long, default_value = "📦")]
        emoji: String,
        #[arg(long, default_value = "#95A5A6")]
        color: String,
    },
    /// Delete a category by id
    CategoryDelete { id: i64 },
    /// Manage monthly budgets
    Budget {
        #[command(subcommand)]
        action: BudgetCommand,
    },
    /// Record and list income
    Income {
        #[command(subcommand)]
        action: IncomeCommand,
    },
    /// Monthly spending report
    Report {
        /// Month to report on (YYYY-MM, default: current month)
        #[arg(short, long)]
        month: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Attach embeddings to expenses that have none
    Reembed {
        /// Show what would be done without making changes
        #[arg(long)]
        dry_run: bool,
    },
    /// Show the saved chat transcript
    History {
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Delete the saved transcript
        #[arg(long)]
        clear: bool,
        #[arg(long)]
        json: bool,
    },
    /// Show database, model and embedding status
    Status,
}

#[derive(Subcommand)]
enum BudgetCommand {
    /// Set the monthly budget of a category ("global" for the overall budget)
    Set { category: String, amount: f64 },
    /// Show budgets with this month's spend
    Show {
        #[arg(long)]
        json: bool,
    },
    /// Remove a category's budget
    Remove { category: String },
}

#[derive(Subcommand)]
enum IncomeCommand {
    /// Record income
    Add {
        amount: f64,
        /// Source, e.g. salary or freelance
        #[arg(short, long, default_value = "salary")]
        kind: String,
        #[arg(short, long, default_value = "")]
        description: String,
        #[arg(long)]
        date: Option<String>,
    },
    /// List recorded income
    List {
        #[arg(long)]
        json: bool,
    },
    /// Delete an income entry
    Delete { id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .compact()
        .init();

    let cli = Cli::parse();
    let config = match LedgerConfig::load(Some(&std::env::current_dir()?)) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load config, using defaults");
            LedgerConfig::default_config()
        }
    };

    let result = run(cli, &config).await;
    if let Err(ref err) = result {
        let friendly = format_model_error(err, &config);
        if friendly != format!("{err}") {
            eprintln!("{friendly}");
            std::process::exit(1);
        }
    }
    result
}

async fn run(cli: Cli, config: &LedgerConfig) -> Result<()> {
    match cli {
        Cli::Init {
            llm_provider,
            embedding_provider,
        } => cmd_init(&llm_provider, &embedding_provider),
        Cli::Chat => {
            let storage = make_storage(config)?;
            let assistant = build_assistant(config, Arc::clone(&storage))?;
            chat::run_repl(assistant, storage, config).await
        }
        Cli::Ask { text, json } => {
            let storage = make_storage(config)?;
            cmd_ask(config, storage, &text.join(" "), json).await
        }
        Cli::Add {
            amount,
            category,
            merchant,
            description,
            date,
            json,
        } => {
            let storage = make_storage(config)?;
            let input = ManualExpense {
                amount,
                category,
                merchant,
                description,
                date,
            };
            cmd_add(&storage, config, input, json).await
        }
        Cli::List {
            category,
            from,
            to,
            limit,
            json,
        } => {
            let storage = make_storage(config)?;
            let filter = ExpenseFilter {
                category,
                start_date: from,
                end_date: to,
                limit: Some(limit),
            };
            cmd_list(&storage, config, &filter, json).await
        }
        Cli::Delete { id } => {
            let storage = make_storage(config)?;
            storage
                .delete_expense(id)
                .await
                .with_context(|| format!("failed to delete expense {id}"))?;
            println!("{} expense {}", "Deleted".green(), id.to_string().cyan());
            Ok(())
        }
        Cli::Recategorize { id, category } => {
            let storage = make_storage(config)?;
            cmd_recategorize(&storage, id, &category).await
        }
        Cli::Edit {
            id,
            amount,
            category,
            merchant,
            description,
            date,
            receipt,
            json,
        } => {
            let storage = make_storage(config)?;
            let categories = storage.list_categories().await?;
            let category = category
                .map(|name| resolve_manual_category(&name, &categories, config))
                .transpose()?;
            let input = UpdateExpenseInput {
                amount,
                description,
                category,
                merchant: clearable(merchant),
                date,
                receipt_image_uri: clearable(receipt),
            };
            cmd_edit(&storage, config, id, &input, json).await
        }
        Cli::Categories { json } => {
            let storage = make_storage(config)?;
            cmd_categories(&storage, json).await
        }
        Cli::CategoryAdd { name, emoji, color } => {
            let storage = make_storage(config)?;
            let id = storage
                .add_category(&NewCategory::new(name.trim(), emoji, color))
                .await
                .context("failed to add category")?;
            println!(
                "{} category {} ({})",
                "Added".green(),
                name.trim().bold(),
                id.to_string().cyan()
            );
            Ok(())
        }
        Cli::CategoryDelete { id } => {
            let storage = make_storage(config)?;
            storage
                .delete_category(id)
                .await
                .with_context(|| format!("failed to delete category {id}"))?;
            println!("{} category {}", "Deleted".green(), id.to_string().cyan());
            Ok(())
        }
        Cli::Budget { action } => {
            let storage = make_storage(config)?;
            cmd_budget(&storage, config, action).await
        }
        Cli::Income { action } => {
            let storage = make_storage(config)?;
            cmd_income(&storage, config, action).await
        }
        Cli::Report { month, json } => {
            let storage = make_storage(config)?;
            let month = month.unwrap_or_else(current_month);
            cmd_report(&storage, config, &month, json).await
        }
        Cli::Reembed { dry_run } => {
            let storage = make_storage(config)?;
            let embedder = EmbeddingService::from_config(&config.embedding)
                .context("failed to create embedding service")?;
            cmd_reembed(&storage, &embedder, dry_run).await
        }
        Cli::History { limit, clear, json } => {
            let storage = make_storage(config)?;
            cmd_history(&storage, limit, clear, json).await
        }
        Cli::Status => {
            let storage = make_storage(config)?;
            cmd_status(&storage, config).await
        }
    }
}

fn make_storage(config: &LedgerConfig) -> Result<Arc<SqliteStorage>> {
    let storage = create_backend(config).context("failed to open ledger database")?;
    Ok(Arc::new(storage))
}

fn build_assistant(config: &LedgerConfig, storage: Arc<SqliteStorage>) -> Result<Assistant> {
    let model = LlmService::from_config(&config.llm).context("failed to create language model")?;
    let embedder = EmbeddingService::from_config(&config.embedding)
        .context("failed to create embedding service")?;
    let retriever = VectorStore::new(Arc::clone(&storage));
    Ok(ExpenseAssistant::new(
        model,
        storage,
        retriever,
        embedder,
        AssistantSettings::from_config(config),
    ))
}

/// Turn an unreachable Ollama into an actionable message.
fn format_model_error(err: &anyhow::Error, config: &LedgerConfig) -> String {
    let msg = format!("{err:#}");
    let unreachable = msg.contains("Connection refused")
        || msg.contains("connection refused")
        || msg.contains("error sending request")
        || msg.contains("dns error");
    if !unreachable || config.llm.provider != "ollama" {
        return format!("{err}");
    }

    let url = config
        .llm
        .base_url
        .as_deref()
        .unwrap_or("http://localhost:11434");
    format!(
        "{} cannot reach Ollama at {}\n\n  Start it with:  {}\n  Or set a hosted provider under {} in .ledger/config.toml",
        "Error:".red().bold(),
        url.cyan(),
        "ollama serve".cyan(),
        "[llm]".cyan(),
    )
}

fn current_month() -> String {
    chrono::Utc::now().format("%Y-%m").to_string()
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}

/// Text embedded for expenses that were not entered through chat.
fn embedding_text(description: &str, merchant: Option<&str>, category: &str) -> String {
    [Some(description), merchant, Some(category)]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

fn cmd_init(llm_provider: &str, embedding_provider: &str) -> Result<()> {
    if !VALID_LLM_PROVIDERS.contains(&llm_provider) {
        anyhow::bail!(
            "unknown LLM provider '{}'. Valid options: {}",
            llm_provider,
            VALID_LLM_PROVIDERS.join(", ")
        );
    }
    if !VALID_PROVIDERS.contains(&embedding_provider) {
        anyhow::bail!(
            "unknown embedding provider '{}'. Valid options: {}",
            embedding_provider,
            VALID_PROVIDERS.join(", ")
        );
    }

    let cwd = std::env::current_dir()?;
    let ledger_dir = cwd.join(".ledger");
    if ledger_dir.join("config.toml").exists() {
        println!("Ledger already initialized in this directory.");
        return Ok(());
    }
    std::fs::create_dir_all(&ledger_dir)?;

    let mut config = LedgerConfig::default_config();
    config.llm.provider = llm_provider.to_string();
    let llm_note = match llm_provider {
        "ollama" => "# Requires Ollama running locally; the model is pulled on first use\n",
        "openai" => {
            config.llm.model = "gpt-4o-mini".into();
            "# Set OPENAI_API_KEY env var\n"
        }
        "gemini" => {
            config.llm.model = "gemini-2.0-flash".into();
            "# Set GEMINI_API_KEY env var\n"
        }
        _ => {
            config.llm.model = "claude-3-5-haiku-latest".into();
            "# Set ANTHROPIC_API_KEY env var\n"
        }
    };

    config.embedding.provider = embedding_provider.to_string();
    config.embedding.model = match embedding_provider {
        "ollama" => "nomic-embed-text".into(),
        "openai" => "text-embedding-3-small".into(),
        "hash" => "hash-128d".into(),
        _ => "random-128d".into(),
    };

    let toml_str = format!("{llm_note}{}", toml::to_string_pretty(&config)?);
    std::fs::write(ledger_dir.join("config.toml"), toml_str)?;

    let gitignore_path = cwd.join(".gitignore");
    let entry = ".ledger/config.local.toml";
    if gitignore_path.exists() {
        let contents = std::fs::read_to_string(&gitignore_path)?;
        if !contents.lines().any(|l| l.trim() == entry) {
            let mut appended = contents;
            if !appended.ends_with('\n') {
                appended.push('\n');
            }
            appended.push_str(entry);
            appended.push('\n');
            std::fs::write(&gitignore_path, appended)?;
        }
    } else {
        std::fs::write(&gitignore_path, format!("{entry}\n"))?;
    }

    println!("{}", "Initialized Ledger in .ledger/".green());
    println!("  {}     .ledger/config.toml", "Config:".dimmed());
    println!("  {}        {}", "LLM:".dimmed(), llm_provider.cyan());
    println!("  {}  {}", "Embedding:".dimmed(), embedding_provider.cyan());
    println!(
        "  {}",
        "Edit .ledger/config.local.toml for local overrides (gitignored)".dimmed()
    );
    println!();
    println!("{}", "Quick Start:".bold());
    println!("  1. Log an expense:  {}", "ledger ask spent 15 on lunch".cyan());
    println!("  2. Start a chat:    {}", "ledger chat".cyan());
    Ok(())
}

// ---------------------------------------------------------------------------
// ask / add
// ---------------------------------------------------------------------------

async fn cmd_ask(
    config: &LedgerConfig,
    storage: Arc<SqliteStorage>,
    text: &str,
    json: bool,
) -> Result<()> {
    let assistant = build_assistant(config, Arc::clone(&storage))?;
    assistant
        .model()
        .prepare()
        .await
        .context("language model is not available")?;

    let currency = config.currency.currency();
    let user = ChatMessage::user(text);
    let response = assistant.ask(text).await?;
    let reply = ChatMessage::from_response(&response, currency);

    if config.assistant.persist_messages {
        chat::persist_exchange(&storage, &user, &reply).await;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        chat::print_message(&reply);
        if let AiResponse::Transaction { data } = &response {
            if let Some(budget) = &data.budget {
                chat::print_budget(&data.category, budget, currency);
            }
        }
    }
    Ok(())
}

struct ManualExpense {
    amount: f64,
    category: Option<String>,
    merchant: Option<String>,
    description: String,
    date: Option<String>,
}

async fn cmd_add(
    storage: &SqliteStorage,
    config: &LedgerConfig,
    input: ManualExpense,
    json: bool,
) -> Result<()> {
    let categories = storage.list_categories().await?;
    let category = match input.category {
        Some(name) => resolve_manual_category(&name, &categories, config)?,
        None => config.assistant.fallback_category.clone(),
    };

    let merchant = input
        .merchant
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty());
    let mut expense =
        NewExpense::new(input.amount, category, input.description).with_merchant(merchant);
    if let Some(date) = input.date {
        expense = expense.with_date(date);
    }
    expense.validate()?;

    let embedder = EmbeddingService::from_config(&config.embedding)
        .context("failed to create embedding service")?;
    let text = embedding_text(
        &expense.description,
        expense.merchant.as_deref(),
        &expense.category,
    );
    match embedder.embed(&text).await {
        Ok(vector) => expense = expense.with_embedding(vector),
        Err(e) => tracing::warn!(error = %e, "embedding failed, saving expense without one"),
    }

    let id = storage
        .insert_expense(&expense)
        .await
        .context("failed to save expense")?;
    let stored = storage.get_expense(id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stored)?);
        return Ok(());
    }

    let currency = config.currency.currency();
    println!(
        "{} {} - {} ({})",
        "Saved:".green(),
        stored.display_merchant(),
        currency.format_amount(stored.amount),
        stored.category.magenta()
    );
    println!("  {} {}", "ID:".dimmed(), id.to_string().cyan());

    if let Some(limit) = storage.category_budget_limit(&stored.category).await? {
        let spend = storage.month_to_date_spend(&stored.category).await?;
        chat::print_budget(&stored.category, &BudgetStatus::new(limit, spend), currency);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// list / recategorize / categories
// ---------------------------------------------------------------------------

async fn cmd_list(
    storage: &SqliteStorage,
    config: &LedgerConfig,
    filter: &ExpenseFilter,
    json: bool,
) -> Result<()> {
    let expenses = storage
        .list_expenses(filter)
        .await
        .context("failed to list expenses")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&expenses)?);
        return Ok(());
    }

    if expenses.is_empty() {
        println!("No expenses found.");
        return Ok(());
    }

    let currency = config.currency.currency();
    println!(
        "  {}  {}  {}  {}  {}",
        format!("{:>5}", "ID").dimmed(),
        format!("{:<10}", "Date").dimmed(),
        format!("{:>12}", "Amount").dimmed(),
        format!("{:<14}", "Category").dimmed(),
        "Merchant / Description".dimmed(),
    );
    println!("{}", "─".repeat(78).dimmed());

    for expense in &expenses {
        let date = expense.date.get(..10).unwrap_or(&expense.date);
        let label = match (&expense.merchant, expense.description.is_empty()) {
            (Some(m), false) => format!("{m} · {}", expense.description),
            (Some(m), true) => m.clone(),
            (None, _) => expense.description.clone(),
        };
        println!(
            "  {}  {:<10}  {:>12}  {}  {}",
            format!("{:>5}", expense.id).cyan(),
            date,
            currency.format_amount(expense.amount),
            format!("{:<14}", truncate(&expense.category, 14)).magenta(),
            truncate(&label, 36),
        );
    }

    let total: f64 = expenses.iter().map(|e| e.amount).sum();
    println!("{}", "─".repeat(78).dimmed());
    println!(
        "  {} expense{}, {} total",
        expenses.len(),
        if expenses.len() == 1 { "" } else { "s" },
        currency.format_amount(total).bold()
    );
    Ok(())
}

/// Canonical name of a category typed on the command line. Unknown names are
/// kept unless `assistant.strict_categories` is set.
fn resolve_manual_category(
    name: &str,
    categories: &[Category],
    config: &LedgerConfig,
) -> Result<String> {
    match Category::find_by_name(categories, name) {
        Some(found) => Ok(found.name.clone()),
        None if config.assistant.strict_categories => {
            anyhow::bail!("unknown category '{name}' (see `ledger categories`)")
        }
        None => Ok(name.trim().to_string()),
    }
}

/// `Some("")` clears an optional field, `Some(x)` sets it, `None` keeps it.
fn clearable(value: Option<String>) -> Option<Option<String>> {
    value.map(|v| {
        let v = v.trim().to_string();
        (!v.is_empty()).then_some(v)
    })
}

async fn cmd_edit(
    storage: &SqliteStorage,
    config: &LedgerConfig,
    id: i64,
    input: &UpdateExpenseInput,
    json: bool,
) -> Result<()> {
    if input.is_empty() {
        anyhow::bail!("nothing to change for expense {id} (see `ledger edit --help`)");
    }
    input.validate()?;

    let updated = storage
        .update_expense(id, input)
        .await
        .with_context(|| format!("failed to update expense {id}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&updated)?);
        return Ok(());
    }

    let currency = config.currency.currency();
    println!(
        "{} expense {}: {} - {} ({}) on {}",
        "Updated".green(),
        id.to_string().cyan(),
        updated.display_merchant(),
        currency.format_amount(updated.amount),
        updated.category.magenta(),
        updated.date.get(..10).unwrap_or(&updated.date)
    );
    Ok(())
}

async fn cmd_recategorize(storage: &SqliteStorage, id: i64, category: &str) -> Result<()> {
    let categories = storage.list_categories().await?;
    let Some(target) = Category::find_by_name(&categories, category) else {
        anyhow::bail!("unknown category '{category}' (see `ledger categories`)");
    };

    let before = storage
        .get_expense(id)
        .await
        .with_context(|| format!("expense {id} not found"))?;
    let updated = storage
        .update_expense(id, &UpdateExpenseInput::recategorize(&target.name))
        .await
        .context("failed to update expense")?;

    println!(
        "{} expense {}: {} -> {}",
        "Recategorized".green(),
        id.to_string().cyan(),
        before.category.dimmed(),
        updated.category.magenta()
    );
    Ok(())
}

async fn cmd_categories(storage: &SqliteStorage, json: bool) -> Result<()> {
    let categories = storage.list_categories().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&categories)?);
        return Ok(());
    }

    for category in &categories {
        println!(
            "  {}  {} {}  {}",
            format!("{:>3}", category.id).cyan(),
            category.emoji,
            format!("{:<16}", category.name).bold(),
            category.color.dimmed()
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// budget / income
// ---------------------------------------------------------------------------

/// "global" (any case) names the overall monthly budget; other names are
/// matched against the category table.
fn budget_category(name: &str, categories: &[Category]) -> String {
    if name.trim().eq_ignore_ascii_case("global") || name == GLOBAL_BUDGET_CATEGORY_NAME {
        return GLOBAL_BUDGET_CATEGORY_NAME.to_string();
    }
    Category::find_by_name(categories, name)
        .map(|c| c.name.clone())
        .unwrap_or_else(|| name.trim().to_string())
}

async fn cmd_budget(
    storage: &SqliteStorage,
    config: &LedgerConfig,
    action: BudgetCommand,
) -> Result<()> {
    let currency = config.currency.currency();
    match action {
        BudgetCommand::Set { category, amount } => {
            let categories = storage.list_categories().await?;
            let name = budget_category(&category, &categories);
            storage
                .set_budget(&name, amount)
                .await
                .context("failed to set budget")?;
            println!(
                "{} {} budget to {}",
                "Set".green(),
                display_budget_name(&name).bold(),
                currency.format_amount(amount)
            );
            Ok(())
        }
        BudgetCommand::Remove { category } => {
            let categories = storage.list_categories().await?;
            let name = budget_category(&category, &categories);
            storage
                .delete_budget(&name)
                .await
                .with_context(|| format!("no budget for '{category}'"))?;
            println!(
                "{} {} budget",
                "Removed".green(),
                display_budget_name(&name).bold()
            );
            Ok(())
        }
        BudgetCommand::Show { json } => {
            let budgets = storage.list_budgets().await?;
            let spends: HashMap<String, f64> = storage
                .spend_by_category(&current_month())
                .await?
                .into_iter()
                .collect();
            let overview = BudgetOverview::calculate(&budgets, &spends);

            let rows: Vec<(&Budget, f64)> = budgets
                .iter()
                .map(|b| {
                    let spent = if b.is_global() {
                        spends.values().sum::<f64>()
                    } else {
                        spends.get(&b.category).copied().unwrap_or(0.0)
                    };
                    (b, spent)
                })
                .collect();

            if json {
                let items: Vec<serde_json::Value> = rows
                    .iter()
                    .map(|(b, spent)| {
                        serde_json::json!({
                            "category": b.category,
                            "amount": b.amount,
                            "period": b.period,
                            "spent": spent,
                            "remaining": b.amount - spent,
                        })
                    })
                    .collect();
                let out = serde_json::json!({ "budgets": items, "overview": overview });
                println!("{}", serde_json::to_string_pretty(&out)?);
                return Ok(());
            }

            if rows.is_empty() {
                println!("No budgets set. Try: {}", "ledger budget set Food 300".cyan());
                return Ok(());
            }

            for (budget, spent) in &rows {
                let status = BudgetStatus::new(budget.amount, *spent);
                let remaining = currency.format_amount(status.remaining);
                println!(
                    "  {}  {} / {}  {}",
                    format!("{:<16}", display_budget_name(&budget.category)).bold(),
                    currency.format_amount(*spent),
                    currency.format_amount(budget.amount),
                    if status.is_over() {
                        format!("{remaining} over").red().to_string()
                    } else {
                        format!("{remaining} left").green().to_string()
                    }
                );
            }
            println!();
            print_overview(&overview, currency);
            Ok(())
        }
    }
}

fn display_budget_name(name: &str) -> &str {
    if name == GLOBAL_BUDGET_CATEGORY_NAME {
        "Overall"
    } else {
        name
    }
}

fn print_overview(overview: &BudgetOverview, currency: &Currency) {
    let pct = format!("{:.0}%", overview.percentage);
    let pct = match overview.health() {
        BudgetHealth::OnTrack => pct.green().to_string(),
        BudgetHealth::Warning => pct.yellow().to_string(),
        BudgetHealth::Over => pct.red().to_string(),
    };
    println!(
        "  {}  {} of {} spent ({}), {} remaining",
        "This month:".dimmed(),
        currency.format_amount(overview.total_spent),
        currency.format_amount(overview.total_budget),
        pct,
        currency.format_amount(overview.remaining)
    );
}

async fn cmd_income(
    storage: &SqliteStorage,
    config: &LedgerConfig,
    action: IncomeCommand,
) -> Result<()> {
    let currency = config.currency.currency();
    match action {
        IncomeCommand::Add {
            amount,
            kind,
            description,
            date,
        } => {
            let income = NewIncome {
                amount,
                description,
                kind,
                date: date.unwrap_or_else(now_iso),
            };
            let id = storage
                .insert_income(&income)
                .await
                .context("failed to record income")?;
            println!(
                "{} {} income of {} ({})",
                "Recorded".green(),
                income.kind.magenta(),
                currency.format_amount(income.amount),
                id.to_string().cyan()
            );
            Ok(())
        }
        IncomeCommand::List { json } => {
            let incomes = storage.list_incomes().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&incomes)?);
                return Ok(());
            }
            if incomes.is_empty() {
                println!("No income recorded.");
                return Ok(());
            }
            for income in &incomes {
                println!(
                    "  {}  {:<10}  {:>12}  {}  {}",
                    format!("{:>5}", income.id).cyan(),
                    income.date.get(..10).unwrap_or(&income.date),
                    currency.format_amount(income.amount),
                    format!("{:<12}", income.kind).magenta(),
                    income.description,
                );
            }
            let total: f64 = incomes.iter().map(|i| i.amount).sum();
            println!("  {} {}", "Total:".dimmed(), currency.format_amount(total).bold());
            Ok(())
        }
        IncomeCommand::Delete { id } => {
            storage
                .delete_income(id)
                .await
                .with_context(|| format!("failed to delete income {id}"))?;
            println!("{} income {}", "Deleted".green(), id.to_string().cyan());
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// report
// ---------------------------------------------------------------------------

async fn cmd_report(
    storage: &SqliteStorage,
    config: &LedgerConfig,
    month: &str,
    json: bool,
) -> Result<()> {
    let report = report::monthly_report(storage, month)
        .await
        .with_context(|| format!("failed to build report for {month}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    print_report(&report, config.currency.currency());
    Ok(())
}

fn print_report(report: &MonthlyReport, currency: &Currency) {
    println!("{}", format!("Report for {}", report.month).bold());
    println!(
        "  {} {}",
        "Expenses:".dimmed(),
        report.expense_count.to_string().cyan()
    );
    print_overview(&report.overview, currency);

    if report.categories.is_empty() {
        println!();
        println!("No expenses this month.");
        return;
    }

    println!();
    println!("{}", "By category".bold());
    for slice in &report.categories {
        let bar = "█".repeat((slice.percentage / 5.0).round() as usize);
        println!(
            "  {}  {:>12}  {:>5.1}%  {}",
            format!("{:<16}", truncate(&slice.category, 16)).magenta(),
            currency.format_amount(slice.total),
            slice.percentage,
            bar.dimmed()
        );
    }

    println!();
    println!("{}", "Top merchants".bold());
    for merchant in &report.merchants {
        println!(
            "  {}  {:>12}  {}",
            format!("{:<20}", truncate(&merchant.name, 20)),
            currency.format_amount(merchant.amount),
            format!("×{}", merchant.count).dimmed()
        );
    }

    println!();
    println!("{}", "Daily".bold());
    let peak = report
        .daily
        .iter()
        .map(|d| d.total)
        .fold(0.0_f64, f64::max);
    for day in report.daily.iter().filter(|d| d.total > 0.0) {
        let width = if peak > 0.0 {
            ((day.total / peak) * 30.0).round() as usize
        } else {
            0
        };
        println!(
            "  {:>2}  {:>12}  {}",
            day.day,
            currency.format_amount(day.total),
            "▇".repeat(width.max(1)).cyan()
        );
    }
}

// ---------------------------------------------------------------------------
// reembed
// ---------------------------------------------------------------------------

async fn cmd_reembed(
    storage: &SqliteStorage,
    embedder: &EmbeddingService,
    dry_run: bool,
) -> Result<()> {
    let missing = storage
        .expenses_missing_embedding()
        .await
        .context("failed to load expenses")?;

    if missing.is_empty() {
        println!("Every expense already has an embedding.");
        return Ok(());
    }

    println!(
        "{} {} expense{} without embedding ({})",
        if dry_run { "Would embed" } else { "Embedding" },
        missing.len().to_string().cyan(),
        if missing.len() == 1 { "" } else { "s" },
        embedder.model_id().dimmed()
    );
    if dry_run {
        return Ok(());
    }

    let (mut embedded, mut failed) = (0usize, 0usize);
    for expense in &missing {
        let text = embedding_text(
            &expense.description,
            expense.merchant.as_deref(),
            &expense.category,
        );
        let vector = match embedder.embed(&text).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(expense_id = expense.id, error = %e, "embedding failed");
                failed += 1;
                continue;
            }
        };
        match storage.update_expense_embedding(expense.id, &vector).await {
            Ok(()) => embedded += 1,
            Err(e) => {
                tracing::warn!(expense_id = expense.id, error = %e, "failed to store embedding");
                failed += 1;
            }
        }
    }

    println!(
        "  {} embedded, {} failed",
        embedded.to_string().green(),
        if failed > 0 {
            failed.to_string().red().to_string()
        } else {
            failed.to_string()
        }
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// history / status
// ---------------------------------------------------------------------------

async fn cmd_history(storage: &SqliteStorage, limit: usize, clear: bool, json: bool) -> Result<()> {
    if clear {
        let removed = storage.clear_messages().await?;
        println!("{} {} message{}", "Cleared".green(), removed, if removed == 1 { "" } else { "s" });
        return Ok(());
    }

    let messages = storage.recent_messages(limit).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&messages)?);
        return Ok(());
    }
    if messages.is_empty() {
        println!("No saved messages.");
        return Ok(());
    }
    for message in &messages {
        print!("{} ", message.created_at.format("%Y-%m-%d %H:%M").to_string().dimmed());
        chat::print_message(message);
    }
    Ok(())
}

async fn cmd_status(storage: &SqliteStorage, config: &LedgerConfig) -> Result<()> {
    let version = env!("CARGO_PKG_VERSION");
    println!("{}", format!("Ledger Status v{version}").bold());
    println!(
        "  {}   {} (schema v{})",
        "Database:".dimmed(),
        storage.path().display(),
        storage.schema_version()?
    );

    let expenses = storage.list_expenses(&ExpenseFilter::default()).await?;
    let missing = storage.expenses_missing_embedding().await?;
    let categories = storage.list_categories().await?;
    let budgets = storage.list_budgets().await?;
    println!(
        "  {}   {} ({} without embedding)",
        "Expenses:".dimmed(),
        expenses.len().to_string().cyan(),
        missing.len()
    );
    println!(
        "  {} {}",
        "Categories:".dimmed(),
        categories.len().to_string().cyan()
    );
    println!(
        "  {}    {}",
        "Budgets:".dimmed(),
        budgets.len().to_string().cyan()
    );
    println!(
        "  {}   {}",
        "Currency:".dimmed(),
        config.currency.currency().code
    );

    println!(
        "  {}        {} ({})",
        "LLM:".dimmed(),
        config.llm.provider.cyan(),
        config.llm.model
    );
    match EmbeddingService::from_config(&config.embedding) {
        Ok(embedder) => println!(
            "  {}  {} ({}, {}d)",
            "Embedding:".dimmed(),
            embedder.provider_name().cyan(),
            embedder.model_id(),
            embedder.dimensions()
        ),
        Err(e) => println!("  {}  {} - {}", "Embedding:".dimmed(), "unavailable".red(), e),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_text_skips_blanks() {
        assert_eq!(
            embedding_text("lunch", Some("Chipotle"), "Food"),
            "lunch Chipotle Food"
        );
        assert_eq!(embedding_text("", None, "Food"), "Food");
        assert_eq!(embedding_text("  ", Some(" "), "Other"), "Other");
    }

    #[test]
    fn test_budget_category_global_alias() {
        let categories = vec![Category {
            id: 1,
            name: "Food".into(),
            emoji: "🍔".into(),
            color: "#FF6B6B".into(),
        }];
        assert_eq!(budget_category("global", &categories), GLOBAL_BUDGET_CATEGORY_NAME);
        assert_eq!(budget_category("GLOBAL", &categories), GLOBAL_BUDGET_CATEGORY_NAME);
        assert_eq!(budget_category("food", &categories), "Food");
        assert_eq!(budget_category("Pets", &categories), "Pets");
    }

    #[test]
    fn test_clearable() {
        assert_eq!(clearable(None), None);
        assert_eq!(clearable(Some("".into())), Some(None));
        assert_eq!(clearable(Some("  ".into())), Some(None));
        assert_eq!(
            clearable(Some(" Chipotle ".into())),
            Some(Some("Chipotle".to_string()))
        );
    }

    #[test]
    fn test_cli_parses_edit_flags() {
        let cli = Cli::try_parse_from([
            "ledger", "edit", "7", "--amount", "12.5", "--merchant", "", "--date", "2025-05-02",
        ])
        .unwrap();
        match cli {
            Cli::Edit {
                id,
                amount,
                merchant,
                date,
                description,
                ..
            } => {
                assert_eq!(id, 7);
                assert_eq!(amount, Some(12.5));
                assert_eq!(merchant.as_deref(), Some(""));
                assert_eq!(date.as_deref(), Some("2025-05-02"));
                assert_eq!(description, None);
            }
            _ => panic!("expected edit"),
        }
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a very long merchant", 8), "a very …");
    }

    #[test]
    fn test_cli_parses_nested_budget() {
        let cli = Cli::try_parse_from(["ledger", "budget", "set", "Food", "300"]).unwrap();
        match cli {
            Cli::Budget {
                action: BudgetCommand::Set { category, amount },
            } => {
                assert_eq!(category, "Food");
                assert_eq!(amount, 300.0);
            }
            _ => panic!("expected budget set"),
        }
    }

    #[test]
    fn test_cli_ask_joins_words() {
        let cli = Cli::try_parse_from(["ledger", "ask", "spent", "15", "on", "lunch"]).unwrap();
        match cli {
            Cli::Ask { text, json } => {
                assert_eq!(text.join(" "), "spent 15 on lunch");
                assert!(!json);
            }
            _ => panic!("expected ask"),
        }
    }
}
