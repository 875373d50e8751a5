use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use super::backend::LedgerStore;
use crate::error::{LedgerError, Result};
use crate::model::*;

/// Bumped whenever `create_tables` changes shape.
pub const SCHEMA_VERSION: i32 = 1;

const EXPENSE_COLUMNS: &str =
    "id, amount, description, category, merchant, date, receipt_image_uri, created_at, updated_at";

/// SQLite-backed ledger storage.
///
/// Uses a single `Connection` behind `Arc<Mutex<>>` so it can be shared
/// across async tasks.  All blocking SQLite calls go through
/// [`with_conn`](Self::with_conn) which runs them on the Tokio blocking
/// thread-pool.
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteStorage {
    /// Open (or create) a file-backed SQLite database at `path`.
    ///
    /// Sets WAL journal mode and enables foreign keys, then creates all
    /// tables and seeds the predefined categories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    LedgerError::Storage(format!("failed to create {}: {e}", parent.display()))
                })?;
            }
        }
        let conn = Connection::open(&path)
            .map_err(|e| LedgerError::storage("open SQLite database", e))?;

        Self::configure_and_init(conn, path)
    }

    /// Open an in-memory SQLite database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| LedgerError::storage("open in-memory SQLite database", e))?;

        Self::configure_and_init(conn, PathBuf::from(":memory:"))
    }

    /// Return the path this database was opened with (`:memory:` for in-memory).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `PRAGMA user_version` of the open database.
    pub fn schema_version(&self) -> Result<i32> {
        let conn = self.lock()?;
        conn.query_row("PRAGMA user_version", [], |row| row.get(0))
            .map_err(|e| LedgerError::storage("read schema version", e))
    }

    // ── helpers ────────────────────────────────────────────────────────

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| LedgerError::Storage(format!("failed to acquire database lock: {e}")))
    }

    fn configure_and_init(conn: Connection, path: PathBuf) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(|e| LedgerError::storage("set WAL mode", e))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| LedgerError::storage("enable foreign keys", e))?;

        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        };

        storage.create_tables()?;
        storage.seed_categories()?;
        Ok(storage)
    }

    /// Create all tables and indexes (idempotent).
    fn create_tables(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                emoji TEXT NOT NULL,
                color TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS expenses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                amount REAL NOT NULL,
                description TEXT NOT NULL,
                category TEXT NOT NULL,
                merchant TEXT,
                date TEXT NOT NULL,
                receipt_image_uri TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                embedding TEXT
            );

            CREATE TABLE IF NOT EXISTS budgets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                category TEXT NOT NULL UNIQUE,
                amount REAL NOT NULL,
                period TEXT NOT NULL DEFAULT 'monthly',
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS incomes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                amount REAL NOT NULL,
                description TEXT NOT NULL,
                type TEXT NOT NULL,
                date TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                sender TEXT NOT NULL,
                type TEXT NOT NULL,
                data TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_expenses_date ON expenses(date DESC);
            CREATE INDEX IF NOT EXISTS idx_expenses_category ON expenses(category);
            CREATE INDEX IF NOT EXISTS idx_messages_created_at ON messages(created_at);
            ",
        )
        .map_err(|e| LedgerError::storage("create tables", e))?;

        conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))
            .map_err(|e| LedgerError::storage("set schema version", e))?;

        Ok(())
    }

    fn seed_categories(&self) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| LedgerError::storage("begin seed transaction", e))?;
        for (name, emoji, color) in PREDEFINED_CATEGORIES {
            tx.execute(
                "INSERT OR IGNORE INTO categories (name, emoji, color) VALUES (?1, ?2, ?3)",
                params![name, emoji, color],
            )
            .map_err(|e| LedgerError::storage("seed categories", e))?;
        }
        tx.commit()
            .map_err(|e| LedgerError::storage("commit seeded categories", e))
    }

    /// Run a blocking closure against the SQLite connection on the Tokio
    /// blocking thread-pool.  This is the primary way trait methods
    /// interact with the database.
    pub(crate) async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|e| {
                LedgerError::Storage(format!("failed to acquire database lock: {e}"))
            })?;
            f(&conn)
        })
        .await
        .map_err(|e| LedgerError::Storage(format!("task join error: {e}")))?
    }
}

fn row_to_expense(row: &Row<'_>) -> rusqlite::Result<Expense> {
    Ok(Expense {
        id: row.get(0)?,
        amount: row.get(1)?,
        description: row.get(2)?,
        category: row.get(3)?,
        merchant: row.get(4)?,
        date: row.get(5)?,
        receipt_image_uri: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn fetch_expense(conn: &Connection, id: i64) -> Result<Expense> {
    conn.query_row(
        &format!("SELECT {EXPENSE_COLUMNS} FROM expenses WHERE id = ?1"),
        params![id],
        row_to_expense,
    )
    .optional()
    .map_err(|e| LedgerError::storage("fetch expense", e))?
    .ok_or_else(|| LedgerError::NotFound(format!("expense {id}")))
}

fn query_expenses(conn: &Connection, sql: &str, args: &[String]) -> Result<Vec<Expense>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| LedgerError::storage("prepare expense query", e))?;
    let rows = stmt
        .query_map(params_from_iter(args.iter()), row_to_expense)
        .map_err(|e| LedgerError::storage("query expenses", e))?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| LedgerError::storage("read expense row", e))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LedgerError::Storage(format!("invalid timestamp '{raw}': {e}")))
}

fn current_month() -> String {
    Utc::now().format("%Y-%m").to_string()
}

fn ensure_changed(changed: usize, what: String) -> Result<()> {
    if changed == 0 {
        Err(LedgerError::NotFound(what))
    } else {
        Ok(())
    }
}

impl LedgerStore for SqliteStorage {
    async fn insert_expense(&self, expense: &NewExpense) -> Result<i64> {
        expense.validate()?;
        let expense = expense.clone();
        let embedding = expense
            .embedding
            .as_deref()
            .map(serde_json::to_string)
            .transpose()?;

        self.with_conn(move |conn| {
            let now = now_iso();
            conn.execute(
                "INSERT INTO expenses
                    (amount, description, category, merchant, date, receipt_image_uri,
                     created_at, updated_at, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?8)",
                params![
                    expense.amount,
                    expense.description,
                    expense.category,
                    expense.merchant,
                    expense.date,
                    expense.receipt_image_uri,
                    now,
                    embedding,
                ],
            )
            .map_err(|e| LedgerError::storage("insert expense", e))?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn get_expense(&self, id: i64) -> Result<Expense> {
        self.with_conn(move |conn| fetch_expense(conn, id)).await
    }

    async fn list_expenses(&self, filter: &ExpenseFilter) -> Result<Vec<Expense>> {
        let filter = filter.clone();
        self.with_conn(move |conn| {
            let mut sql = format!("SELECT {EXPENSE_COLUMNS} FROM expenses WHERE 1=1");
            let mut args = Vec::new();

            if let Some(category) = filter.category {
                args.push(category);
                sql.push_str(&format!(" AND category = ?{}", args.len()));
            }
            if let Some(start) = filter.start_date {
                args.push(start);
                sql.push_str(&format!(" AND substr(date, 1, 10) >= ?{}", args.len()));
            }
            if let Some(end) = filter.end_date {
                args.push(end);
                sql.push_str(&format!(" AND substr(date, 1, 10) <= ?{}", args.len()));
            }
            sql.push_str(" ORDER BY date DESC, created_at DESC, id DESC");
            if let Some(limit) = filter.limit {
                sql.push_str(&format!(" LIMIT {limit}"));
            }

            query_expenses(conn, &sql, &args)
        })
        .await
    }

    async fn update_expense(&self, id: i64, input: &UpdateExpenseInput) -> Result<Expense> {
        input.validate()?;
        let input = input.clone();
        self.with_conn(move |conn| {
            let mut expense = fetch_expense(conn, id)?;
            if let Some(amount) = input.amount {
                expense.amount = amount;
            }
            if let Some(description) = input.description {
                expense.description = description;
            }
            if let Some(category) = input.category {
                expense.category = category;
            }
            if let Some(merchant) = input.merchant {
                expense.merchant = merchant;
            }
            if let Some(date) = input.date {
                expense.date = date;
            }
            if let Some(uri) = input.receipt_image_uri {
                expense.receipt_image_uri = uri;
            }
            expense.updated_at = now_iso();

            conn.execute(
                "UPDATE expenses
                 SET amount = ?1, description = ?2, category = ?3, merchant = ?4,
                     date = ?5, receipt_image_uri = ?6, updated_at = ?7
                 WHERE id = ?8",
                params![
                    expense.amount,
                    expense.description,
                    expense.category,
                    expense.merchant,
                    expense.date,
                    expense.receipt_image_uri,
                    expense.updated_at,
                    id,
                ],
            )
            .map_err(|e| LedgerError::storage("update expense", e))?;
            Ok(expense)
        })
        .await
    }

    async fn delete_expense(&self, id: i64) -> Result<()> {
        self.with_conn(move |conn| {
            let changed = conn
                .execute("DELETE FROM expenses WHERE id = ?1", params![id])
                .map_err(|e| LedgerError::storage("delete expense", e))?;
            ensure_changed(changed, format!("expense {id}"))
        })
        .await
    }

    async fn update_expense_embedding(&self, id: i64, vector: &[f32]) -> Result<()> {
        let serialized = serde_json::to_string(vector)?;
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE expenses SET embedding = ?1 WHERE id = ?2",
                    params![serialized, id],
                )
                .map_err(|e| LedgerError::storage("update expense embedding", e))?;
            ensure_changed(changed, format!("expense {id}"))
        })
        .await
    }

    async fn expenses_with_embedding(&self) -> Result<Vec<EmbeddedExpense>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {EXPENSE_COLUMNS}, embedding FROM expenses WHERE embedding IS NOT NULL"
                ))
                .map_err(|e| LedgerError::storage("prepare embedding scan", e))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(EmbeddedExpense {
                        expense: row_to_expense(row)?,
                        embedding: row.get(9)?,
                    })
                })
                .map_err(|e| LedgerError::storage("scan embeddings", e))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| LedgerError::storage("read embedding row", e))
        })
        .await
    }

    async fn expenses_missing_embedding(&self) -> Result<Vec<Expense>> {
        self.with_conn(|conn| {
            query_expenses(
                conn,
                &format!(
                    "SELECT {EXPENSE_COLUMNS} FROM expenses WHERE embedding IS NULL ORDER BY id"
                ),
                &[],
            )
        })
        .await
    }

    async fn list_categories(&self) -> Result<Vec<Category>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, name, emoji, color FROM categories ORDER BY name")
                .map_err(|e| LedgerError::storage("prepare category query", e))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(Category {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        emoji: row.get(2)?,
                        color: row.get(3)?,
                    })
                })
                .map_err(|e| LedgerError::storage("query categories", e))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| LedgerError::storage("read category row", e))
        })
        .await
    }

    async fn add_category(&self, category: &NewCategory) -> Result<i64> {
        if category.name.trim().is_empty() {
            return Err(LedgerError::InvalidInput("category name cannot be empty".into()));
        }
        let category = category.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO categories (name, emoji, color) VALUES (?1, ?2, ?3)",
                params![category.name.trim(), category.emoji, category.color],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(ref err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    LedgerError::InvalidInput(format!(
                        "category '{}' already exists",
                        category.name.trim()
                    ))
                }
                other => LedgerError::storage("insert category", other),
            })?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn delete_category(&self, id: i64) -> Result<()> {
        self.with_conn(move |conn| {
            let changed = conn
                .execute("DELETE FROM categories WHERE id = ?1", params![id])
                .map_err(|e| LedgerError::storage("delete category", e))?;
            ensure_changed(changed, format!("category {id}"))
        })
        .await
    }

    async fn set_budget(&self, category: &str, amount: f64) -> Result<()> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(LedgerError::InvalidInput(format!(
                "budget must be a non-negative number, got {amount}"
            )));
        }
        let category = category.trim().to_string();
        if category.is_empty() {
            return Err(LedgerError::InvalidInput("budget category cannot be empty".into()));
        }
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO budgets (category, amount, period, updated_at)
                 VALUES (?1, ?2, 'monthly', ?3)
                 ON CONFLICT(category) DO UPDATE
                 SET amount = excluded.amount, updated_at = excluded.updated_at",
                params![category, amount, now_iso()],
            )
            .map_err(|e| LedgerError::storage("upsert budget", e))?;
            Ok(())
        })
        .await
    }

    async fn list_budgets(&self) -> Result<Vec<Budget>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, category, amount, period FROM budgets ORDER BY category")
                .map_err(|e| LedgerError::storage("prepare budget query", e))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(Budget {
                        id: row.get(0)?,
                        category: row.get(1)?,
                        amount: row.get(2)?,
                        period: row.get(3)?,
                    })
                })
                .map_err(|e| LedgerError::storage("query budgets", e))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| LedgerError::storage("read budget row", e))
        })
        .await
    }

    async fn delete_budget(&self, category: &str) -> Result<()> {
        let category = category.to_string();
        self.with_conn(move |conn| {
            let changed = conn
                .execute("DELETE FROM budgets WHERE category = ?1", params![category])
                .map_err(|e| LedgerError::storage("delete budget", e))?;
            ensure_changed(changed, format!("budget for '{category}'"))
        })
        .await
    }

    async fn category_budget_limit(&self, category: &str) -> Result<Option<f64>> {
        let category = category.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT amount FROM budgets WHERE category = ?1",
                params![category],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| LedgerError::storage("read budget limit", e))
        })
        .await
    }

    async fn month_to_date_spend(&self, category: &str) -> Result<f64> {
        let category = category.to_string();
        let month = current_month();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT COALESCE(SUM(amount), 0.0) FROM expenses
                 WHERE category = ?1 AND substr(date, 1, 7) = ?2",
                params![category, month],
                |row| row.get(0),
            )
            .map_err(|e| LedgerError::storage("sum month-to-date spend", e))
        })
        .await
    }

    async fn spend_by_category(&self, month: &str) -> Result<Vec<(String, f64)>> {
        let month = month.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT category, SUM(amount) AS total FROM expenses
                     WHERE substr(date, 1, 7) = ?1
                     GROUP BY category ORDER BY total DESC, category",
                )
                .map_err(|e| LedgerError::storage("prepare spend query", e))?;
            let rows = stmt
                .query_map(params![month], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(|e| LedgerError::storage("query spend by category", e))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| LedgerError::storage("read spend row", e))
        })
        .await
    }

    async fn insert_income(&self, income: &NewIncome) -> Result<i64> {
        if !income.amount.is_finite() || income.amount <= 0.0 {
            return Err(LedgerError::InvalidInput(format!(
                "amount must be a positive number, got {}",
                income.amount
            )));
        }
        let income = income.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO incomes (amount, description, type, date, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    income.amount,
                    income.description,
                    income.kind,
                    income.date,
                    now_iso()
                ],
            )
            .map_err(|e| LedgerError::storage("insert income", e))?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn list_incomes(&self) -> Result<Vec<Income>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, amount, description, type, date, created_at FROM incomes
                     ORDER BY date DESC, id DESC",
                )
                .map_err(|e| LedgerError::storage("prepare income query", e))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(Income {
                        id: row.get(0)?,
                        amount: row.get(1)?,
                        description: row.get(2)?,
                        kind: row.get(3)?,
                        date: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })
                .map_err(|e| LedgerError::storage("query incomes", e))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| LedgerError::storage("read income row", e))
        })
        .await
    }

    async fn delete_income(&self, id: i64) -> Result<()> {
        self.with_conn(move |conn| {
            let changed = conn
                .execute("DELETE FROM incomes WHERE id = ?1", params![id])
                .map_err(|e| LedgerError::storage("delete income", e))?;
            ensure_changed(changed, format!("income {id}"))
        })
        .await
    }

    async fn save_message(&self, message: &ChatMessage) -> Result<()> {
        let data = message.data.as_ref().map(serde_json::to_string).transpose()?;
        let message = message.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO messages (id, text, sender, type, data, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    message.id,
                    message.text,
                    message.sender.as_str(),
                    message.kind.as_str(),
                    data,
                    message.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| LedgerError::storage("save message", e))?;
            Ok(())
        })
        .await
    }

    async fn recent_messages(&self, limit: usize) -> Result<Vec<ChatMessage>> {
        let raw: Vec<(String, String, String, String, Option<String>, String)> = self
            .with_conn(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT id, text, sender, type, data, created_at FROM messages
                         ORDER BY created_at DESC, rowid DESC LIMIT ?1",
                    )
                    .map_err(|e| LedgerError::storage("prepare message query", e))?;
                let rows = stmt
                    .query_map(params![limit as i64], |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                        ))
                    })
                    .map_err(|e| LedgerError::storage("query messages", e))?;
                rows.collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| LedgerError::storage("read message row", e))
            })
            .await?;

        let mut messages = raw
            .into_iter()
            .map(|(id, text, sender, kind, data, created_at)| {
                Ok(ChatMessage {
                    id,
                    text,
                    sender: sender.parse().map_err(LedgerError::Storage)?,
                    kind: kind.parse().map_err(LedgerError::Storage)?,
                    data: data.as_deref().map(serde_json::from_str).transpose()?,
                    created_at: parse_timestamp(&created_at)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }

    async fn clear_messages(&self) -> Result<usize> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM messages", [])
                .map_err(|e| LedgerError::storage("clear messages", e))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn last_year_date() -> String {
        let last_year = Utc::now() - chrono::Duration::days(400);
        last_year.to_rfc3339()
    }

    #[test]
    fn open_in_memory_creates_tables() {
        let storage = SqliteStorage::open_in_memory().expect("should open in-memory DB");
        assert_eq!(storage.path().to_str().unwrap(), ":memory:");

        let conn = storage.conn.lock().unwrap();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for table in ["categories", "expenses", "budgets", "incomes", "messages"] {
            assert!(tables.contains(&table.to_string()), "missing table {table}");
        }
    }

    #[test]
    fn create_tables_is_idempotent() {
        let storage = SqliteStorage::open_in_memory().expect("should open in-memory DB");
        storage.create_tables().expect("idempotent create_tables");
        storage.seed_categories().expect("idempotent seeding");
        assert_eq!(storage.schema_version().unwrap(), SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn seeds_predefined_categories_once() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage.seed_categories().unwrap();
        let categories = storage.list_categories().await.unwrap();
        assert_eq!(categories.len(), PREDEFINED_CATEGORIES.len());
        assert!(categories.iter().any(|c| c.name == "Food" && c.emoji == "🍔"));
    }

    #[tokio::test]
    async fn insert_and_get_expense() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let id = storage
            .insert_expense(
                &NewExpense::new(15.0, "Food", "Spent $15 on lunch")
                    .with_merchant(Some("Chipotle".into())),
            )
            .await
            .unwrap();

        let expense = storage.get_expense(id).await.unwrap();
        assert_eq!(expense.id, id);
        assert_eq!(expense.amount, 15.0);
        assert_eq!(expense.category, "Food");
        assert_eq!(expense.merchant.as_deref(), Some("Chipotle"));
        assert_eq!(expense.description, "Spent $15 on lunch");
        assert!(!expense.created_at.is_empty());
    }

    #[tokio::test]
    async fn insert_rejects_invalid_amount() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let err = storage
            .insert_expense(&NewExpense::new(-1.0, "Food", "refund?"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn get_missing_expense_is_not_found() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let err = storage.get_expense(404).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
        let err = storage.delete_expense(404).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[tokio::test]
    async fn embedding_written_at_insert_and_by_update() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let with = storage
            .insert_expense(&NewExpense::new(3.0, "Food", "a").with_embedding(vec![0.5, 0.25]))
            .await
            .unwrap();
        let without = storage
            .insert_expense(&NewExpense::new(4.0, "Food", "b"))
            .await
            .unwrap();

        let embedded = storage.expenses_with_embedding().await.unwrap();
        assert_eq!(embedded.len(), 1);
        assert_eq!(embedded[0].expense.id, with);
        assert_eq!(embedded[0].embedding, "[0.5,0.25]");

        let missing = storage.expenses_missing_embedding().await.unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].id, without);

        storage
            .update_expense_embedding(without, &[1.0, 0.0])
            .await
            .unwrap();
        assert_eq!(storage.expenses_with_embedding().await.unwrap().len(), 2);
        assert!(storage.expenses_missing_embedding().await.unwrap().is_empty());

        let err = storage
            .update_expense_embedding(999, &[1.0])
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[tokio::test]
    async fn recategorize_keeps_embedding() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let id = storage
            .insert_expense(&NewExpense::new(9.0, "Other", "bus").with_embedding(vec![0.1]))
            .await
            .unwrap();

        let updated = storage
            .update_expense(id, &UpdateExpenseInput::recategorize("Transport"))
            .await
            .unwrap();
        assert_eq!(updated.category, "Transport");
        assert_eq!(updated.amount, 9.0);

        let embedded = storage.expenses_with_embedding().await.unwrap();
        assert_eq!(embedded[0].expense.category, "Transport");
        assert_eq!(embedded[0].embedding, "[0.1]");
    }

    #[tokio::test]
    async fn list_expenses_filters_and_orders() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        for (amount, category, date) in [
            (10.0, "Food", "2025-01-05"),
            (20.0, "Transport", "2025-01-10"),
            (30.0, "Food", "2025-02-01"),
            (40.0, "Food", "2025-03-15"),
        ] {
            storage
                .insert_expense(&NewExpense::new(amount, category, "x").with_date(date))
                .await
                .unwrap();
        }

        let all = storage.list_expenses(&ExpenseFilter::default()).await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].amount, 40.0, "newest first");

        let food = storage
            .list_expenses(&ExpenseFilter {
                category: Some("Food".into()),
                start_date: Some("2025-01-06".into()),
                end_date: Some("2025-03-15".into()),
                limit: None,
            })
            .await
            .unwrap();
        let amounts: Vec<f64> = food.iter().map(|e| e.amount).collect();
        assert_eq!(amounts, vec![40.0, 30.0]);

        let limited = storage
            .list_expenses(&ExpenseFilter {
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn month_to_date_spend_counts_current_month_only() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage
            .insert_expense(&NewExpense::new(200.0, "Food", "groceries"))
            .await
            .unwrap();
        storage
            .insert_expense(&NewExpense::new(50.0, "Food", "lunch"))
            .await
            .unwrap();
        storage
            .insert_expense(&NewExpense::new(75.0, "Transport", "train"))
            .await
            .unwrap();
        storage
            .insert_expense(&NewExpense::new(999.0, "Food", "old").with_date(last_year_date()))
            .await
            .unwrap();

        assert_eq!(storage.month_to_date_spend("Food").await.unwrap(), 250.0);
        assert_eq!(storage.month_to_date_spend("Transport").await.unwrap(), 75.0);
        assert_eq!(storage.month_to_date_spend("Bills").await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn budgets_upsert_and_lookup() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        assert_eq!(storage.category_budget_limit("Food").await.unwrap(), None);

        storage.set_budget("Food", 400.0).await.unwrap();
        storage.set_budget("Food", 500.0).await.unwrap();
        storage.set_budget("Transport", 100.0).await.unwrap();

        assert_eq!(
            storage.category_budget_limit("Food").await.unwrap(),
            Some(500.0)
        );
        let budgets = storage.list_budgets().await.unwrap();
        assert_eq!(budgets.len(), 2);
        assert!(budgets.iter().all(|b| b.period == "monthly"));

        storage.delete_budget("Transport").await.unwrap();
        assert_eq!(storage.list_budgets().await.unwrap().len(), 1);
        assert!(storage.delete_budget("Transport").await.is_err());
        assert!(storage.set_budget("Food", -1.0).await.is_err());
    }

    #[tokio::test]
    async fn spend_by_category_groups_month() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        for (amount, category, date) in [
            (10.0, "Food", "2025-04-01"),
            (15.0, "Food", "2025-04-20T12:00:00+00:00"),
            (40.0, "Bills", "2025-04-03"),
            (99.0, "Food", "2025-05-01"),
        ] {
            storage
                .insert_expense(&NewExpense::new(amount, category, "x").with_date(date))
                .await
                .unwrap();
        }

        let spend = storage.spend_by_category("2025-04").await.unwrap();
        assert_eq!(
            spend,
            vec![("Bills".to_string(), 40.0), ("Food".to_string(), 25.0)]
        );
    }

    #[tokio::test]
    async fn categories_add_and_delete() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let id = storage
            .add_category(&NewCategory::new("Pets", "🐶", "#A9DFBF"))
            .await
            .unwrap();
        assert!(storage
            .list_categories()
            .await
            .unwrap()
            .iter()
            .any(|c| c.name == "Pets"));

        let dup = storage
            .add_category(&NewCategory::new("Pets", "🐱", "#000000"))
            .await
            .unwrap_err();
        assert!(dup.to_string().contains("already exists"));

        storage.delete_category(id).await.unwrap();
        assert!(storage.delete_category(id).await.is_err());
    }

    #[tokio::test]
    async fn incomes_roundtrip() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let id = storage
            .insert_income(&NewIncome {
                amount: 3200.0,
                description: "March salary".into(),
                kind: "salary".into(),
                date: "2025-03-01".into(),
            })
            .await
            .unwrap();
        let incomes = storage.list_incomes().await.unwrap();
        assert_eq!(incomes.len(), 1);
        assert_eq!(incomes[0].kind, "salary");

        storage.delete_income(id).await.unwrap();
        assert!(storage.list_incomes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn messages_keep_transaction_reference() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let user = ChatMessage::user("Spent $15 on lunch");
        let ai = ChatMessage::from_response(
            &AiResponse::Transaction {
                data: LoggedTransaction {
                    amount: 15.0,
                    category: "Food".into(),
                    merchant: None,
                    id: 42,
                    budget: None,
                },
            },
            Currency::default_currency(),
        );
        storage.save_message(&user).await.unwrap();
        storage.save_message(&ai).await.unwrap();

        let messages = storage.recent_messages(10).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sender, Sender::User);
        assert_eq!(messages[1].kind, MessageKind::Transaction);
        assert_eq!(messages[1].expense_id(), Some(42));

        let latest = storage.recent_messages(1).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].id, ai.id);

        assert_eq!(storage.clear_messages().await.unwrap(), 2);
        assert!(storage.recent_messages(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn with_conn_runs_on_blocking_pool() {
        let storage = SqliteStorage::open_in_memory().expect("should open in-memory DB");
        let count: i64 = storage
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table'",
                    [],
                    |row| row.get(0),
                )
                .map_err(|e| LedgerError::Storage(e.to_string()))
            })
            .await
            .expect("with_conn should succeed");

        assert!(count >= 5, "expected at least 5 tables, got {count}");
    }

    #[test]
    fn open_file_based_db() {
        let dir = std::env::temp_dir().join(format!("ledger-test-{}", uuid::Uuid::now_v7()));
        let db_path = dir.join("nested").join("test.db");

        let storage = SqliteStorage::open(&db_path).expect("should open file DB");
        assert_eq!(storage.path(), db_path);

        drop(storage);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
