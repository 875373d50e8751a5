mod backend;
mod sqlite;

pub use backend::LedgerStore;
pub use sqlite::{SqliteStorage, SCHEMA_VERSION};

use std::path::PathBuf;

use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};

/// Open the SQLite database named by `storage.path`, or the default one.
pub fn create_backend(config: &LedgerConfig) -> Result<SqliteStorage> {
    let path = match &config.storage.path {
        Some(p) => PathBuf::from(p),
        None => default_sqlite_path()?,
    };
    SqliteStorage::open(&path)
}

/// Default SQLite path: `~/.config/ledger/ledger.db`
pub fn default_sqlite_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|p| p.join("ledger").join("ledger.db"))
        .ok_or_else(|| LedgerError::Config("cannot determine config directory".to_string()))
}
