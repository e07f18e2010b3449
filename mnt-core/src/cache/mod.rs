mod schema;
mod session;
mod store;

pub use schema::{ADDITIVE_COLUMNS, ColumnMigration, TABLES, column_exists, table_columns};
pub use session::{CacheCursor, CacheSession, CacheSessionRef};
pub use store::WalletStore;

use crate::error::CacheError;

// Log a store failure with its context and turn it into a `CacheError`.
pub(crate) fn store_err(context: &str, e: rusqlite::Error) -> CacheError {
    let msg = format!("{}: {}", context, e);
    error!("{}", msg);
    CacheError::Store(msg)
}
