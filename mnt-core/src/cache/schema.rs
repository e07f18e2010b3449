use super::store_err;
use crate::error::CacheError;
use rusqlite::Connection;

pub const TABLES: &[&str] = &["hd_tree", "address", "tx", "tx_output"];

/// Base schema, created if absent. Columns added after the first release are not listed
/// here, they come from [`ADDITIVE_COLUMNS`].
const CREATE_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS hd_tree (
        id INTEGER PRIMARY KEY,
        ident TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_hd_tree_ident ON hd_tree (ident);

    CREATE TABLE IF NOT EXISTS address (
        id INTEGER PRIMARY KEY,
        xpub_hash TEXT,
        parent_id INTEGER,
        address_index INTEGER,
        address TEXT,
        path TEXT,
        tree_id INTEGER,
        balance INTEGER DEFAULT 0,
        received INTEGER DEFAULT 0,
        is_change INTEGER DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_address_tree_path ON address (tree_id, path);
    CREATE INDEX IF NOT EXISTS idx_address_address ON address (address);
    CREATE INDEX IF NOT EXISTS idx_address_parent ON address (parent_id, address_index);

    CREATE TABLE IF NOT EXISTS tx (
        id INTEGER PRIMARY KEY,
        tx_hash TEXT NOT NULL,
        block_height INTEGER DEFAULT 0,
        block_timestamp INTEGER DEFAULT 0,
        coinbase INTEGER DEFAULT 0
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_tx_hash ON tx (tx_hash);

    CREATE TABLE IF NOT EXISTS tx_output (
        id INTEGER PRIMARY KEY,
        address_id INTEGER NOT NULL,
        tx_id INTEGER NOT NULL,
        output_index INTEGER NOT NULL,
        satoshis INTEGER NOT NULL,
        spent_tx_id INTEGER
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_tx_output_tx ON tx_output (tx_id, output_index);
    CREATE INDEX IF NOT EXISTS idx_tx_output_address ON tx_output (address_id);
";

#[derive(Debug, Clone, Copy)]
pub struct ColumnMigration {
    pub table: &'static str,
    pub column: &'static str,
    pub definition: &'static str,
}

/// Columns introduced over time. There is no schema version table: the presence of a
/// column is the version marker, so each entry is applied only when the column is missing.
pub const ADDITIVE_COLUMNS: &[ColumnMigration] = &[
    ColumnMigration {
        table: "hd_tree",
        column: "label",
        definition: "TEXT",
    },
    ColumnMigration {
        table: "address",
        column: "last_scan_block_height",
        definition: "INTEGER DEFAULT 0",
    },
    ColumnMigration {
        table: "address",
        column: "label",
        definition: "TEXT",
    },
    ColumnMigration {
        table: "tx_output",
        column: "spent_input_index",
        definition: "INTEGER",
    },
];

pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>, CacheError> {
    // Table names come from the constants above, never from user input
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", table))
        .map_err(|e| store_err(&format!("Failed to read columns of table {}", table), e))?;

    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(|e| store_err(&format!("Failed to query columns of table {}", table), e))?
        .collect::<Result<Vec<String>, _>>()
        .map_err(|e| store_err(&format!("Failed to read column of table {}", table), e))?;

    Ok(columns)
}

pub fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, CacheError> {
    let columns = table_columns(conn, table)?;
    Ok(columns.iter().any(|c| c.eq_ignore_ascii_case(column)))
}

/// Create missing tables and indexes and add missing columns. Idempotent, runs on every open.
/// Everything is applied in one transaction so a failure leaves the previous schema intact.
pub(crate) fn migrate(conn: &Connection) -> Result<(), CacheError> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| store_err("Failed to start schema migration transaction", e))?;

    tx.execute_batch(CREATE_SCHEMA)
        .map_err(|e| store_err("Failed to create wallet cache schema", e))?;

    for migration in ADDITIVE_COLUMNS {
        if column_exists(&tx, migration.table, migration.column)? {
            continue;
        }

        tx.execute_batch(&format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            migration.table, migration.column, migration.definition
        ))
        .map_err(|e| {
            store_err(
                &format!(
                    "Failed to add column {}.{}",
                    migration.table, migration.column
                ),
                e,
            )
        })?;
        info!(
            "Added column {}.{} to wallet cache",
            migration.table, migration.column
        );
    }

    tx.commit()
        .map_err(|e| store_err("Failed to commit schema migration", e))?;

    Ok(())
}
