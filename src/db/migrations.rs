//! Ordered, versioned schema migrations.
//!
//! The applied version is tracked through SQLite's `user_version` pragma.
//! Every step is additionally idempotent (CREATE IF NOT EXISTS /
//! check-then-alter), so running the whole list against a database created
//! before versioning existed is safe: the steps that already happened
//! become no-ops.

use rusqlite::Connection;
use tracing::{debug, info, instrument, warn};

use crate::errors::{Error, Result};

struct Migration {
    name: &'static str,
    apply: fn(&Connection) -> Result<()>,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "rename_legacy_folders",
        apply: rename_legacy_folders,
    },
    Migration {
        name: "create_base_tables",
        apply: create_base_tables,
    },
    Migration {
        name: "add_installment_columns",
        apply: add_installment_columns,
    },
    Migration {
        name: "create_quotations_clients_reports",
        apply: create_quotations_clients_reports,
    },
];

/// Runs every migration step the database has not seen yet.
///
/// Failure here is fatal to startup: callers must surface it, not proceed
/// on a half-migrated schema.
#[instrument(skip(conn))]
pub(crate) fn run_migrations(conn: &Connection) -> Result<()> {
    let applied: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| Error::Schema(format!("Failed to read schema version: {e}")))?;

    if applied as usize >= MIGRATIONS.len() {
        debug!("Schema already at version {}.", applied);
        return Ok(());
    }

    for (index, migration) in MIGRATIONS.iter().enumerate().skip(applied as usize) {
        info!("Applying migration {} '{}'", index + 1, migration.name);
        (migration.apply)(conn)
            .map_err(|e| Error::Schema(format!("Migration '{}' failed: {e}", migration.name)))?;
        conn.pragma_update(None, "user_version", (index + 1) as i64)
            .map_err(|e| {
                Error::Schema(format!(
                    "Failed to record schema version after '{}': {e}",
                    migration.name
                ))
            })?;
    }
    info!("Schema migrated to version {}.", MIGRATIONS.len());
    Ok(())
}

/// Historical rename: the `folders` table became `sections`, and
/// `products.folder_id` became `products.section_id`. Databases written by
/// old builds still carry the former names.
fn rename_legacy_folders(conn: &Connection) -> Result<()> {
    if table_exists(conn, "folders")? && !table_exists(conn, "sections")? {
        warn!("Found legacy 'folders' table, renaming to 'sections'.");
        conn.execute("ALTER TABLE folders RENAME TO sections", [])?;
    }
    if table_exists(conn, "products")?
        && column_exists(conn, "products", "folder_id")?
        && !column_exists(conn, "products", "section_id")?
    {
        warn!("Found legacy 'products.folder_id' column, renaming to 'section_id'.");
        conn.execute("ALTER TABLE products RENAME COLUMN folder_id TO section_id", [])?;
    }
    Ok(())
}

fn create_base_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;

        CREATE TABLE IF NOT EXISTS sections (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            color TEXT NOT NULL,
            icon TEXT NOT NULL,
            image TEXT,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        );

        CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            section_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            price REAL NOT NULL,
            rent_price REAL NOT NULL DEFAULT 0,
            image TEXT,
            image_secondary1 TEXT,
            image_secondary2 TEXT,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            FOREIGN KEY (section_id) REFERENCES sections (id) ON DELETE CASCADE
        );
        CREATE INDEX IF NOT EXISTS idx_products_section_id ON products (section_id);

        CREATE TABLE IF NOT EXISTS canvases (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            data TEXT NOT NULL,
            thumbnail TEXT,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        );

        CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            product_id TEXT,
            product_name TEXT,
            quantity INTEGER NOT NULL DEFAULT 1,
            unit_price REAL NOT NULL DEFAULT 0,
            discount REAL NOT NULL DEFAULT 0,
            total_amount REAL NOT NULL,
            customer_name TEXT,
            client_data TEXT NOT NULL DEFAULT '{}',
            notes TEXT,
            date TEXT NOT NULL,
            items TEXT NOT NULL DEFAULT '[]',
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_transactions_kind ON transactions (kind);
        CREATE INDEX IF NOT EXISTS idx_transactions_date ON transactions (date);

        CREATE TABLE IF NOT EXISTS rentals (
            transaction_id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            start_date TEXT,
            end_date TEXT,
            deposit REAL NOT NULL DEFAULT 0,
            FOREIGN KEY (transaction_id) REFERENCES transactions (id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS decorations (
            transaction_id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            start_date TEXT,
            end_date TEXT,
            deposit REAL NOT NULL DEFAULT 0,
            FOREIGN KEY (transaction_id) REFERENCES transactions (id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS expenses (
            id TEXT PRIMARY KEY,
            category TEXT NOT NULL,
            description TEXT,
            amount REAL NOT NULL,
            date TEXT NOT NULL,
            receipt_image TEXT,
            notes TEXT
        );

        CREATE TABLE IF NOT EXISTS notes (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            content TEXT NOT NULL DEFAULT '',
            date TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT
        );

        COMMIT;",
    )
    .map_err(Error::from)
}

/// Installment tracking arrived after the first release; older databases
/// lack these columns on `transactions`.
fn add_installment_columns(conn: &Connection) -> Result<()> {
    ensure_column(
        conn,
        "transactions",
        "is_installment",
        "BOOLEAN NOT NULL DEFAULT FALSE",
    )?;
    ensure_column(conn, "transactions", "total_price", "REAL NOT NULL DEFAULT 0")?;
    ensure_column(conn, "transactions", "amount_paid", "REAL NOT NULL DEFAULT 0")?;
    Ok(())
}

fn create_quotations_clients_reports(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;

        CREATE TABLE IF NOT EXISTS quotations (
            id TEXT PRIMARY KEY,
            quotation_number TEXT NOT NULL,
            kind TEXT NOT NULL,
            product_name TEXT,
            quantity INTEGER NOT NULL DEFAULT 1,
            unit_price REAL NOT NULL DEFAULT 0,
            discount REAL NOT NULL DEFAULT 0,
            total_amount REAL NOT NULL,
            customer_name TEXT,
            client_data TEXT NOT NULL DEFAULT '{}',
            notes TEXT,
            date TEXT NOT NULL,
            items TEXT NOT NULL DEFAULT '[]',
            status TEXT NOT NULL DEFAULT 'pending',
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        );

        CREATE TABLE IF NOT EXISTS clients (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            phone TEXT,
            email TEXT,
            address TEXT,
            notes TEXT,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        );

        CREATE TABLE IF NOT EXISTS saved_reports (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            kind TEXT NOT NULL,
            period_start TEXT,
            period_end TEXT,
            data TEXT NOT NULL,
            created_at DATETIME NOT NULL
        );

        COMMIT;",
    )
    .map_err(Error::from)
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(columns.iter().any(|c| c == column))
}

fn ensure_column(conn: &Connection, table: &str, column: &str, definition: &str) -> Result<()> {
    if !column_exists(conn, table, column)? {
        debug!("Adding column {}.{}", table, column);
        conn.execute(
            &format!("ALTER TABLE {table} ADD COLUMN {column} {definition}"),
            [],
        )?;
    }
    Ok(())
}
