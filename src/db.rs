use std::path::Path;

use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS institutions (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    slug TEXT NOT NULL UNIQUE,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    account_type TEXT NOT NULL,
    institution_id INTEGER,
    parent_account_id INTEGER,
    currency TEXT NOT NULL DEFAULT 'USD',
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (institution_id) REFERENCES institutions(id),
    FOREIGN KEY (parent_account_id) REFERENCES accounts(id)
);

CREATE TABLE IF NOT EXISTS categories (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS credit_card_accounts (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL,
    institution_id INTEGER,
    name TEXT NOT NULL,
    currency TEXT NOT NULL DEFAULT 'USD',
    closing_day INTEGER,
    due_day INTEGER,
    default_payment_account_id INTEGER,
    created_at TEXT DEFAULT (datetime('now')),
    UNIQUE (user_id, name),
    FOREIGN KEY (institution_id) REFERENCES institutions(id),
    FOREIGN KEY (default_payment_account_id) REFERENCES accounts(id)
);

CREATE TABLE IF NOT EXISTS import_sources (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL,
    institution_id INTEGER,
    kind TEXT NOT NULL,
    filename TEXT NOT NULL,
    file_hash TEXT NOT NULL,
    imported_at TEXT DEFAULT (datetime('now')),
    UNIQUE (user_id, kind, file_hash),
    FOREIGN KEY (institution_id) REFERENCES institutions(id)
);

CREATE TABLE IF NOT EXISTS raw_transactions (
    id INTEGER PRIMARY KEY,
    import_source_id INTEGER NOT NULL,
    raw_external_id TEXT,
    posted_at TEXT NOT NULL,
    amount_cents INTEGER NOT NULL,
    direction TEXT NOT NULL,
    description_raw TEXT NOT NULL,
    meta TEXT,
    FOREIGN KEY (import_source_id) REFERENCES import_sources(id)
);

CREATE TABLE IF NOT EXISTS ledger_entries (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL,
    posted_at TEXT NOT NULL,
    amount_cents INTEGER NOT NULL CHECK (amount_cents >= 0),
    direction TEXT NOT NULL,
    entry_type TEXT NOT NULL,
    description TEXT NOT NULL,
    merchant TEXT,
    account_id INTEGER,
    credit_card_account_id INTEGER,
    category_id INTEGER,
    import_source_id INTEGER,
    raw_transaction_id INTEGER,
    external_ref TEXT,
    fingerprint TEXT NOT NULL,
    transfer_group_id TEXT,
    transfer_peer_id INTEGER,
    reconciliation_status TEXT NOT NULL DEFAULT 'unmatched',
    transfer_fee_cents INTEGER NOT NULL DEFAULT 0,
    created_at TEXT DEFAULT (datetime('now')),
    UNIQUE (user_id, fingerprint),
    FOREIGN KEY (account_id) REFERENCES accounts(id),
    FOREIGN KEY (credit_card_account_id) REFERENCES credit_card_accounts(id),
    FOREIGN KEY (category_id) REFERENCES categories(id),
    FOREIGN KEY (import_source_id) REFERENCES import_sources(id),
    FOREIGN KEY (raw_transaction_id) REFERENCES raw_transactions(id)
);

CREATE INDEX IF NOT EXISTS idx_ledger_entries_external_ref
    ON ledger_entries(user_id, external_ref);
CREATE INDEX IF NOT EXISTS idx_ledger_entries_posted_at
    ON ledger_entries(user_id, posted_at);

CREATE TABLE IF NOT EXISTS transfer_suggestions (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL,
    out_entry_id INTEGER NOT NULL,
    in_entry_id INTEGER NOT NULL,
    score INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'suggested',
    created_at TEXT DEFAULT (datetime('now')),
    UNIQUE (user_id, out_entry_id, in_entry_id),
    FOREIGN KEY (out_entry_id) REFERENCES ledger_entries(id),
    FOREIGN KEY (in_entry_id) REFERENCES ledger_entries(id)
);

CREATE TABLE IF NOT EXISTS reconciliation_denials (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL,
    entry_id INTEGER NOT NULL,
    reason TEXT,
    created_at TEXT DEFAULT (datetime('now')),
    UNIQUE (user_id, entry_id),
    FOREIGN KEY (entry_id) REFERENCES ledger_entries(id)
);

CREATE TABLE IF NOT EXISTS legacy_transactions (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL,
    legacy_type TEXT NOT NULL,
    direction TEXT NOT NULL,
    amount_cents INTEGER NOT NULL,
    occurred_at TEXT NOT NULL,
    description TEXT NOT NULL,
    account_id INTEGER NOT NULL,
    transfer_account_id INTEGER,
    category_id INTEGER,
    meta TEXT,
    FOREIGN KEY (account_id) REFERENCES accounts(id),
    FOREIGN KEY (transfer_account_id) REFERENCES accounts(id)
);

CREATE TABLE IF NOT EXISTS import_batches (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL,
    filename TEXT,
    started_at TEXT DEFAULT (datetime('now')),
    total_rows INTEGER NOT NULL DEFAULT 0,
    imported_rows INTEGER NOT NULL DEFAULT 0
);
";

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use crate::models::AccountType;

    pub fn test_db() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = get_connection(&dir.path().join("test.db")).unwrap();
        init_db(&conn).unwrap();
        (dir, conn)
    }

    pub fn add_account(conn: &Connection, user_id: i64, name: &str, account_type: AccountType) -> i64 {
        conn.execute(
            "INSERT INTO accounts (user_id, name, account_type) VALUES (?1, ?2, ?3)",
            rusqlite::params![user_id, name, account_type],
        )
        .unwrap();
        conn.last_insert_rowid()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::test_db;
    use super::*;

    #[test]
    fn test_init_db_creates_tables() {
        let (_dir, conn) = test_db();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        for expected in &[
            "institutions",
            "accounts",
            "categories",
            "credit_card_accounts",
            "import_sources",
            "raw_transactions",
            "ledger_entries",
            "transfer_suggestions",
            "reconciliation_denials",
            "legacy_transactions",
            "import_batches",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing table: {expected}");
        }
    }

    #[test]
    fn test_init_db_is_idempotent() {
        let (_dir, conn) = test_db();
        init_db(&conn).unwrap();
    }

    #[test]
    fn test_fingerprint_unique_per_user() {
        let (_dir, conn) = test_db();
        let insert = "INSERT OR IGNORE INTO ledger_entries \
                      (user_id, posted_at, amount_cents, direction, entry_type, description, fingerprint) \
                      VALUES (?1, '2025-01-15', 100, 'OUT', 'expense', 'X', 'fp1')";
        conn.execute(insert, [1]).unwrap();
        conn.execute(insert, [1]).unwrap();
        conn.execute(insert, [2]).unwrap();
        let count: i64 = conn
            .query_row("SELECT count(*) FROM ledger_entries", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2, "same fingerprint dedups per user, not globally");
    }
}
