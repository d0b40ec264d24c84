use rusqlite::Connection;

use crate::error::AppError;

/// Run the consolidated schema migration. Idempotent.
pub fn run(conn: &Connection) -> Result<(), AppError> {
    tracing::debug!("Running database migrations");

    conn.execute_batch(SCHEMA)?;

    tracing::info!("Database migrations complete");
    Ok(())
}

const SCHEMA: &str = r#"

-- ============================================================================
-- Pending transactions (parsed candidate spends awaiting confirmation)
-- ============================================================================

CREATE TABLE IF NOT EXISTS pending_transactions (
    id                TEXT PRIMARY KEY,
    year              INTEGER NOT NULL,
    date              TEXT NOT NULL,
    amount            REAL NOT NULL,
    description       TEXT NOT NULL,
    category          TEXT,
    status            TEXT NOT NULL DEFAULT 'uncategorized'
                      CHECK(status IN ('uncategorized', 'auto_mapped', 'ignored')),
    matched_rule_id   TEXT,
    source            TEXT NOT NULL DEFAULT 'email_sync',
    source_message_id TEXT NOT NULL UNIQUE,
    created_at        TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pending_year_date ON pending_transactions(year, date);
CREATE INDEX IF NOT EXISTS idx_pending_status    ON pending_transactions(status);

-- ============================================================================
-- Category rules (list order = match priority)
-- ============================================================================

CREATE TABLE IF NOT EXISTS transaction_rules (
    id         TEXT PRIMARY KEY,
    pattern    TEXT NOT NULL,
    category   TEXT NOT NULL,
    sort_order INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_rules_sort ON transaction_rules(sort_order);

-- ============================================================================
-- Sync checkpoint (single row) and processed-message ledger
-- ============================================================================

CREATE TABLE IF NOT EXISTS sync_state (
    id             INTEGER PRIMARY KEY CHECK(id = 1),
    last_sync_date TEXT,
    updated_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS processed_messages (
    message_id   TEXT PRIMARY KEY,
    processed_at TEXT NOT NULL
);
"#;
