use std::collections::HashSet;

use chrono::NaiveDate;
use rusqlite::params;

use crate::db::models::SyncState;
use crate::db::DbPool;
use crate::error::AppError;

/// Load the sync checkpoint. Returns a default state when no run has
/// finished yet.
pub fn get(pool: &DbPool) -> Result<SyncState, AppError> {
    let conn = pool.get()?;
    let result = conn.query_row(
        "SELECT last_sync_date FROM sync_state WHERE id = 1",
        [],
        |row| row.get::<_, Option<String>>(0),
    );

    match result {
        Ok(date_str) => Ok(SyncState {
            last_sync_date: date_str.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
        }),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(SyncState { last_sync_date: None }),
        Err(e) => Err(AppError::Database(e)),
    }
}

/// Load the full processed-message ledger into a set. The ledger only ever
/// grows, so membership against this set is the cross-run dedup check.
pub fn load_processed_ids(pool: &DbPool) -> Result<HashSet<String>, AppError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare("SELECT message_id FROM processed_messages")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    rows.collect::<Result<HashSet<_>, _>>().map_err(AppError::Database)
}

pub fn processed_count(pool: &DbPool) -> Result<i64, AppError> {
    let conn = pool.get()?;
    let count = conn.query_row("SELECT COUNT(*) FROM processed_messages", [], |row| row.get(0))?;
    Ok(count)
}

/// Persist the outcome of a successful run in one transaction: advance the
/// checkpoint date and append every newly-processed message ID. INSERT OR
/// IGNORE keeps the ledger append-only across retried runs.
pub fn finalize_run(
    pool: &DbPool,
    last_sync_date: NaiveDate,
    processed_ids: &[String],
) -> Result<(), AppError> {
    let mut conn = pool.get()?;
    let now = chrono::Utc::now().to_rfc3339();
    let tx = conn.transaction()?;

    tx.execute(
        "INSERT INTO sync_state (id, last_sync_date, updated_at)
         VALUES (1, ?1, ?2)
         ON CONFLICT(id) DO UPDATE SET last_sync_date = ?1, updated_at = ?2",
        params![last_sync_date.format("%Y-%m-%d").to_string(), now],
    )?;

    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO processed_messages (message_id, processed_at)
             VALUES (?1, ?2)",
        )?;
        for id in processed_ids {
            stmt.execute(params![id, now])?;
        }
    }

    tx.commit()?;
    Ok(())
}
