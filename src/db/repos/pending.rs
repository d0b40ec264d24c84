use rusqlite::{params, Row};

use crate::db::models::{PendingTransaction, TxnStatus};
use crate::db::DbPool;
use crate::error::AppError;

fn row_to_pending(row: &Row) -> rusqlite::Result<PendingTransaction> {
    let status_str: String = row.get("status")?;
    Ok(PendingTransaction {
        id: row.get("id")?,
        year: row.get("year")?,
        date: row.get("date")?,
        amount: row.get("amount")?,
        description: row.get("description")?,
        category: row.get("category")?,
        // CHECK constraint guarantees a known value
        status: TxnStatus::parse(&status_str).unwrap_or(TxnStatus::Uncategorized),
        matched_rule_id: row.get("matched_rule_id")?,
        source: row.get("source")?,
        source_message_id: row.get("source_message_id")?,
        created_at: row.get("created_at")?,
    })
}

/// Insert a batch of records in one transaction. The UNIQUE constraint on
/// `source_message_id` plus INSERT OR IGNORE makes reprocessing a message
/// from an interrupted prior run a no-op instead of a duplicate.
///
/// Returns the number of rows actually inserted.
pub fn insert_batch(pool: &DbPool, txns: &[PendingTransaction]) -> Result<usize, AppError> {
    if txns.is_empty() {
        return Ok(0);
    }

    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    let mut inserted = 0usize;
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO pending_transactions
             (id, year, date, amount, description, category, status,
              matched_rule_id, source, source_message_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )?;
        for txn in txns {
            inserted += stmt.execute(params![
                txn.id,
                txn.year,
                txn.date,
                txn.amount,
                txn.description,
                txn.category,
                txn.status.as_str(),
                txn.matched_rule_id,
                txn.source,
                txn.source_message_id,
                txn.created_at,
            ])?;
        }
    }
    tx.commit()?;
    Ok(inserted)
}

pub fn get_all(pool: &DbPool, status: Option<TxnStatus>) -> Result<Vec<PendingTransaction>, AppError> {
    let conn = pool.get()?;
    let rows = match status {
        Some(s) => {
            let mut stmt = conn.prepare(
                "SELECT * FROM pending_transactions
                 WHERE status = ?1
                 ORDER BY year DESC, date DESC, created_at DESC",
            )?;
            let mapped = stmt.query_map(params![s.as_str()], row_to_pending)?;
            mapped.collect::<Result<Vec<_>, _>>()
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT * FROM pending_transactions
                 ORDER BY year DESC, date DESC, created_at DESC",
            )?;
            let mapped = stmt.query_map([], row_to_pending)?;
            mapped.collect::<Result<Vec<_>, _>>()
        }
    };
    rows.map_err(AppError::Database)
}

pub fn get_by_id(pool: &DbPool, id: &str) -> Result<PendingTransaction, AppError> {
    let conn = pool.get()?;
    conn.query_row(
        "SELECT * FROM pending_transactions WHERE id = ?1",
        params![id],
        row_to_pending,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => AppError::NotFound(format!("Transaction {id}")),
        other => AppError::Database(other),
    })
}

/// Persist the categorization fields of an already-existing record
/// (status, category, matched rule). Used after a rule-engine pass.
pub fn persist_categorization(pool: &DbPool, txn: &PendingTransaction) -> Result<(), AppError> {
    let conn = pool.get()?;
    conn.execute(
        "UPDATE pending_transactions
         SET status = ?1, category = ?2, matched_rule_id = ?3
         WHERE id = ?4",
        params![txn.status.as_str(), txn.category, txn.matched_rule_id, txn.id],
    )?;
    Ok(())
}

/// Mark a transaction ignored. Guarded by the status transition rules.
pub fn ignore(pool: &DbPool, id: &str) -> Result<PendingTransaction, AppError> {
    let mut txn = get_by_id(pool, id)?;
    txn.ignore()?;
    persist_categorization(pool, &txn)?;
    Ok(txn)
}

/// Reset an ignored transaction back to uncategorized, clearing any match.
pub fn unignore(pool: &DbPool, id: &str) -> Result<PendingTransaction, AppError> {
    let mut txn = get_by_id(pool, id)?;
    txn.unignore()?;
    persist_categorization(pool, &txn)?;
    Ok(txn)
}

pub fn delete(pool: &DbPool, id: &str) -> Result<bool, AppError> {
    let conn = pool.get()?;
    let rows = conn.execute("DELETE FROM pending_transactions WHERE id = ?1", params![id])?;
    Ok(rows > 0)
}
