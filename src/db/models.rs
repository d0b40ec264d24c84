use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

// ============================================================================
// Pending transactions
// ============================================================================

/// Lifecycle status of a pending transaction.
///
/// Transitions are one-directional except for explicit unignore:
/// uncategorized → auto_mapped → ignored, with unignore resetting an ignored
/// item back to uncategorized. All mutation goes through the guarded methods
/// on [`PendingTransaction`] so illegal transitions cannot be expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnStatus {
    Uncategorized,
    AutoMapped,
    Ignored,
}

impl TxnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxnStatus::Uncategorized => "uncategorized",
            TxnStatus::AutoMapped => "auto_mapped",
            TxnStatus::Ignored => "ignored",
        }
    }

    pub fn parse(s: &str) -> Result<Self, AppError> {
        match s {
            "uncategorized" => Ok(TxnStatus::Uncategorized),
            "auto_mapped" => Ok(TxnStatus::AutoMapped),
            "ignored" => Ok(TxnStatus::Ignored),
            other => Err(AppError::Validation(format!(
                "Invalid transaction status '{other}'"
            ))),
        }
    }
}

/// A parsed candidate spend awaiting category confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTransaction {
    /// Year-prefixed identifier ("<year>-<uuid>"); the prefix always equals
    /// the year of `date` and routes the record to its year partition.
    pub id: String,
    pub year: i32,
    /// Transaction date, YYYY-MM-DD.
    pub date: String,
    pub amount: f64,
    pub description: String,
    pub category: Option<String>,
    pub status: TxnStatus,
    pub matched_rule_id: Option<String>,
    pub source: String,
    pub source_message_id: String,
    pub created_at: String,
}

impl PendingTransaction {
    /// Synthesize a new uncategorized record from parser output.
    pub fn new(date: &str, amount: f64, description: &str, source_message_id: &str) -> Self {
        let year: i32 = date
            .get(..4)
            .and_then(|y| y.parse().ok())
            .unwrap_or_else(|| {
                use chrono::Datelike;
                chrono::Utc::now().year()
            });
        Self {
            id: format!("{}-{}", year, uuid::Uuid::new_v4()),
            year,
            date: date.to_string(),
            amount,
            description: description.to_string(),
            category: None,
            status: TxnStatus::Uncategorized,
            matched_rule_id: None,
            source: "email_sync".into(),
            source_message_id: source_message_id.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// uncategorized → auto_mapped. Records the matching rule.
    pub fn apply_category(&mut self, rule_id: &str, category: &str) -> Result<(), AppError> {
        match self.status {
            TxnStatus::Uncategorized => {
                self.status = TxnStatus::AutoMapped;
                self.category = Some(category.to_string());
                self.matched_rule_id = Some(rule_id.to_string());
                Ok(())
            }
            other => Err(AppError::Validation(format!(
                "Cannot auto-map a transaction in status '{}'",
                other.as_str()
            ))),
        }
    }

    /// auto_mapped → uncategorized, clearing the stale match. Used by the
    /// full-recompute pass when the rule that produced a match no longer
    /// applies. No-op for records that are already uncategorized.
    pub fn reset_categorization(&mut self) -> Result<(), AppError> {
        match self.status {
            TxnStatus::Uncategorized | TxnStatus::AutoMapped => {
                self.status = TxnStatus::Uncategorized;
                self.category = None;
                self.matched_rule_id = None;
                Ok(())
            }
            TxnStatus::Ignored => Err(AppError::Validation(
                "Cannot recompute an ignored transaction".into(),
            )),
        }
    }

    /// {uncategorized, auto_mapped} → ignored.
    pub fn ignore(&mut self) -> Result<(), AppError> {
        match self.status {
            TxnStatus::Uncategorized | TxnStatus::AutoMapped => {
                self.status = TxnStatus::Ignored;
                Ok(())
            }
            TxnStatus::Ignored => Err(AppError::Validation(
                "Transaction is already ignored".into(),
            )),
        }
    }

    /// ignored → uncategorized. Clears category and matched rule so the item
    /// becomes eligible for matching again.
    pub fn unignore(&mut self) -> Result<(), AppError> {
        match self.status {
            TxnStatus::Ignored => {
                self.status = TxnStatus::Uncategorized;
                self.category = None;
                self.matched_rule_id = None;
                Ok(())
            }
            other => Err(AppError::Validation(format!(
                "Cannot unignore a transaction in status '{}'",
                other.as_str()
            ))),
        }
    }
}

// ============================================================================
// Category rules
// ============================================================================

/// A user-defined pattern-to-category mapping. `sort_order` defines list
/// order, and list order defines match priority (first match wins).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRule {
    pub id: String,
    pub pattern: String,
    pub category: String,
    pub sort_order: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRuleInput {
    pub pattern: String,
    pub category: String,
    pub sort_order: Option<i64>,
}

// ============================================================================
// Sync state
// ============================================================================

/// Persisted sync checkpoint. The processed-message ledger lives in its own
/// table and is loaded separately as a set.
#[derive(Debug, Clone, Serialize)]
pub struct SyncState {
    pub last_sync_date: Option<NaiveDate>,
}
