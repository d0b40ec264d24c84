//! End-to-end pipeline runs against in-memory mail and model fakes plus a
//! temp database: chunking, progress-event ordering, dedup, partial model
//! failure, and error classification.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio::sync::mpsc;

use mailspend::db::models::{CreateRuleInput, TxnStatus};
use mailspend::db::repos::{pending, rules as rules_repo, sync_state};
use mailspend::db::{migrations, DbPool};
use mailspend::engine::events::SyncEvent;
use mailspend::engine::sync::{run_sync, SyncDeps};
use mailspend::error::AppError;
use mailspend::llm::CompletionClient;
use mailspend::mail::{MailClient, MessageIdPage, RawMessage};

fn init_test_db() -> Result<DbPool, AppError> {
    let tmp = std::env::temp_dir().join(format!("mailspend_it_{}.db", uuid::Uuid::new_v4()));
    let manager = r2d2_sqlite::SqliteConnectionManager::file(&tmp);
    let pool = r2d2::Pool::builder().max_size(2).build(manager)?;
    let conn = pool.get()?;
    migrations::run(&conn)?;
    drop(conn);
    Ok(pool)
}

/// Serves a fixed mailbox: paginated ID search plus per-ID fetch.
struct FakeMail {
    ids: Vec<String>,
    fail_search: Option<&'static str>,
}

impl FakeMail {
    fn with_messages(count: usize) -> Self {
        Self {
            ids: (0..count).map(|i| format!("m{i}")).collect(),
            fail_search: None,
        }
    }
}

#[async_trait]
impl MailClient for FakeMail {
    async fn search_ids(
        &self,
        _token: &str,
        _query: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<MessageIdPage, AppError> {
        if let Some(hint) = self.fail_search {
            return Err(AppError::Auth(hint.to_string()));
        }
        let start: usize = page_token.map(|t| t.parse().unwrap()).unwrap_or(0);
        let end = (start + page_size as usize).min(self.ids.len());
        let next_page_token = (end < self.ids.len()).then(|| end.to_string());
        Ok(MessageIdPage {
            ids: self.ids[start..end].to_vec(),
            next_page_token,
        })
    }

    async fn fetch_message(&self, _token: &str, id: &str) -> Result<RawMessage, AppError> {
        Ok(RawMessage {
            id: id.to_string(),
            subject: "Transaction alert".into(),
            sender: "alerts@bank.example".into(),
            date: "Thu, 15 Jan 2026 09:30:00 +0000".into(),
            body: "INR 100.00 debited at Mock Store".into(),
        })
    }
}

/// Classifies every email in the prompt as a debit at Mock Store. Calls
/// listed in `poisoned_calls` (1-based) return non-JSON instead.
struct FakeModel {
    calls: AtomicUsize,
    poisoned_calls: Vec<usize>,
}

impl FakeModel {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            poisoned_calls: Vec::new(),
        }
    }

    fn poisoned_on(calls: Vec<usize>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            poisoned_calls: calls,
        }
    }
}

#[async_trait]
impl CompletionClient for FakeModel {
    async fn complete(&self, prompt: &str) -> Result<String, AppError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.poisoned_calls.contains(&call) {
            return Ok("Sorry, I could not find any transactions.".into());
        }

        let emails = prompt.matches("--- Email ").count();
        let transactions: Vec<serde_json::Value> = (1..=emails)
            .map(|i| {
                serde_json::json!({
                    "email_index": i,
                    "type": "debit",
                    "amount": 100.0,
                    "date": "2026-01-15",
                    "description": "Mock Store",
                })
            })
            .collect();
        Ok(serde_json::json!({ "transactions": transactions }).to_string())
    }
}

async fn run(deps: SyncDeps, pool: &DbPool) -> Vec<SyncEvent> {
    let (tx, mut rx) = mpsc::channel(32);
    run_sync(deps, pool.clone(), "test-token".into(), tx).await;

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

fn deps(mail: FakeMail, model: FakeModel) -> SyncDeps {
    SyncDeps {
        mail: Arc::new(mail),
        model: Arc::new(model),
    }
}

#[tokio::test]
async fn test_first_run_processes_120_ids_in_three_chunks() {
    let pool = init_test_db().unwrap();
    rules_repo::create(
        &pool,
        CreateRuleInput {
            pattern: "mock store".into(),
            category: "Testing".into(),
            sort_order: None,
        },
    )
    .unwrap();

    let events = run(deps(FakeMail::with_messages(120), FakeModel::new()), &pool).await;

    assert_eq!(
        events[0],
        SyncEvent::Scanning {
            total_emails: 120,
            new_emails: 120
        }
    );
    assert_eq!(
        events[1..4],
        [
            SyncEvent::Progress { chunk: 1, total_chunks: 3, saved: 50, total_saved: 50 },
            SyncEvent::Progress { chunk: 2, total_chunks: 3, saved: 50, total_saved: 100 },
            SyncEvent::Progress { chunk: 3, total_chunks: 3, saved: 20, total_saved: 120 },
        ]
    );
    assert_eq!(
        events[4],
        SyncEvent::Done {
            total_saved: 120,
            emails_found: 120,
            dups_skipped: 0
        }
    );
    assert_eq!(events.len(), 5);

    // Records landed, auto-categorized by the rule in the same run
    let txns = pending::get_all(&pool, None).unwrap();
    assert_eq!(txns.len(), 120);
    assert!(txns
        .iter()
        .all(|t| t.status == TxnStatus::AutoMapped && t.category.as_deref() == Some("Testing")));
    assert!(txns.iter().all(|t| t.id.starts_with("2026-")));

    // Ledger and checkpoint written once, at the end
    assert_eq!(sync_state::processed_count(&pool).unwrap(), 120);
    assert_eq!(
        sync_state::get(&pool).unwrap().last_sync_date,
        Some(Utc::now().date_naive())
    );
}

#[tokio::test]
async fn test_second_run_is_fully_deduped() {
    let pool = init_test_db().unwrap();

    let first = run(deps(FakeMail::with_messages(120), FakeModel::new()), &pool).await;
    assert!(matches!(first.last(), Some(SyncEvent::Done { total_saved: 120, .. })));

    let second = run(deps(FakeMail::with_messages(120), FakeModel::new()), &pool).await;
    assert_eq!(
        second[0],
        SyncEvent::Scanning {
            total_emails: 120,
            new_emails: 0
        }
    );
    // Zero new mail short-circuits: no progress events, terminal done
    assert_eq!(
        second[1],
        SyncEvent::Done {
            total_saved: 0,
            emails_found: 120,
            dups_skipped: 120
        }
    );
    assert_eq!(second.len(), 2);
    assert_eq!(pending::get_all(&pool, None).unwrap().len(), 120);
    assert_eq!(sync_state::processed_count(&pool).unwrap(), 120);
}

#[tokio::test]
async fn test_zero_new_mail_advances_checkpoint() {
    let pool = init_test_db().unwrap();

    // Pre-populate the ledger with everything the provider will return
    let ids: Vec<String> = (0..30).map(|i| format!("m{i}")).collect();
    let stale = NaiveDate::from_ymd_opt(2025, 11, 1).unwrap();
    sync_state::finalize_run(&pool, stale, &ids).unwrap();

    let events = run(deps(FakeMail::with_messages(30), FakeModel::new()), &pool).await;

    assert_eq!(
        events,
        vec![
            SyncEvent::Scanning {
                total_emails: 30,
                new_emails: 0
            },
            SyncEvent::Done {
                total_saved: 0,
                emails_found: 30,
                dups_skipped: 30
            },
        ]
    );
    assert_eq!(
        sync_state::get(&pool).unwrap().last_sync_date,
        Some(Utc::now().date_naive())
    );
    assert!(pending::get_all(&pool, None).unwrap().is_empty());
}

#[tokio::test]
async fn test_poisoned_sub_batch_spares_siblings() {
    let pool = init_test_db().unwrap();

    // 20 messages → one chunk, two sub-batches; the first model call fails
    let events = run(
        deps(FakeMail::with_messages(20), FakeModel::poisoned_on(vec![1])),
        &pool,
    )
    .await;

    assert_eq!(
        events,
        vec![
            SyncEvent::Scanning {
                total_emails: 20,
                new_emails: 20
            },
            SyncEvent::Progress {
                chunk: 1,
                total_chunks: 1,
                saved: 10,
                total_saved: 10
            },
            SyncEvent::Done {
                total_saved: 10,
                emails_found: 20,
                dups_skipped: 0
            },
        ]
    );

    // Only the surviving sub-batch's messages produced records
    let txns = pending::get_all(&pool, None).unwrap();
    assert_eq!(txns.len(), 10);
    let sources: HashSet<&str> = txns.iter().map(|t| t.source_message_id.as_str()).collect();
    assert!(sources.contains("m10") && sources.contains("m19"));
    assert!(!sources.contains("m0"));

    // All 20 IDs are still marked processed; the failed sub-batch is not retried
    assert_eq!(sync_state::processed_count(&pool).unwrap(), 20);
}

#[tokio::test]
async fn test_scanner_auth_failure_leaves_state_untouched() {
    let pool = init_test_db().unwrap();
    let mail = FakeMail {
        ids: Vec::new(),
        fail_search: Some("Mail access token is expired or revoked. Reconnect the mailbox and retry."),
    };

    let events = run(deps(mail, FakeModel::new()), &pool).await;

    // Exactly one terminal event, the auth hint surfaced verbatim
    assert_eq!(events.len(), 1);
    match &events[0] {
        SyncEvent::Error { message } => assert!(message.contains("expired or revoked")),
        other => panic!("expected error event, got {other:?}"),
    }

    // No state mutation: safe to retry
    assert!(sync_state::get(&pool).unwrap().last_sync_date.is_none());
    assert_eq!(sync_state::processed_count(&pool).unwrap(), 0);
    assert!(pending::get_all(&pool, None).unwrap().is_empty());
}
