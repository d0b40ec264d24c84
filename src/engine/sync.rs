//! End-to-end sync run: scan → chunked fetch+parse+persist → finalize.
//!
//! One logical thread of control: chunks execute strictly in submission
//! order and progress events are emitted in that same order. Every run emits
//! exactly one terminal event (done or error) and always closes the stream,
//! and the checkpoint write is deferred to the end of a successful run.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;

use crate::db::models::PendingTransaction;
use crate::db::repos::{pending, rules as rules_repo, sync_state};
use crate::db::DbPool;
use crate::engine::events::SyncEvent;
use crate::engine::rules;
use crate::error::AppError;
use crate::llm::{parser, CompletionClient};
use crate::mail::{fetcher, scanner, MailClient};

/// Message IDs processed per fetch+parse+persist+emit unit.
pub const CHUNK_SIZE: usize = 50;

/// External collaborators, injected so the whole run is testable offline.
#[derive(Clone)]
pub struct SyncDeps {
    pub mail: Arc<dyn MailClient>,
    pub model: Arc<dyn CompletionClient>,
}

/// The run's position in its state machine, for structured logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncPhase {
    Scanning,
    NoNewMail,
    ProcessingChunks,
    Finalizing,
}

impl SyncPhase {
    fn label(&self) -> &'static str {
        match self {
            SyncPhase::Scanning => "scanning",
            SyncPhase::NoNewMail => "no_new_mail",
            SyncPhase::ProcessingChunks => "processing_chunks",
            SyncPhase::Finalizing => "finalizing",
        }
    }
}

struct DoneSummary {
    total_saved: usize,
    emails_found: usize,
    dups_skipped: usize,
}

/// Number of chunks a run of `new_count` IDs produces.
pub fn total_chunks(new_count: usize) -> usize {
    new_count.div_ceil(CHUNK_SIZE)
}

/// Send an event, ignoring a disconnected consumer: in-flight work is never
/// interrupted by a dropped stream, the run completes regardless.
async fn emit(events: &mpsc::Sender<SyncEvent>, event: SyncEvent) {
    let _ = events.send(event).await;
}

/// Map a run failure to the message surfaced on the stream. Auth and scope
/// problems are surfaced verbatim with their remediation hint; everything
/// else gets a generic message.
fn terminal_message(e: &AppError) -> String {
    match e {
        AppError::Auth(_) | AppError::Scope(_) => e.to_string(),
        AppError::Provider(_) => "Mail search failed. Please try again later.".into(),
        _ => "Email sync failed unexpectedly. Please try again.".into(),
    }
}

/// Drive one full sync run, streaming progress into `events`.
///
/// The sender is dropped when this function returns, which closes the
/// consumer's stream on success and failure alike.
pub async fn run_sync(
    deps: SyncDeps,
    pool: DbPool,
    token: String,
    events: mpsc::Sender<SyncEvent>,
) {
    match run_sync_inner(&deps, &pool, &token, &events).await {
        Ok(summary) => {
            tracing::info!(
                total_saved = summary.total_saved,
                emails_found = summary.emails_found,
                dups_skipped = summary.dups_skipped,
                "Sync run complete"
            );
            emit(
                &events,
                SyncEvent::Done {
                    total_saved: summary.total_saved,
                    emails_found: summary.emails_found,
                    dups_skipped: summary.dups_skipped,
                },
            )
            .await;
        }
        Err(e) => {
            tracing::error!(kind = e.kind(), "Sync run failed: {}", e);
            emit(
                &events,
                SyncEvent::Error {
                    message: terminal_message(&e),
                },
            )
            .await;
        }
    }
}

async fn run_sync_inner(
    deps: &SyncDeps,
    pool: &DbPool,
    token: &str,
    events: &mpsc::Sender<SyncEvent>,
) -> Result<DoneSummary, AppError> {
    tracing::info!(phase = SyncPhase::Scanning.label(), "Sync run started");

    let state = sync_state::get(pool)?;
    let processed = sync_state::load_processed_ids(pool)?;
    let today = Utc::now().date_naive();

    // A scanner failure propagates before any state mutation, so a failed
    // run is always safe to retry.
    let scan = scanner::scan(deps.mail.as_ref(), token, state.last_sync_date, &processed).await?;
    emit(
        events,
        SyncEvent::Scanning {
            total_emails: scan.total_found,
            new_emails: scan.new_ids.len(),
        },
    )
    .await;

    if scan.new_ids.is_empty() {
        // Still advance the checkpoint so an already-clean window is not
        // rescanned on every run.
        tracing::info!(phase = SyncPhase::NoNewMail.label(), "No new mail");
        sync_state::finalize_run(pool, today, &[])?;
        return Ok(DoneSummary {
            total_saved: 0,
            emails_found: scan.total_found,
            dups_skipped: scan.skipped_dupes,
        });
    }

    let rule_set = rules_repo::get_all(pool)?;
    let chunk_count = total_chunks(scan.new_ids.len());
    let mut processed_ids: Vec<String> = Vec::with_capacity(scan.new_ids.len());
    let mut total_saved = 0usize;

    for (index, chunk) in scan.new_ids.chunks(CHUNK_SIZE).enumerate() {
        let chunk_no = index + 1;
        tracing::debug!(
            phase = SyncPhase::ProcessingChunks.label(),
            chunk = chunk_no,
            total_chunks = chunk_count,
            ids = chunk.len(),
            "Processing chunk"
        );

        let messages = fetcher::fetch_bodies(deps.mail.as_ref(), token, chunk).await;
        let parsed = parser::parse_chunk(deps.model.as_ref(), &messages).await;

        let mut records: Vec<PendingTransaction> = parsed
            .iter()
            .map(|p| PendingTransaction::new(&p.date, p.amount, &p.description, &p.source_message_id))
            .collect();
        // Fresh records are auto-categorized in the same run
        rules::apply_all(&mut records, &rule_set);

        let saved = pending::insert_batch(pool, &records)?;
        total_saved += saved;
        processed_ids.extend(chunk.iter().cloned());

        emit(
            events,
            SyncEvent::Progress {
                chunk: chunk_no,
                total_chunks: chunk_count,
                saved,
                total_saved,
            },
        )
        .await;
    }

    // The ledger write is deferred to here; a crash mid-run re-scans those
    // emails next time, and the dedup-safe insert absorbs the replay.
    tracing::info!(phase = SyncPhase::Finalizing.label(), ids = processed_ids.len(), "Persisting sync state");
    sync_state::finalize_run(pool, today, &processed_ids)?;

    Ok(DoneSummary {
        total_saved,
        emails_found: scan.total_found,
        dups_skipped: scan.skipped_dupes,
    })
}
