use serde::{Deserialize, Serialize};

/// Wire events for the sync progress stream, one JSON object per line.
/// Exactly one of `done`/`error` terminates a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum SyncEvent {
    Scanning {
        total_emails: usize,
        new_emails: usize,
    },
    Progress {
        chunk: usize,
        total_chunks: usize,
        saved: usize,
        total_saved: usize,
    },
    Done {
        total_saved: usize,
        emails_found: usize,
        dups_skipped: usize,
    },
    Error {
        message: String,
    },
}

impl SyncEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncEvent::Done { .. } | SyncEvent::Error { .. })
    }
}
