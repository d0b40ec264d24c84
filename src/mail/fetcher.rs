//! Full-content retrieval for scanned message IDs: concurrent within a
//! fixed-size batch, batches sequential, so peak in-flight requests stay
//! bounded while a batch still parallelizes.

use futures_util::future::join_all;

use crate::mail::{MailClient, RawMessage};

/// Messages fetched concurrently per batch.
pub const FETCH_BATCH_SIZE: usize = 20;

/// Fetch full bodies for the given IDs.
///
/// A single failed fetch drops that message and keeps the batch; the
/// pipeline favors availability over completeness here.
pub async fn fetch_bodies(client: &dyn MailClient, token: &str, ids: &[String]) -> Vec<RawMessage> {
    let mut messages = Vec::with_capacity(ids.len());

    for batch in ids.chunks(FETCH_BATCH_SIZE) {
        let results = join_all(batch.iter().map(|id| client.fetch_message(token, id))).await;
        for (id, result) in batch.iter().zip(results) {
            match result {
                Ok(message) => messages.push(message),
                Err(e) => {
                    tracing::warn!(message_id = %id, "Dropping message after fetch failure: {}", e);
                }
            }
        }
    }

    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::mail::MessageIdPage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a stub message per ID, failing for IDs that start with "bad".
    /// Tracks peak in-flight fetches.
    struct CountingMail {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl CountingMail {
        fn new() -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MailClient for CountingMail {
        async fn search_ids(
            &self,
            _token: &str,
            _query: &str,
            _page_size: u32,
            _page_token: Option<&str>,
        ) -> Result<MessageIdPage, AppError> {
            unreachable!("fetcher never searches")
        }

        async fn fetch_message(&self, _token: &str, id: &str) -> Result<RawMessage, AppError> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(current, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if id.starts_with("bad") {
                return Err(AppError::Provider("message fetch failed (HTTP 500)".into()));
            }
            Ok(RawMessage {
                id: id.to_string(),
                subject: format!("subject {id}"),
                sender: "bank@example.com".into(),
                date: "Mon, 02 Feb 2026 10:00:00 +0000".into(),
                body: format!("body {id}"),
            })
        }
    }

    fn ids(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("m{i}")).collect()
    }

    #[tokio::test]
    async fn test_fetches_all_in_order() {
        let mail = CountingMail::new();
        let messages = fetch_bodies(&mail, "tok", &ids(45)).await;
        assert_eq!(messages.len(), 45);
        assert_eq!(messages[0].id, "m0");
        assert_eq!(messages[44].id, "m44");
    }

    #[tokio::test]
    async fn test_batch_bounds_concurrency() {
        let mail = CountingMail::new();
        fetch_bodies(&mail, "tok", &ids(50)).await;
        assert!(mail.peak.load(Ordering::SeqCst) <= FETCH_BATCH_SIZE);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_dropped_not_fatal() {
        let mail = CountingMail::new();
        let mut all = ids(5);
        all.insert(2, "bad-1".into());
        let messages = fetch_bodies(&mail, "tok", &all).await;
        assert_eq!(messages.len(), 5);
        assert!(messages.iter().all(|m| !m.id.starts_with("bad")));
    }

    #[tokio::test]
    async fn test_empty_input() {
        let mail = CountingMail::new();
        assert!(fetch_bodies(&mail, "tok", &[]).await.is_empty());
    }
}
