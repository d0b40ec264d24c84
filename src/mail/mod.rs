pub mod body;
pub mod fetcher;
pub mod gmail;
pub mod scanner;

use async_trait::async_trait;

use crate::error::AppError;

/// A fetched message reduced to the fields the pipeline consumes. The body
/// is already-extracted plain text (empty when nothing was extractable).
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub id: String,
    pub subject: String,
    pub sender: String,
    pub date: String,
    pub body: String,
}

/// One page of message IDs from a provider search.
#[derive(Debug, Clone, Default)]
pub struct MessageIdPage {
    pub ids: Vec<String>,
    pub next_page_token: Option<String>,
}

/// Mail-provider seam. The pipeline only ever talks to this trait, so tests
/// run against in-memory fakes instead of a live mailbox.
#[async_trait]
pub trait MailClient: Send + Sync {
    /// Search message IDs matching `query`, one page at a time.
    async fn search_ids(
        &self,
        token: &str,
        query: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<MessageIdPage, AppError>;

    /// Fetch one message in full and reduce it to a [`RawMessage`].
    async fn fetch_message(&self, token: &str, id: &str) -> Result<RawMessage, AppError>;
}
