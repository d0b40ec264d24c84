pub mod gemini;
pub mod parser;

use async_trait::async_trait;

use crate::error::AppError;

/// Text-completion seam: one prompt in, raw completion text out. Injected
/// into the parser so classification is testable without a live model.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, AppError>;
}
