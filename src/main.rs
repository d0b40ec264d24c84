use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use mailspend::config::AppConfig;
use mailspend::engine::sync::SyncDeps;
use mailspend::error::AppError;
use mailspend::llm::gemini::GeminiClient;
use mailspend::mail::gmail::GmailClient;
use mailspend::server::{self, ServerState};
use mailspend::{db, logging};

/// Per-request timeout for both external collaborators, so a stalled mail
/// or model call fails the run instead of hanging it.
const HTTP_TIMEOUT_SECS: u64 = 30;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    logging::init();

    tracing::info!("Starting mailspend v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::from_env()?;
    let pool = db::init_db(&config.data_dir)?;
    tracing::info!("Database pool ready (max_size=8)");

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .build()?;

    let deps = SyncDeps {
        mail: Arc::new(GmailClient::new(http.clone(), config.gmail_api_base.clone())),
        model: Arc::new(GeminiClient::new(
            http,
            config.model_api_base.clone(),
            config.model_api_key.clone(),
            config.model_name.clone(),
        )),
    };

    let state = Arc::new(ServerState {
        pool,
        config,
        deps,
        sync_running: AtomicBool::new(false),
    });

    server::serve(state).await
}
