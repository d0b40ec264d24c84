use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State as AxumState},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;

use crate::config::AppConfig;
use crate::db::models::{CreateRuleInput, PendingTransaction, TransactionRule, TxnStatus};
use crate::db::repos::{pending, rules as rules_repo};
use crate::db::DbPool;
use crate::engine::events::SyncEvent;
use crate::engine::rules;
use crate::engine::sync::{self, SyncDeps};
use crate::error::AppError;

/// Shared state for the HTTP server.
pub struct ServerState {
    pub pool: DbPool,
    pub config: AppConfig,
    pub deps: SyncDeps,
    /// One logical sync run at a time; concurrent runs would race on ledger
    /// appends.
    pub sync_running: AtomicBool,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Scope(_) => StatusCode::FORBIDDEN,
            AppError::Provider(_) | AppError::Model(_) | AppError::Http(_) => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

/// Start the HTTP server and serve until ctrl-c.
pub async fn serve(state: Arc<ServerState>) -> Result<(), AppError> {
    let addr = state.config.bind_addr;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("mailspend listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}

fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sync", post(start_sync))
        .route("/transactions", get(list_transactions))
        .route("/transactions/{id}", delete(delete_transaction))
        .route("/transactions/{id}/ignore", post(ignore_transaction))
        .route("/transactions/{id}/unignore", post(unignore_transaction))
        .route("/rules", get(list_rules).post(create_rule))
        .route("/rules/{id}", delete(delete_rule))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint.
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "service": "mailspend" }))
}

// ============================================================================
// Sync stream
// ============================================================================

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
}

/// POST /sync: run the ingestion pipeline, streaming NDJSON progress events.
///
/// The run executes in a spawned task: a consumer that disconnects mid-stream
/// does not interrupt in-flight work, the run completes and persists anyway.
async fn start_sync(
    AxumState(state): AxumState<Arc<ServerState>>,
    headers: HeaderMap,
) -> Response {
    let token = bearer_token(&headers).or_else(|| state.config.gmail_access_token.clone());
    let Some(token) = token else {
        return AppError::Auth(
            "No mail access token. Pass an Authorization: Bearer header or set GMAIL_ACCESS_TOKEN."
                .into(),
        )
        .into_response();
    };

    if state
        .sync_running
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return (
            StatusCode::CONFLICT,
            Json(serde_json::json!({
                "error": "A sync run is already in progress",
                "kind": "conflict",
            })),
        )
            .into_response();
    }

    let (tx, rx) = mpsc::channel::<SyncEvent>(32);
    let run_state = state.clone();
    tokio::spawn(async move {
        sync::run_sync(
            run_state.deps.clone(),
            run_state.pool.clone(),
            token,
            tx,
        )
        .await;
        run_state.sync_running.store(false, Ordering::Release);
    });

    let lines = futures_util::stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        let line = serde_json::to_string(&event)
            .map(|s| s + "\n")
            .unwrap_or_default();
        Some((Ok::<_, std::convert::Infallible>(line), rx))
    });

    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(lines),
    )
        .into_response()
}

// ============================================================================
// Pending transactions
// ============================================================================

#[derive(Deserialize)]
struct ListQuery {
    status: Option<String>,
}

async fn list_transactions(
    AxumState(state): AxumState<Arc<ServerState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<PendingTransaction>>, AppError> {
    let status = query.status.as_deref().map(TxnStatus::parse).transpose()?;
    Ok(Json(pending::get_all(&state.pool, status)?))
}

async fn ignore_transaction(
    AxumState(state): AxumState<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<PendingTransaction>, AppError> {
    Ok(Json(pending::ignore(&state.pool, &id)?))
}

async fn unignore_transaction(
    AxumState(state): AxumState<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<PendingTransaction>, AppError> {
    Ok(Json(pending::unignore(&state.pool, &id)?))
}

async fn delete_transaction(
    AxumState(state): AxumState<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    if pending::delete(&state.pool, &id)? {
        Ok(Json(serde_json::json!({ "deleted": true })))
    } else {
        Err(AppError::NotFound(format!("Transaction {id}")))
    }
}

// ============================================================================
// Category rules
// ============================================================================

async fn list_rules(
    AxumState(state): AxumState<Arc<ServerState>>,
) -> Result<Json<Vec<TransactionRule>>, AppError> {
    Ok(Json(rules_repo::get_all(&state.pool)?))
}

/// Creating a rule runs the cheap incremental pass: only currently
/// uncategorized transactions are candidates.
async fn create_rule(
    AxumState(state): AxumState<Arc<ServerState>>,
    Json(input): Json<CreateRuleInput>,
) -> Result<Json<TransactionRule>, AppError> {
    let rule = rules_repo::create(&state.pool, input)?;

    let mut txns = pending::get_all(&state.pool, Some(TxnStatus::Uncategorized))?;
    let changed = rules::apply_one(&mut txns, &rule);
    persist_changed(&state.pool, &txns, &changed)?;

    tracing::info!(rule_id = %rule.id, captured = changed.len(), "Rule created");
    Ok(Json(rule))
}

/// Deleting a rule runs the full recompute with the surviving rules so its
/// stale matches are un-applied.
async fn delete_rule(
    AxumState(state): AxumState<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    if !rules_repo::delete(&state.pool, &id)? {
        return Err(AppError::NotFound(format!("Rule {id}")));
    }

    let survivors = rules_repo::get_all(&state.pool)?;
    let mut txns = pending::get_all(&state.pool, None)?;
    let changed = rules::apply_all(&mut txns, &survivors);
    persist_changed(&state.pool, &txns, &changed)?;

    tracing::info!(rule_id = %id, recategorized = changed.len(), "Rule deleted");
    Ok(Json(serde_json::json!({
        "deleted": true,
        "recategorized": changed.len(),
    })))
}

fn persist_changed(
    pool: &DbPool,
    txns: &[PendingTransaction],
    changed: &[String],
) -> Result<(), AppError> {
    let changed: HashSet<&str> = changed.iter().map(String::as_str).collect();
    for txn in txns.iter().filter(|t| changed.contains(t.id.as_str())) {
        pending::persist_categorization(pool, txn)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer ya29.token ".parse().unwrap());
        assert_eq!(bearer_token(&headers).as_deref(), Some("ya29.token"));

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Basic dXNlcg==".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);

        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_error_status_mapping() {
        let resp = AppError::NotFound("x".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = AppError::Validation("x".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp = AppError::Auth("x".into()).into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let resp = AppError::Scope("x".into()).into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let resp = AppError::Provider("x".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let resp = AppError::Internal("x".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
