use async_trait::async_trait;
use serde::Deserialize;

use crate::error::AppError;
use crate::mail::body::{self, MessagePart};
use crate::mail::{MailClient, MessageIdPage, RawMessage};

/// Gmail REST client. Holds a shared `reqwest::Client`; the base URL is
/// injected so tests can point it at a local fixture server.
pub struct GmailClient {
    http: reqwest::Client,
    base_url: String,
}

// -- Gmail API wire types --

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    messages: Option<Vec<MessageRef>>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Deserialize)]
struct MessageResponse {
    id: String,
    payload: Option<MessagePart>,
}

impl GmailClient {
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Map a non-success provider status to a classified error. The caller
    /// distinguishes reauthentication, missing scope, and generic failures.
    fn classify_status(status: reqwest::StatusCode, context: &str) -> AppError {
        match status.as_u16() {
            401 => AppError::Auth(
                "Mail access token is expired or revoked. Reconnect the mailbox and retry.".into(),
            ),
            403 => AppError::Scope(
                "Mail access token lacks the required read scope. Re-authorize with mailbox read permission.".into(),
            ),
            _ => AppError::Provider(format!("{context} failed (HTTP {status})")),
        }
    }
}

#[async_trait]
impl MailClient for GmailClient {
    async fn search_ids(
        &self,
        token: &str,
        query: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<MessageIdPage, AppError> {
        let page_size = page_size.to_string();
        let mut req = self
            .http
            .get(format!("{}/users/me/messages", self.base_url))
            .bearer_auth(token)
            .query(&[("q", query), ("maxResults", page_size.as_str())]);
        if let Some(page) = page_token {
            req = req.query(&[("pageToken", page)]);
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(Self::classify_status(resp.status(), "message search"));
        }

        let list: ListResponse = resp.json().await?;
        Ok(MessageIdPage {
            ids: list
                .messages
                .unwrap_or_default()
                .into_iter()
                .map(|m| m.id)
                .collect(),
            next_page_token: list.next_page_token,
        })
    }

    async fn fetch_message(&self, token: &str, id: &str) -> Result<RawMessage, AppError> {
        let resp = self
            .http
            .get(format!("{}/users/me/messages/{}", self.base_url, id))
            .bearer_auth(token)
            .query(&[("format", "full")])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::classify_status(resp.status(), "message fetch"));
        }

        let message: MessageResponse = resp.json().await?;
        let payload = message.payload.unwrap_or_default();

        Ok(RawMessage {
            id: message.id,
            subject: payload.header("Subject").unwrap_or_default().to_string(),
            sender: payload.header("From").unwrap_or_default().to_string(),
            date: payload.header("Date").unwrap_or_default().to_string(),
            body: body::extract_plain_text(&payload),
        })
    }
}
