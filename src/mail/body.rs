//! Plain-text extraction from provider MIME payload trees.
//!
//! Precedence: single-part text/plain > single-part text/html (stripped) >
//! first text/plain sub-part > first text/html sub-part (stripped) >
//! recursive descent into nested multiparts. Returns an empty string when
//! nothing is extractable; such messages are dropped downstream.

use std::sync::OnceLock;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use regex::Regex;
use serde::Deserialize;

/// A node in the provider's MIME payload tree.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub headers: Option<Vec<Header>>,
    #[serde(default)]
    pub body: Option<PartBody>,
    #[serde(default)]
    pub parts: Option<Vec<MessagePart>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartBody {
    #[serde(default)]
    pub data: Option<String>,
}

impl MessagePart {
    fn is_mime(&self, prefix: &str) -> bool {
        self.mime_type
            .as_deref()
            .map(|m| m.eq_ignore_ascii_case(prefix))
            .unwrap_or(false)
    }

    fn decoded_data(&self) -> Option<String> {
        let data = self.body.as_ref()?.data.as_deref()?;
        decode_base64url(data)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .as_ref()?
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}

/// Walk the payload tree and return the best-available plain text.
pub fn extract_plain_text(payload: &MessagePart) -> String {
    // Single-part messages carry their data directly on the payload node.
    if payload.parts.as_ref().map(|p| p.is_empty()).unwrap_or(true) {
        if payload.is_mime("text/plain") {
            return payload.decoded_data().unwrap_or_default();
        }
        if payload.is_mime("text/html") {
            return payload
                .decoded_data()
                .map(|html| strip_html(&html))
                .unwrap_or_default();
        }
        return String::new();
    }

    let parts = payload.parts.as_deref().unwrap_or(&[]);

    if let Some(text) = parts
        .iter()
        .find(|p| p.is_mime("text/plain"))
        .and_then(|p| p.decoded_data())
    {
        return text;
    }

    if let Some(html) = parts
        .iter()
        .find(|p| p.is_mime("text/html"))
        .and_then(|p| p.decoded_data())
    {
        return strip_html(&html);
    }

    // Nested multipart (e.g. multipart/alternative inside multipart/mixed)
    for part in parts.iter().filter(|p| p.parts.is_some()) {
        let text = extract_plain_text(part);
        if !text.is_empty() {
            return text;
        }
    }

    String::new()
}

/// Decode provider base64url body data. Tolerates padded input.
pub fn decode_base64url(data: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

fn style_script_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<(style|script)[^>]*>.*?</(style|script)>").unwrap())
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]+>").unwrap())
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

/// Best-effort HTML-to-text. The consumer is a language model, so noisy
/// output is acceptable; the goal is only to shed markup bulk.
pub fn strip_html(html: &str) -> String {
    let text = style_script_re().replace_all(html, " ");
    let text = tag_re().replace_all(&text, " ");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");
    whitespace_re().replace_all(&text, " ").trim().to_string()
}
