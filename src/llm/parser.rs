//! Batch transaction extraction from email bodies via the completion model.
//!
//! Emails go to the model in sub-batches; each reply is sanitized, decoded,
//! and filtered hard: only debits with a positive amount, a strict ISO date,
//! and a resolvable email index survive. A bad reply costs one sub-batch,
//! never the chunk.

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::error::AppError;
use crate::llm::CompletionClient;
use crate::mail::RawMessage;

/// Emails per model call.
pub const PARSE_BATCH_SIZE: usize = 10;
/// Body truncation before prompt inclusion. Bounds prompt size; long emails
/// may lose relevant text, accepted tradeoff.
pub const BODY_TRUNCATE_CHARS: usize = 1500;

/// One extracted spend, tied back to its source message.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTransaction {
    pub source_message_id: String,
    pub amount: f64,
    /// YYYY-MM-DD, already validated.
    pub date: String,
    pub description: String,
}

// -- model reply wire shape --

#[derive(Deserialize)]
struct ModelReply {
    #[serde(default)]
    transactions: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    #[serde(default)]
    email_index: Option<i64>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    /// Accepted as number or numeric string; models emit both.
    #[serde(default)]
    amount: Option<serde_json::Value>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

const PROMPT_HEADER: &str = "You are a bank-notification classifier. \
Analyze the numbered emails below and extract payment transactions.\n\
Respond with exactly one JSON object of the form \
{\"transactions\": [{\"email_index\": <1-based number of the email>, \
\"type\": \"debit\" | \"credit\" | \"not_a_transaction\", \
\"amount\": <number>, \"date\": \"YYYY-MM-DD\", \
\"description\": \"<merchant or payee only>\"}]}.\n\
The description must name only the merchant or payee. Omit banking \
boilerplate such as card numbers, reference numbers, UPI handles, and \
phrases like 'payment to' or 'debited from account'. \
Emails that are not payment notifications get type \"not_a_transaction\".\n";

/// Assemble the classification prompt for one sub-batch.
pub fn build_prompt(emails: &[RawMessage]) -> String {
    let mut prompt = String::from(PROMPT_HEADER);
    for (i, email) in emails.iter().enumerate() {
        prompt.push_str(&format!(
            "\n--- Email {} ---\nSubject: {}\nFrom: {}\nDate: {}\n{}\n",
            i + 1,
            email.subject,
            email.sender,
            email.date,
            truncate_chars(&email.body, BODY_TRUNCATE_CHARS),
        ));
    }
    prompt
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Strip an optional Markdown code fence (```json ... ``` or ``` ... ```)
/// wrapping the model reply.
pub fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

fn date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap())
}

fn amount_of(value: &serde_json::Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().replace(',', "").parse().ok()))
}

/// Classify one sub-batch with a single model call.
///
/// Keep conditions (all required): type == debit, amount > 0, strict
/// `YYYY-MM-DD` date, email index resolvable within this batch. Credits and
/// non-transactions are dropped, the pipeline tracks spending only.
pub async fn parse_batch(
    model: &dyn CompletionClient,
    emails: &[RawMessage],
) -> Result<Vec<ParsedTransaction>, AppError> {
    if emails.is_empty() {
        return Ok(Vec::new());
    }

    let prompt = build_prompt(emails);
    let reply = model.complete(&prompt).await?;
    let reply: ModelReply = serde_json::from_str(strip_code_fence(&reply))
        .map_err(|e| AppError::Model(format!("undecodable classifier reply: {e}")))?;

    let mut parsed = Vec::new();
    for entry in reply.transactions {
        let is_debit = entry
            .kind
            .as_deref()
            .map(|k| k.eq_ignore_ascii_case("debit"))
            .unwrap_or(false);
        if !is_debit {
            continue;
        }

        let Some(amount) = entry.amount.as_ref().and_then(amount_of) else {
            continue;
        };
        if amount <= 0.0 {
            continue;
        }

        let Some(date) = entry.date.filter(|d| date_re().is_match(d)) else {
            continue;
        };

        let index = entry.email_index.unwrap_or(0);
        if index < 1 || index as usize > emails.len() {
            continue;
        }

        let raw_description = entry.description.unwrap_or_default();
        parsed.push(ParsedTransaction {
            source_message_id: emails[index as usize - 1].id.clone(),
            amount,
            date,
            description: clean_description(&raw_description),
        });
    }
    Ok(parsed)
}

/// Classify a whole chunk, sub-batch by sub-batch. A failed sub-batch is
/// logged and skipped; its siblings still contribute.
pub async fn parse_chunk(
    model: &dyn CompletionClient,
    emails: &[RawMessage],
) -> Vec<ParsedTransaction> {
    let mut all = Vec::new();
    for (i, batch) in emails.chunks(PARSE_BATCH_SIZE).enumerate() {
        match parse_batch(model, batch).await {
            Ok(parsed) => all.extend(parsed),
            Err(e) => {
                tracing::warn!(
                    sub_batch = i + 1,
                    emails = batch.len(),
                    "Skipping sub-batch after classifier failure: {}",
                    e
                );
            }
        }
    }
    all
}

// ============================================================================
// Description cleanup
// ============================================================================

fn prefix_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        // Fixed order: UPI, card, bank transfer, POS/ATM, auto-pay,
        // bill payment, generic "payment to"
        [
            r"(?i)^upi(?:[/:\-]\s*|\s+)(?:payment\s+(?:to|for)\s+|txn\s+)?",
            r"(?i)^(?:debit|credit)\s+card\s+(?:(?:payment|purchase|transaction)\s+)?(?:(?:at|to|on)\s+)?",
            r"(?i)^(?:neft|imps|rtgs)(?:[/:\-]\s*|\s+)(?:to\s+)?",
            r"(?i)^(?:pos|atm)(?:\s+(?:wdl|withdrawal|purchase))?(?:[/:\-]\s*|\s+)",
            r"(?i)^auto[\s\-]?pay(?:ment)?\s+(?:(?:to|for)\s+)?",
            r"(?i)^bill\s+pay(?:ment)?\s+(?:(?:to|for|of)\s+)?",
            r"(?i)^pay(?:ment)?\s+(?:(?:made|sent)\s+)?to\s+",
        ]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
    })
}

fn ref_suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)[\s\-]*\(?(?:ref(?:erence)?|txn|utr|order)\s*(?:no\.?|number|id)?\s*[:#\-]?\s*[A-Za-z0-9]*\d[A-Za-z0-9]*\)?\s*$",
        )
        .unwrap()
    })
}

/// Strip banking jargon from a model-provided description: prefix patterns
/// in fixed order, then trailing reference-number suffixes, then first-letter
/// capitalization. Falls back to the raw string if cleanup empties it.
///
/// Idempotent on already-clean strings aside from capitalization.
pub fn clean_description(raw: &str) -> String {
    let mut text = raw.trim().to_string();
    for re in prefix_patterns() {
        text = re.replace(&text, "").trim_start().to_string();
    }
    text = ref_suffix_re().replace(&text, "").trim().to_string();

    if text.is_empty() {
        return raw.to_string();
    }
    capitalize_first(&text)
}

fn capitalize_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
