//! Candidate-message discovery: keyword search over the mailbox in a date
//! window, paginated, capped, and deduplicated against the processed ledger.

use std::collections::HashSet;

use chrono::{Months, NaiveDate, Utc};

use crate::error::AppError;
use crate::mail::MailClient;

/// Provider page size per search request.
pub const PAGE_SIZE: u32 = 100;
/// Hard cap on IDs collected per run. Bounds first-run latency and memory on
/// large mailboxes.
pub const MAX_SCAN_IDS: usize = 500;

/// Fixed keyword disjunction for bank/payment notification mail.
const SEARCH_KEYWORDS: &str =
    "(transaction OR debited OR credited OR payment OR UPI OR alert OR spent OR withdrawn)";

#[derive(Debug, Clone)]
pub struct ScanOutcome {
    /// Unprocessed IDs, in provider order.
    pub new_ids: Vec<String>,
    /// IDs the search returned before dedup.
    pub total_found: usize,
    pub skipped_dupes: usize,
}

/// Build the provider query: keyword disjunction AND a date lower bound.
/// An absolute `after:` date is used because relative "last N months"
/// filters were observed unreliable.
pub fn build_query(after: NaiveDate) -> String {
    format!("{} after:{}", SEARCH_KEYWORDS, after.format("%Y/%m/%d"))
}

/// Fixed 6-month lookback used when no checkpoint exists.
pub fn default_lookback(today: NaiveDate) -> NaiveDate {
    today.checked_sub_months(Months::new(6)).unwrap_or(today)
}

/// Split found IDs into new vs already-processed. Pure so the set algebra
/// (`new_ids = found \ processed`) is directly testable.
pub fn partition_new(found: Vec<String>, processed: &HashSet<String>) -> ScanOutcome {
    let total_found = found.len();
    let new_ids: Vec<String> = found
        .into_iter()
        .filter(|id| !processed.contains(id))
        .collect();
    let skipped_dupes = total_found - new_ids.len();
    ScanOutcome {
        new_ids,
        total_found,
        skipped_dupes,
    }
}

/// Scan the mailbox for candidate message IDs.
///
/// Paginates until exhaustion or [`MAX_SCAN_IDS`], then drops IDs already in
/// the ledger. Provider errors propagate classified (auth / scope / generic);
/// there is no retry at this layer.
pub async fn scan(
    client: &dyn MailClient,
    token: &str,
    after_date: Option<NaiveDate>,
    processed: &HashSet<String>,
) -> Result<ScanOutcome, AppError> {
    let after = after_date.unwrap_or_else(|| default_lookback(Utc::now().date_naive()));
    let query = build_query(after);

    let mut found: Vec<String> = Vec::new();
    let mut page_token: Option<String> = None;

    loop {
        let page = client
            .search_ids(token, &query, PAGE_SIZE, page_token.as_deref())
            .await?;
        found.extend(page.ids);

        if found.len() >= MAX_SCAN_IDS {
            found.truncate(MAX_SCAN_IDS);
            break;
        }
        match page.next_page_token {
            Some(next) => page_token = Some(next),
            None => break,
        }
    }

    let outcome = partition_new(found, processed);
    tracing::info!(
        total_found = outcome.total_found,
        new = outcome.new_ids.len(),
        skipped_dupes = outcome.skipped_dupes,
        after = %after,
        "Mailbox scan complete"
    );
    Ok(outcome)
}
