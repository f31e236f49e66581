//! Daily check-in codes.
//!
//! A code is derived from the batch id and the local calendar day, so a QR
//! code printed or displayed yesterday stops working today. The derivation is
//! a freshness hint. It does not authenticate anyone.

use chrono::NaiveDate;
use sha2::{Digest, Sha256};

use crate::clock::format_day;

const CODE_BYTES: usize = 4;
const CHECK_IN_PREFIX: &str = "/check-in/";

pub fn derive_code(batch_id: &str, date: NaiveDate) -> String {
    let mut hasher = Sha256::new();
    hasher.update(batch_id.as_bytes());
    hasher.update(b":");
    hasher.update(format_day(date).as_bytes());
    let digest = hasher.finalize();
    digest[..CODE_BYTES]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

pub fn is_code_valid(batch_id: &str, date: NaiveDate, presented: &str) -> bool {
    derive_code(batch_id, date) == presented
}

pub fn check_in_path(batch_id: &str, code: &str) -> String {
    format!("{}{}/{}", CHECK_IN_PREFIX, batch_id, code)
}

pub fn check_in_url(base_url: &str, batch_id: &str, code: &str) -> String {
    format!(
        "{}{}",
        base_url.trim().trim_end_matches('/'),
        check_in_path(batch_id, code)
    )
}

/// Accepts `/check-in/{batchId}/{code}` or a full URL ending in it.
pub fn parse_check_in_path(raw: &str) -> Option<(String, String)> {
    let raw = raw.trim();
    let without_query = raw.split(['?', '#']).next().unwrap_or(raw);
    let start = without_query.find(CHECK_IN_PREFIX)?;
    let rest = &without_query[start + CHECK_IN_PREFIX.len()..];
    let mut parts = rest.trim_end_matches('/').split('/');
    let batch_id = parts.next().filter(|s| !s.is_empty())?;
    let code = parts.next().filter(|s| !s.is_empty())?;
    if parts.next().is_some() {
        return None;
    }
    Some((batch_id.to_string(), code.to_string()))
}
