use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::models::{Direction, EntryCandidate, EntryType};

fn trailing_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Trailing reference/confirmation numbers vary between statement pulls
    // of the same event, so they must not reach the fingerprint.
    RE.get_or_init(|| Regex::new(r"[\s#*-]*(?:REF|CONF|ID)?[\s#:]*\d{5,}$").unwrap())
}

/// Canonical form of a statement description: uppercase, single spaces,
/// trailing reference numbers stripped.
pub fn normalize_description(raw: &str) -> String {
    let upper = raw.trim().to_uppercase();
    let collapsed = upper.split_whitespace().collect::<Vec<_>>().join(" ");
    trailing_ref_re().replace(&collapsed, "").trim().to_string()
}

pub fn normalize_merchant(raw: &str) -> Option<String> {
    let norm = normalize_description(raw);
    if norm.is_empty() { None } else { Some(norm) }
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Content fingerprint of a candidate ledger entry. Import-source and
/// raw-transaction linkage are deliberately excluded so that re-importing
/// the same statement produces colliding fingerprints.
pub fn fingerprint(candidate: &EntryCandidate) -> String {
    let account_part = match (candidate.account_id, candidate.credit_card_account_id) {
        (Some(id), _) => format!("a{id}"),
        (None, Some(id)) => format!("c{id}"),
        (None, None) => "-".to_string(),
    };
    let institution_part = candidate
        .institution_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string());
    let merchant_part = candidate.merchant.as_deref().unwrap_or("-");
    let canonical = format!(
        "{}|{}|{}|{}|{}|{}|{}|{}",
        candidate.posted_at,
        candidate.amount_cents.abs(),
        candidate.entry_type,
        candidate.direction,
        normalize_description(&candidate.description),
        merchant_part,
        account_part,
        institution_part,
    );
    sha256_hex(&canonical)
}

/// Shared base hash for the two legs of a transfer or card payment. Each leg
/// fingerprint gets a directional suffix so the legs dedup independently
/// while staying recognizably paired.
pub fn transfer_base_hash(
    posted_at: &str,
    amount_cents: i64,
    entry_type: EntryType,
    description: &str,
    source_key: &str,
    dest_key: &str,
) -> String {
    let canonical = format!(
        "{posted_at}|{}|{entry_type}|{}|{source_key}|{dest_key}",
        amount_cents.abs(),
        normalize_description(description),
    );
    sha256_hex(&canonical)
}

pub fn transfer_leg_fingerprint(base_hash: &str, direction: Direction) -> String {
    sha256_hex(&format!("{base_hash}|{direction}"))
}

/// Transfer group ids derive from the base hash so re-constructing the same
/// pair converges on the same group.
pub fn transfer_group_id(base_hash: &str) -> String {
    base_hash[..32].to_string()
}
