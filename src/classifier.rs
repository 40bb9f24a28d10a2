use std::sync::OnceLock;

use regex::Regex;

use crate::models::{AccountType, Direction, EntryType, LegacyType};

/// Outcome of classifying one raw row or legacy record. `Excluded` means the
/// row is intentionally left out of the ledger; it is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Entry(EntryType),
    Excluded,
}

/// Maps (money account type, coarse legacy type, direction, card-payment
/// hint) to a ledger entry type. Kept as one exhaustive match so the
/// compiler proves every combination has a tabulated answer.
pub fn classify(
    account_type: AccountType,
    legacy_type: LegacyType,
    direction: Direction,
    card_payment_hint: bool,
) -> Classification {
    use AccountType::*;
    use Classification::*;
    use LegacyType::*;

    match (account_type, legacy_type, direction, card_payment_hint) {
        // The credit-side leg of a transfer is not separately modeled.
        (Credit, Transfer, _, _) => Excluded,
        (Checking | Cash, Transfer, Direction::Out, true) => Entry(EntryType::CcPayment),
        (Checking | Cash, Transfer, _, _) => Entry(EntryType::Transfer),
        (Investment, Transfer, _, _) => Entry(EntryType::Transfer),
        (Credit, Income, _, _) => Entry(EntryType::Refund),
        (Checking | Cash | Investment, Income, _, _) => Entry(EntryType::Income),
        (Credit, Expense, _, _) => Entry(EntryType::CcPurchase),
        (Checking | Cash | Investment, Expense, _, _) => Entry(EntryType::Expense),
    }
}

fn card_payment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(invoice payment|card payment|credit card pmt|credit crd e?pmt|payment to (credit )?card|cc payment|card autopay|pay(ment)? cc)\b",
        )
        .unwrap()
    })
}

/// Detects card payments that were not pre-flagged: applied to the
/// normalized description of outgoing checking/cash rows.
pub fn looks_like_card_payment(description: &str) -> bool {
    card_payment_re().is_match(description)
}

fn credit_side_payment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(payment received|payment - thank you|payment thank you|online payment received)\b")
            .unwrap()
    })
}

/// The inbound half of a card payment as it appears on a credit-card
/// statement. Narrower than `looks_like_card_payment` on purpose: it only
/// fires for credit-account imports, where the checking side already
/// captured the event.
pub fn is_credit_side_payment_line(description: &str) -> bool {
    credit_side_payment_re().is_match(description)
}
