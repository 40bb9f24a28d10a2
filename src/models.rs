use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

/// Generates a TEXT-backed enum: `as_str`/`parse` plus rusqlite glue so the
/// variants round-trip through the database without stringly-typed call sites.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }

            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($text => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let s = value.as_str()?;
                Self::parse(s).ok_or_else(|| {
                    FromSqlError::Other(format!("unknown {} value: {s}", stringify!($name)).into())
                })
            }
        }
    };
}

text_enum!(AccountType {
    Checking => "checking",
    Cash => "cash",
    Investment => "investment",
    Credit => "credit",
});

text_enum!(Direction {
    In => "IN",
    Out => "OUT",
});

impl Direction {
    pub fn opposite(&self) -> Self {
        match self {
            Self::In => Self::Out,
            Self::Out => Self::In,
        }
    }

    /// Sign convention: negative amounts leave the account.
    pub fn from_signed_cents(cents: i64) -> Self {
        if cents < 0 { Self::Out } else { Self::In }
    }
}

text_enum!(EntryType {
    Income => "income",
    Expense => "expense",
    Transfer => "transfer",
    CcPurchase => "cc_purchase",
    CcPayment => "cc_payment",
    Refund => "refund",
    Fee => "fee",
});

text_enum!(LegacyType {
    Income => "income",
    Expense => "expense",
    Transfer => "transfer",
});

text_enum!(ReconciliationStatus {
    Unmatched => "unmatched",
    Suggested => "suggested",
    Matched => "matched",
});

text_enum!(SuggestionStatus {
    Suggested => "suggested",
    Confirmed => "confirmed",
    Rejected => "rejected",
});

text_enum!(ImportKind {
    BankStatement => "BANK_STATEMENT",
    CcStatement => "CC_STATEMENT",
});

#[derive(Debug, Clone)]
pub struct Institution {
    pub id: i64,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone)]
pub struct Account {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub account_type: AccountType,
    pub institution_id: Option<i64>,
    pub parent_account_id: Option<i64>,
    pub currency: String,
}

#[derive(Debug, Clone)]
pub struct CreditCardAccount {
    pub id: i64,
    pub user_id: i64,
    pub institution_id: Option<i64>,
    pub name: String,
    pub currency: String,
    pub closing_day: Option<u32>,
    pub due_day: Option<u32>,
    pub default_payment_account_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub id: i64,
    pub user_id: i64,
    pub posted_at: String,
    pub amount_cents: i64,
    pub direction: Direction,
    pub entry_type: EntryType,
    pub description: String,
    pub merchant: Option<String>,
    pub account_id: Option<i64>,
    pub credit_card_account_id: Option<i64>,
    pub category_id: Option<i64>,
    pub import_source_id: Option<i64>,
    pub raw_transaction_id: Option<i64>,
    pub external_ref: Option<String>,
    pub fingerprint: String,
    pub transfer_group_id: Option<String>,
    pub transfer_peer_id: Option<i64>,
    pub reconciliation_status: ReconciliationStatus,
    pub transfer_fee_cents: i64,
}

/// Everything needed to write one ledger entry. Ids, peer linkage and write
/// timestamps are assigned by the write layer.
#[derive(Debug, Clone)]
pub struct EntryCandidate {
    pub user_id: i64,
    pub posted_at: String,
    pub amount_cents: i64,
    pub direction: Direction,
    pub entry_type: EntryType,
    pub description: String,
    pub merchant: Option<String>,
    pub account_id: Option<i64>,
    pub credit_card_account_id: Option<i64>,
    pub institution_id: Option<i64>,
    pub category_id: Option<i64>,
    pub import_source_id: Option<i64>,
    pub raw_transaction_id: Option<i64>,
    pub external_ref: Option<String>,
    pub transfer_group_id: Option<String>,
    pub reconciliation_status: ReconciliationStatus,
    pub transfer_fee_cents: i64,
}

impl EntryCandidate {
    pub fn new(
        user_id: i64,
        posted_at: &str,
        amount_cents: i64,
        direction: Direction,
        entry_type: EntryType,
        description: &str,
    ) -> Self {
        Self {
            user_id,
            posted_at: posted_at.to_string(),
            amount_cents: amount_cents.abs(),
            direction,
            entry_type,
            description: description.to_string(),
            merchant: None,
            account_id: None,
            credit_card_account_id: None,
            institution_id: None,
            category_id: None,
            import_source_id: None,
            raw_transaction_id: None,
            external_ref: None,
            transfer_group_id: None,
            reconciliation_status: ReconciliationStatus::Unmatched,
            transfer_fee_cents: 0,
        }
    }
}

/// One normalized statement row submitted to the import pipeline. Turning
/// raw bank exports into this shape is the statement parsers' job, not ours.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct RowInput {
    pub date: String,
    pub description: String,
    pub amount: String,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub merchant: Option<String>,
    #[serde(default)]
    pub account_id: Option<i64>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub transfer_account_id: Option<i64>,
    #[serde(default)]
    pub transfer_account: Option<String>,
    #[serde(default)]
    pub card_target_id: Option<i64>,
    #[serde(default)]
    pub category_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct LegacyTransaction {
    pub id: i64,
    pub user_id: i64,
    pub legacy_type: LegacyType,
    pub direction: Direction,
    pub amount_cents: i64,
    pub occurred_at: String,
    pub description: String,
    pub account_id: i64,
    pub transfer_account_id: Option<i64>,
    pub category_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_type_round_trip() {
        for t in [
            EntryType::Income,
            EntryType::Expense,
            EntryType::Transfer,
            EntryType::CcPurchase,
            EntryType::CcPayment,
            EntryType::Refund,
            EntryType::Fee,
        ] {
            assert_eq!(EntryType::parse(t.as_str()), Some(t));
        }
        assert_eq!(EntryType::parse("bogus"), None);
    }

    #[test]
    fn test_direction_from_signed_cents() {
        assert_eq!(Direction::from_signed_cents(-1200), Direction::Out);
        assert_eq!(Direction::from_signed_cents(1200), Direction::In);
        assert_eq!(Direction::from_signed_cents(0), Direction::In);
        assert_eq!(Direction::Out.opposite(), Direction::In);
    }

    #[test]
    fn test_import_kind_strings() {
        assert_eq!(ImportKind::BankStatement.as_str(), "BANK_STATEMENT");
        assert_eq!(ImportKind::parse("CC_STATEMENT"), Some(ImportKind::CcStatement));
    }

    #[test]
    fn test_candidate_stores_absolute_amount() {
        let c = EntryCandidate::new(1, "2025-01-15", -5000, Direction::Out, EntryType::Expense, "X");
        assert_eq!(c.amount_cents, 5000);
    }
}
