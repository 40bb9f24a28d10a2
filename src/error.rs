use thiserror::Error;

#[derive(Error, Debug)]
pub enum TallyError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    #[error("Account {0} not found")]
    AccountNotFound(i64),

    #[error("Parent account {0} not found")]
    ParentAccountNotFound(i64),

    #[error("Account cannot be its own parent")]
    SelfReferentialParent,

    #[error("Invalid institution name: {0:?}")]
    InvalidInstitutionName(String),

    #[error("Transfer source and destination are the same account")]
    SameAccountTransfer,

    #[error("Transfer amount must be positive")]
    NonPositiveTransferAmount,

    #[error("Batch of {0} rows exceeds the {1}-row limit")]
    BatchTooLarge(usize, usize),

    #[error("Suggestion {0} not found")]
    SuggestionNotFound(i64),

    #[error("Suggestion {0} was already rejected")]
    SuggestionRejected(i64),

    #[error("Ledger entry {0} not found")]
    EntryNotFound(i64),

    #[error("Upsert produced no row for fingerprint {0} (schema or constraint regression)")]
    UpsertInvariant(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TallyError>;
