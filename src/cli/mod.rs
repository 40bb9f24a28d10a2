pub mod accounts;
pub mod backup;
pub mod dashboard;
pub mod import;
pub mod inbox;
pub mod init;
pub mod reconcile;
pub mod status;
pub mod sync;

use clap::{Parser, Subcommand};
use rusqlite::Connection;

use crate::error::Result;
use crate::settings::{get_data_dir, load_settings};

pub const DB_FILE: &str = "tally.db";

pub(crate) fn open_db() -> Result<Connection> {
    crate::db::get_connection(&get_data_dir().join(DB_FILE))
}

pub(crate) fn resolve_user(flag: Option<i64>) -> i64 {
    flag.unwrap_or_else(|| load_settings().user_id)
}

#[derive(Parser)]
#[command(name = "tally", about = "Ledger normalization and reconciliation for personal finances.")]
pub struct Cli {
    /// Act as this user id (default: settings.json)
    #[arg(long, global = true)]
    pub user: Option<i64>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Set up Tally: choose a data directory and initialize the database.
    Init {
        /// Path for Tally data (default: ~/Documents/tally)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },
    /// Manage money accounts and credit-card mirrors.
    Accounts {
        #[command(subcommand)]
        command: AccountsCommands,
    },
    /// Import a CSV statement through the normalization pipeline.
    Import {
        /// Path to the CSV file
        file: String,
        /// Statement kind: bank, cc
        #[arg(long, default_value = "bank")]
        kind: String,
        /// Institution name for this statement
        #[arg(long)]
        institution: Option<String>,
        /// Default account for rows without an account column (name or id)
        #[arg(long)]
        account: Option<String>,
        /// Credit account to route a card-invoice document to (id)
        #[arg(long)]
        card: Option<i64>,
        /// Keep credit-side "payment received" lines instead of skipping them
        #[arg(long = "keep-payment-lines")]
        keep_payment_lines: bool,
    },
    /// Mirror legacy transactions onto the ledger.
    Sync,
    /// Find, confirm or reject cross-account transfer matches.
    Reconcile {
        #[command(subcommand)]
        command: ReconcileCommands,
    },
    /// Income, spending and balances at a glance.
    Dashboard {
        /// Start date: YYYY-MM-DD
        #[arg(long)]
        from: Option<String>,
        /// End date: YYYY-MM-DD
        #[arg(long)]
        to: Option<String>,
    },
    /// Items waiting on a human: open suggestions and unrouted card payments.
    Inbox,
    /// Back up the database.
    Backup {
        /// Output path (default: <data_dir>/backups/tally-YYYYMMDD-HHMMSS.db)
        #[arg(long)]
        output: Option<String>,
    },
    /// Show current database and summary statistics.
    Status,
}

#[derive(Subcommand)]
pub enum AccountsCommands {
    /// Add a money account.
    Add {
        /// Account name, e.g. 'BofA Checking'
        name: String,
        /// Account type: checking, cash, investment, credit
        #[arg(long = "type")]
        account_type: String,
        /// Institution name
        #[arg(long)]
        institution: Option<String>,
        /// Parent account id (for credit accounts, the paying account)
        #[arg(long)]
        parent: Option<i64>,
    },
    /// List all money accounts.
    List,
    /// Set an account's parent (e.g. the checking account a card pays from).
    Link {
        /// Account id to reparent
        id: i64,
        /// New parent account id
        #[arg(long)]
        parent: i64,
    },
    /// List credit-card mirror accounts.
    Cards,
}

#[derive(Subcommand)]
pub enum ReconcileCommands {
    /// Scan unmatched entries for plausible transfer pairs.
    Suggest,
    /// List open suggestions.
    List,
    /// Confirm a suggestion and link the pair as a transfer.
    Confirm {
        /// Suggestion id (shown in `tally reconcile list`)
        id: i64,
    },
    /// Reject a suggestion; the pair will not be suggested again.
    Reject {
        /// Suggestion id (shown in `tally reconcile list`)
        id: i64,
        /// Why this is not a transfer
        #[arg(long)]
        reason: Option<String>,
    },
    /// Attach an unmatched card payment to its card.
    LinkCard {
        /// Ledger entry id (shown in `tally inbox`)
        entry: i64,
        /// Credit card id (shown in `tally accounts cards`)
        #[arg(long)]
        card: i64,
    },
}
