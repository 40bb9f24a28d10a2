use std::path::Path;

use colored::Colorize;

use crate::accounts::{list_by_user, resolve_by_name, NameResolution};
use crate::cli::{open_db, resolve_user};
use crate::error::{Result, TallyError};
use crate::models::{ImportKind, RowInput};
use crate::pipeline::{commit, file_checksum, ImportOptions};
use crate::settings::load_settings;

fn parse_kind(kind: &str) -> Result<ImportKind> {
    match kind {
        "bank" => Ok(ImportKind::BankStatement),
        "cc" => Ok(ImportKind::CcStatement),
        other => Err(TallyError::Other(format!(
            "unknown statement kind: {other} (expected bank or cc)"
        ))),
    }
}

fn read_rows(path: &Path) -> Result<Vec<RowInput>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?;
    let mut rows = Vec::new();
    for record in reader.deserialize() {
        rows.push(record?);
    }
    Ok(rows)
}

/// A `--account` flag is a raw id when numeric, a name hint otherwise.
fn resolve_account_flag(
    conn: &rusqlite::Connection,
    user_id: i64,
    flag: &str,
) -> Result<i64> {
    if let Ok(id) = flag.parse::<i64>() {
        return Ok(id);
    }
    let accounts = list_by_user(conn, user_id)?;
    match resolve_by_name(&accounts, flag) {
        NameResolution::Match(account) => Ok(account.id),
        NameResolution::NoUniqueMatch => Err(TallyError::Other(format!(
            "account name '{flag}' matches more than one account"
        ))),
        NameResolution::NotFound => Err(TallyError::UnknownAccount(flag.to_string())),
    }
}

pub fn run(
    user: Option<i64>,
    file: &str,
    kind: &str,
    institution: Option<&str>,
    account: Option<&str>,
    card: Option<i64>,
    keep_payment_lines: bool,
) -> Result<()> {
    let path = Path::new(file);
    let mut conn = open_db()?;
    let user_id = resolve_user(user);
    let settings = load_settings();

    let rows = read_rows(path)?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| file.to_string());

    let mut options = ImportOptions::new(parse_kind(kind)?, &filename);
    options.institution = institution.map(|s| s.to_string());
    options.default_account_id = match account {
        Some(flag) => Some(resolve_account_flag(&conn, user_id, flag)?),
        None => settings.default_account_id,
    };
    options.target_account_id = card;
    options.skip_credit_payment_lines = !keep_payment_lines && settings.skip_credit_payment_lines;
    options.file_hash = Some(file_checksum(path)?);

    let outcome = commit(&mut conn, user_id, &rows, &options, None)?;

    if outcome.duplicate_file {
        println!("This file has already been imported (duplicate checksum).");
        return Ok(());
    }

    println!(
        "{} imported, {} skipped ({} already in ledger, {} repeated in file, {} invalid)",
        outcome.imported,
        outcome.skipped,
        outcome.db_duplicates,
        outcome.payload_duplicates,
        outcome.invalid_rows,
    );
    if let Some((from, to)) = &outcome.date_range {
        println!("Statement covers {from} to {to}");
    }
    for warning in &outcome.warnings {
        println!("{} {warning}", "warning:".yellow());
    }
    Ok(())
}
