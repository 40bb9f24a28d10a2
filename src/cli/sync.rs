use colored::Colorize;

use crate::cli::{open_db, resolve_user};
use crate::error::Result;
use crate::sync::sync_legacy;

pub fn run(user: Option<i64>) -> Result<()> {
    let mut conn = open_db()?;
    let outcome = sync_legacy(&mut conn, resolve_user(user))?;

    println!(
        "{} legacy record(s) scanned: {} created, {} replaced, {} unchanged, {} deleted, {} skipped",
        outcome.scanned,
        outcome.created,
        outcome.replaced,
        outcome.unchanged,
        outcome.deleted,
        outcome.skipped,
    );
    for warning in &outcome.warnings {
        println!("{} {warning}", "warning:".yellow());
    }
    Ok(())
}
