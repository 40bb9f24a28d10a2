use comfy_table::{Cell, Table};

use crate::cli::{open_db, resolve_user};
use crate::error::Result;
use crate::fmt::money;
use crate::ledger::review_inbox;
use crate::matcher::{confirm_suggestion, link_card_payment, reject_suggestion, suggest_transfers};

pub fn suggest(user: Option<i64>) -> Result<()> {
    let mut conn = open_db()?;
    let outcome = suggest_transfers(&mut conn, resolve_user(user))?;
    println!(
        "{} outgoing entr(ies) examined, {} new suggestion(s)",
        outcome.examined, outcome.suggestions_created
    );
    if outcome.suggestions_created > 0 {
        println!("Run `tally reconcile list` to review them.");
    }
    Ok(())
}

pub fn list(user: Option<i64>) -> Result<()> {
    let conn = open_db()?;
    let inbox = review_inbox(&conn, resolve_user(user))?;

    if inbox.suggestions.is_empty() {
        println!("No open suggestions.");
        return Ok(());
    }
    let mut table = Table::new();
    table.set_header(vec!["ID", "Score", "Amount", "Out", "In"]);
    for s in &inbox.suggestions {
        table.add_row(vec![
            Cell::new(s.suggestion_id),
            Cell::new(s.score),
            Cell::new(money(s.amount_cents)),
            Cell::new(format!("{} {} ({})", s.out_posted_at, s.out_description, s.out_account)),
            Cell::new(format!("{} {} ({})", s.in_posted_at, s.in_description, s.in_account)),
        ]);
    }
    println!("Transfer suggestions\n{table}");
    Ok(())
}

pub fn confirm(user: Option<i64>, id: i64) -> Result<()> {
    let mut conn = open_db()?;
    confirm_suggestion(&mut conn, resolve_user(user), id)?;
    println!("Suggestion {id} confirmed; entries linked as a transfer.");
    Ok(())
}

pub fn reject(user: Option<i64>, id: i64, reason: Option<&str>) -> Result<()> {
    let mut conn = open_db()?;
    reject_suggestion(&mut conn, resolve_user(user), id, reason)?;
    println!("Suggestion {id} rejected; the pair will not be suggested again.");
    Ok(())
}

pub fn link_card(user: Option<i64>, entry: i64, card: i64) -> Result<()> {
    let conn = open_db()?;
    link_card_payment(&conn, resolve_user(user), entry, card)?;
    println!("Entry {entry} linked to card {card}.");
    Ok(())
}
