use comfy_table::{Cell, Table};

use crate::cli::{open_db, resolve_user};
use crate::error::Result;
use crate::fmt::money;
use crate::ledger::review_inbox;

pub fn run(user: Option<i64>) -> Result<()> {
    let conn = open_db()?;
    let inbox = review_inbox(&conn, resolve_user(user))?;

    if inbox.suggestions.is_empty() && inbox.unmatched_card_payments.is_empty() {
        println!("Inbox zero. Nothing needs review.");
        return Ok(());
    }

    if !inbox.suggestions.is_empty() {
        println!(
            "{} transfer suggestion(s) open. Run `tally reconcile list` to review them.",
            inbox.suggestions.len()
        );
    }

    if !inbox.unmatched_card_payments.is_empty() {
        let mut table = Table::new();
        table.set_header(vec!["Entry", "Date", "Account", "Description", "Amount"]);
        for p in &inbox.unmatched_card_payments {
            table.add_row(vec![
                Cell::new(p.entry_id),
                Cell::new(&p.posted_at),
                Cell::new(p.account_name.as_deref().unwrap_or_default()),
                Cell::new(&p.description),
                Cell::new(money(p.amount_cents)),
            ]);
        }
        println!("Card payments with no card\n{table}");
    }
    Ok(())
}
