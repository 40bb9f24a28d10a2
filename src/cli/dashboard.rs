use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::cli::{open_db, resolve_user};
use crate::error::Result;
use crate::fmt::money;
use crate::ledger::dashboard_summary;

pub fn run(user: Option<i64>, from: Option<&str>, to: Option<&str>) -> Result<()> {
    let conn = open_db()?;
    let summary = dashboard_summary(&conn, resolve_user(user), from, to)?;

    let net = summary.income_cents - summary.spending_cents;
    println!("{} entries", summary.entry_count);
    println!("Income:   {}", money(summary.income_cents).green());
    println!("Spending: {}", money(summary.spending_cents).red());
    println!(
        "Net:      {}",
        if net < 0 { money(net).red() } else { money(net).green() }
    );

    let mut table = Table::new();
    table.set_header(vec!["Account", "Balance"]);
    for balance in &summary.account_balances {
        table.add_row(vec![
            Cell::new(&balance.account_name),
            Cell::new(money(balance.balance_cents)),
        ]);
    }
    println!("\nBalances\n{table}");

    if !summary.card_debts.is_empty() {
        let mut table = Table::new();
        table.set_header(vec!["Card", "Owed"]);
        for debt in &summary.card_debts {
            table.add_row(vec![Cell::new(&debt.card_name), Cell::new(money(debt.debt_cents))]);
        }
        println!("\nCredit cards\n{table}");
    }
    Ok(())
}
