use comfy_table::{Cell, Table};

use crate::accounts::{create, find_or_create_institution, list_by_user, reparent};
use crate::cli::{open_db, resolve_user};
use crate::error::{Result, TallyError};
use crate::ledger::list_credit_card_accounts;
use crate::models::AccountType;

pub fn add(
    user: Option<i64>,
    name: &str,
    account_type: &str,
    institution: Option<&str>,
    parent: Option<i64>,
) -> Result<()> {
    let conn = open_db()?;
    let user_id = resolve_user(user);
    let account_type = AccountType::parse(account_type)
        .ok_or_else(|| TallyError::Other(format!("unknown account type: {account_type}")))?;
    let institution_id = match institution {
        Some(inst_name) => Some(find_or_create_institution(&conn, inst_name)?.id),
        None => None,
    };
    let account = create(&conn, user_id, name, account_type, institution_id, parent)?;
    println!("Added account {}: {}", account.id, account.name);
    Ok(())
}

pub fn list(user: Option<i64>) -> Result<()> {
    let conn = open_db()?;
    let accounts = list_by_user(&conn, resolve_user(user))?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "Name", "Type", "Parent", "Currency"]);
    for account in accounts {
        table.add_row(vec![
            Cell::new(account.id),
            Cell::new(&account.name),
            Cell::new(account.account_type),
            Cell::new(
                account
                    .parent_account_id
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
            ),
            Cell::new(&account.currency),
        ]);
    }
    println!("Accounts\n{table}");
    Ok(())
}

pub fn link(user: Option<i64>, id: i64, parent: i64) -> Result<()> {
    let conn = open_db()?;
    reparent(&conn, resolve_user(user), id, parent)?;
    println!("Account {id} now has parent {parent}");
    Ok(())
}

pub fn cards(user: Option<i64>) -> Result<()> {
    let conn = open_db()?;
    let cards = list_credit_card_accounts(&conn, resolve_user(user))?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "Name", "Pays From", "Currency"]);
    for card in cards {
        table.add_row(vec![
            Cell::new(card.id),
            Cell::new(&card.name),
            Cell::new(
                card.default_payment_account_id
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
            ),
            Cell::new(&card.currency),
        ]);
    }
    println!("Credit cards\n{table}");
    Ok(())
}
