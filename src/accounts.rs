use rusqlite::{Connection, OptionalExtension, Row};

use crate::error::{Result, TallyError};
use crate::models::{Account, AccountType, CreditCardAccount, Institution};

// ---------------------------------------------------------------------------
// Institutions
// ---------------------------------------------------------------------------

/// Name-derived slug used to dedup institutions: lowercase alphanumerics
/// with single dashes. An empty slug means the name was unusable.
pub fn slugify(name: &str) -> Result<String> {
    let mut slug = String::new();
    let mut last_dash = true;
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        return Err(TallyError::InvalidInstitutionName(name.to_string()));
    }
    Ok(slug)
}

pub fn find_or_create_institution(conn: &Connection, name: &str) -> Result<Institution> {
    let slug = slugify(name)?;
    conn.execute(
        "INSERT OR IGNORE INTO institutions (name, slug) VALUES (?1, ?2)",
        rusqlite::params![name.trim(), slug],
    )?;
    let inst = conn.query_row(
        "SELECT id, name, slug FROM institutions WHERE slug = ?1",
        [&slug],
        |row| {
            Ok(Institution {
                id: row.get(0)?,
                name: row.get(1)?,
                slug: row.get(2)?,
            })
        },
    )?;
    Ok(inst)
}

// ---------------------------------------------------------------------------
// Account store
// ---------------------------------------------------------------------------

fn map_account(row: &Row) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        account_type: row.get(3)?,
        institution_id: row.get(4)?,
        parent_account_id: row.get(5)?,
        currency: row.get(6)?,
    })
}

const ACCOUNT_COLS: &str =
    "id, user_id, name, account_type, institution_id, parent_account_id, currency";

pub fn list_by_user(conn: &Connection, user_id: i64) -> Result<Vec<Account>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ACCOUNT_COLS} FROM accounts WHERE user_id = ?1 ORDER BY name"
    ))?;
    let rows = stmt
        .query_map([user_id], map_account)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn find_by_id(conn: &Connection, user_id: i64, id: i64) -> Result<Option<Account>> {
    let account = conn
        .query_row(
            &format!("SELECT {ACCOUNT_COLS} FROM accounts WHERE user_id = ?1 AND id = ?2"),
            [user_id, id],
            map_account,
        )
        .optional()?;
    Ok(account)
}

pub fn create(
    conn: &Connection,
    user_id: i64,
    name: &str,
    account_type: AccountType,
    institution_id: Option<i64>,
    parent_account_id: Option<i64>,
) -> Result<Account> {
    if let Some(parent_id) = parent_account_id {
        if find_by_id(conn, user_id, parent_id)?.is_none() {
            return Err(TallyError::ParentAccountNotFound(parent_id));
        }
    }
    conn.execute(
        "INSERT INTO accounts (user_id, name, account_type, institution_id, parent_account_id) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![user_id, name, account_type, institution_id, parent_account_id],
    )?;
    let id = conn.last_insert_rowid();
    find_by_id(conn, user_id, id)?.ok_or(TallyError::AccountNotFound(id))
}

pub fn reparent(conn: &Connection, user_id: i64, account_id: i64, parent_id: i64) -> Result<()> {
    if account_id == parent_id {
        return Err(TallyError::SelfReferentialParent);
    }
    if find_by_id(conn, user_id, parent_id)?.is_none() {
        return Err(TallyError::ParentAccountNotFound(parent_id));
    }
    let updated = conn.execute(
        "UPDATE accounts SET parent_account_id = ?1 WHERE user_id = ?2 AND id = ?3",
        rusqlite::params![parent_id, user_id, account_id],
    )?;
    if updated == 0 {
        return Err(TallyError::AccountNotFound(account_id));
    }
    Ok(())
}

/// How a name hint resolved against the user's accounts. "No unique match"
/// is a first-class outcome so batch processing can count it instead of
/// aborting.
#[derive(Debug)]
pub enum NameResolution {
    Match(Account),
    NoUniqueMatch,
    NotFound,
}

/// Exact match first, then a unique case-insensitive/substring match.
pub fn resolve_by_name(accounts: &[Account], hint: &str) -> NameResolution {
    let hint = hint.trim();
    if hint.is_empty() {
        return NameResolution::NotFound;
    }
    if let Some(acct) = accounts.iter().find(|a| a.name == hint) {
        return NameResolution::Match(acct.clone());
    }
    let hint_upper = hint.to_uppercase();
    let fuzzy: Vec<&Account> = accounts
        .iter()
        .filter(|a| {
            let name_upper = a.name.to_uppercase();
            name_upper == hint_upper
                || name_upper.contains(&hint_upper)
                || hint_upper.contains(&name_upper)
        })
        .collect();
    match fuzzy.as_slice() {
        [one] => NameResolution::Match((*one).clone()),
        [] => NameResolution::NotFound,
        _ => NameResolution::NoUniqueMatch,
    }
}

/// Whether an account name reads like a credit product. Used when routing
/// card payments and credit invoices by institution.
pub fn name_hints_credit_product(name: &str) -> bool {
    let upper = name.to_uppercase();
    ["CARD", "CREDIT", "VISA", "MASTERCARD", "AMEX"]
        .iter()
        .any(|token| upper.contains(token))
}

// ---------------------------------------------------------------------------
// Credit-card mirror accounts
// ---------------------------------------------------------------------------

fn map_card(row: &Row) -> rusqlite::Result<CreditCardAccount> {
    Ok(CreditCardAccount {
        id: row.get(0)?,
        user_id: row.get(1)?,
        institution_id: row.get(2)?,
        name: row.get(3)?,
        currency: row.get(4)?,
        closing_day: row.get(5)?,
        due_day: row.get(6)?,
        default_payment_account_id: row.get(7)?,
    })
}

const CARD_COLS: &str = "id, user_id, institution_id, name, currency, closing_day, due_day, \
                         default_payment_account_id";

pub fn list_card_mirrors(conn: &Connection, user_id: i64) -> Result<Vec<CreditCardAccount>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CARD_COLS} FROM credit_card_accounts WHERE user_id = ?1 ORDER BY name"
    ))?;
    let rows = stmt
        .query_map([user_id], map_card)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn find_card_by_id(conn: &Connection, user_id: i64, id: i64) -> Result<Option<CreditCardAccount>> {
    let card = conn
        .query_row(
            &format!("SELECT {CARD_COLS} FROM credit_card_accounts WHERE user_id = ?1 AND id = ?2"),
            [user_id, id],
            map_card,
        )
        .optional()?;
    Ok(card)
}

/// Find-or-create the ledger-side mirror of a credit-type account. The
/// mirror carries the card's institution and, when the legacy account is
/// parented to a checking account, that parent as the default payment
/// source. Returns the mirror and whether this call created it.
pub fn resolve_card_mirror(
    conn: &Connection,
    credit_account: &Account,
) -> Result<(CreditCardAccount, bool)> {
    let existing = conn
        .query_row(
            &format!("SELECT {CARD_COLS} FROM credit_card_accounts WHERE user_id = ?1 AND name = ?2"),
            rusqlite::params![credit_account.user_id, credit_account.name],
            map_card,
        )
        .optional()?;
    if let Some(card) = existing {
        return Ok((card, false));
    }
    conn.execute(
        "INSERT INTO credit_card_accounts \
         (user_id, institution_id, name, currency, default_payment_account_id) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            credit_account.user_id,
            credit_account.institution_id,
            credit_account.name,
            credit_account.currency,
            credit_account.parent_account_id,
        ],
    )?;
    let id = conn.last_insert_rowid();
    let card = find_card_by_id(conn, credit_account.user_id, id)?
        .ok_or(TallyError::AccountNotFound(id))?;
    Ok((card, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{add_account, test_db};

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Bank of America").unwrap(), "bank-of-america");
        assert_eq!(slugify("  Chase! ").unwrap(), "chase");
        assert!(matches!(slugify("***"), Err(TallyError::InvalidInstitutionName(_))));
    }

    #[test]
    fn test_find_or_create_institution_dedups_by_slug() {
        let (_dir, conn) = test_db();
        let a = find_or_create_institution(&conn, "Bank of America").unwrap();
        let b = find_or_create_institution(&conn, "bank OF america").unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.name, "Bank of America");
    }

    #[test]
    fn test_create_rejects_missing_parent() {
        let (_dir, conn) = test_db();
        let err = create(&conn, 1, "Card", AccountType::Credit, None, Some(999)).unwrap_err();
        assert!(matches!(err, TallyError::ParentAccountNotFound(999)));
    }

    #[test]
    fn test_reparent_rejects_self() {
        let (_dir, conn) = test_db();
        let id = add_account(&conn, 1, "Checking", AccountType::Checking);
        let err = reparent(&conn, 1, id, id).unwrap_err();
        assert!(matches!(err, TallyError::SelfReferentialParent));
    }

    #[test]
    fn test_resolve_by_name() {
        let (_dir, conn) = test_db();
        add_account(&conn, 1, "BofA Checking", AccountType::Checking);
        add_account(&conn, 1, "BofA Card", AccountType::Credit);
        let accounts = list_by_user(&conn, 1).unwrap();

        assert!(matches!(resolve_by_name(&accounts, "BofA Checking"), NameResolution::Match(_)));
        assert!(matches!(resolve_by_name(&accounts, "bofa checking"), NameResolution::Match(_)));
        assert!(matches!(resolve_by_name(&accounts, "Card"), NameResolution::Match(_)));
        assert!(matches!(resolve_by_name(&accounts, "BofA"), NameResolution::NoUniqueMatch));
        assert!(matches!(resolve_by_name(&accounts, "Chase"), NameResolution::NotFound));
    }

    #[test]
    fn test_resolve_card_mirror_is_lazy_and_idempotent() {
        let (_dir, conn) = test_db();
        let parent = add_account(&conn, 1, "Main Checking", AccountType::Checking);
        let card_acct_id = add_account(&conn, 1, "Rewards Card", AccountType::Credit);
        conn.execute(
            "UPDATE accounts SET parent_account_id = ?1 WHERE id = ?2",
            [parent, card_acct_id],
        )
        .unwrap();
        let credit = find_by_id(&conn, 1, card_acct_id).unwrap().unwrap();

        let (mirror, created) = resolve_card_mirror(&conn, &credit).unwrap();
        assert!(created);
        assert_eq!(mirror.name, "Rewards Card");
        assert_eq!(mirror.default_payment_account_id, Some(parent));

        let (again, created_again) = resolve_card_mirror(&conn, &credit).unwrap();
        assert!(!created_again);
        assert_eq!(again.id, mirror.id);
    }

    #[test]
    fn test_name_hints_credit_product() {
        assert!(name_hints_credit_product("BofA Travel Card"));
        assert!(name_hints_credit_product("CHASE VISA"));
        assert!(!name_hints_credit_product("Main Checking"));
    }
}
