use rusqlite::{Connection, OptionalExtension, Row};

use crate::error::{Result, TallyError};
use crate::fingerprint::{
    fingerprint, normalize_description, transfer_base_hash, transfer_group_id,
    transfer_leg_fingerprint,
};
use crate::models::{
    Direction, EntryCandidate, EntryType, LedgerEntry, ReconciliationStatus,
};

pub const ENTRY_COLS: &str = "id, user_id, posted_at, amount_cents, direction, entry_type, \
    description, merchant, account_id, credit_card_account_id, category_id, import_source_id, \
    raw_transaction_id, external_ref, fingerprint, transfer_group_id, transfer_peer_id, \
    reconciliation_status, transfer_fee_cents";

pub fn map_entry(row: &Row) -> rusqlite::Result<LedgerEntry> {
    Ok(LedgerEntry {
        id: row.get(0)?,
        user_id: row.get(1)?,
        posted_at: row.get(2)?,
        amount_cents: row.get(3)?,
        direction: row.get(4)?,
        entry_type: row.get(5)?,
        description: row.get(6)?,
        merchant: row.get(7)?,
        account_id: row.get(8)?,
        credit_card_account_id: row.get(9)?,
        category_id: row.get(10)?,
        import_source_id: row.get(11)?,
        raw_transaction_id: row.get(12)?,
        external_ref: row.get(13)?,
        fingerprint: row.get(14)?,
        transfer_group_id: row.get(15)?,
        transfer_peer_id: row.get(16)?,
        reconciliation_status: row.get(17)?,
        transfer_fee_cents: row.get(18)?,
    })
}

pub fn find_entry(conn: &Connection, user_id: i64, id: i64) -> Result<Option<LedgerEntry>> {
    let entry = conn
        .query_row(
            &format!("SELECT {ENTRY_COLS} FROM ledger_entries WHERE user_id = ?1 AND id = ?2"),
            [user_id, id],
            map_entry,
        )
        .optional()?;
    Ok(entry)
}

pub fn find_by_fingerprint(conn: &Connection, user_id: i64, fp: &str) -> Result<Option<LedgerEntry>> {
    let entry = conn
        .query_row(
            &format!("SELECT {ENTRY_COLS} FROM ledger_entries WHERE user_id = ?1 AND fingerprint = ?2"),
            rusqlite::params![user_id, fp],
            map_entry,
        )
        .optional()?;
    Ok(entry)
}

pub fn find_by_external_ref(conn: &Connection, user_id: i64, external_ref: &str) -> Result<Option<LedgerEntry>> {
    let entry = conn
        .query_row(
            &format!("SELECT {ENTRY_COLS} FROM ledger_entries WHERE user_id = ?1 AND external_ref = ?2"),
            rusqlite::params![user_id, external_ref],
            map_entry,
        )
        .optional()?;
    Ok(entry)
}

pub fn fingerprint_exists(conn: &Connection, user_id: i64, fp: &str) -> Result<bool> {
    let mut stmt = conn
        .prepare_cached("SELECT 1 FROM ledger_entries WHERE user_id = ?1 AND fingerprint = ?2")?;
    Ok(stmt.exists(rusqlite::params![user_id, fp])?)
}

// ---------------------------------------------------------------------------
// Idempotent writes
// ---------------------------------------------------------------------------

pub struct UpsertOutcome {
    pub entry: LedgerEntry,
    pub created: bool,
}

fn insert_entry(conn: &Connection, candidate: &EntryCandidate, fp: &str) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO ledger_entries \
         (user_id, posted_at, amount_cents, direction, entry_type, description, merchant, \
          account_id, credit_card_account_id, category_id, import_source_id, raw_transaction_id, \
          external_ref, fingerprint, transfer_group_id, reconciliation_status, transfer_fee_cents) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        rusqlite::params![
            candidate.user_id,
            candidate.posted_at,
            candidate.amount_cents.abs(),
            candidate.direction,
            candidate.entry_type,
            normalize_description(&candidate.description),
            candidate.merchant,
            candidate.account_id,
            candidate.credit_card_account_id,
            candidate.category_id,
            candidate.import_source_id,
            candidate.raw_transaction_id,
            candidate.external_ref,
            fp,
            candidate.transfer_group_id,
            candidate.reconciliation_status,
            candidate.transfer_fee_cents,
        ],
    )?;
    Ok(inserted == 1)
}

/// Insert-or-ignore keyed on UNIQUE(user_id, fingerprint); on conflict the
/// existing row is read back. Every ingestion path goes through here, which
/// is what makes re-imports idempotent without a check-then-act race.
pub fn upsert_ledger_entry(conn: &Connection, candidate: &EntryCandidate) -> Result<UpsertOutcome> {
    let fp = fingerprint(candidate);
    let created = insert_entry(conn, candidate, &fp)?;
    match find_by_fingerprint(conn, candidate.user_id, &fp)? {
        Some(entry) => Ok(UpsertOutcome { entry, created }),
        // Insert no-oped and read-back found nothing: constraint regression.
        None => Err(TallyError::UpsertInvariant(fp)),
    }
}

/// Destination of a transfer pair's IN leg: a sibling money account for
/// ordinary transfers, a card mirror for card payments.
#[derive(Debug, Clone, Copy)]
pub enum TransferDestination {
    Account(i64),
    CreditCard(i64),
}

#[derive(Debug, Clone)]
pub struct TransferPairSpec {
    pub user_id: i64,
    pub posted_at: String,
    pub amount_cents: i64,
    pub entry_type: EntryType,
    pub description: String,
    pub source_account_id: i64,
    pub destination: TransferDestination,
    pub institution_id: Option<i64>,
    pub category_id: Option<i64>,
    pub import_source_id: Option<i64>,
    pub out_raw_transaction_id: Option<i64>,
    pub in_raw_transaction_id: Option<i64>,
    pub transfer_fee_cents: i64,
}

#[derive(Debug)]
pub struct TransferPairOutcome {
    pub created: bool,
    pub reason: Option<&'static str>,
    pub transfer_group_id: String,
    pub out_entry_id: i64,
    pub in_entry_id: i64,
}

/// Builds both legs of a transfer or card payment inside one transaction:
/// an OUT leg on the source account and an IN leg on the destination, a
/// shared group id derived from the pair's base hash, and mutual peer
/// links. Re-running with the same content reports a duplicate.
pub fn create_transfer_pair(
    conn: &mut Connection,
    spec: &TransferPairSpec,
) -> Result<TransferPairOutcome> {
    if spec.amount_cents <= 0 {
        return Err(TallyError::NonPositiveTransferAmount);
    }
    let dest_key = match spec.destination {
        TransferDestination::Account(id) => {
            if id == spec.source_account_id {
                return Err(TallyError::SameAccountTransfer);
            }
            format!("a{id}")
        }
        TransferDestination::CreditCard(id) => format!("c{id}"),
    };
    let base = transfer_base_hash(
        &spec.posted_at,
        spec.amount_cents,
        spec.entry_type,
        &spec.description,
        &format!("a{}", spec.source_account_id),
        &dest_key,
    );
    let group_id = transfer_group_id(&base);
    // Transfers never carry a category; card payments may keep one only on
    // the checking side, which is also cleared here for symmetry.
    let category_id = match spec.entry_type {
        EntryType::Transfer => None,
        _ => spec.category_id,
    };

    let tx = conn.transaction()?;
    let leg = |direction: Direction, raw_id: Option<i64>| -> Result<(i64, bool)> {
        let mut candidate = EntryCandidate::new(
            spec.user_id,
            &spec.posted_at,
            spec.amount_cents,
            direction,
            spec.entry_type,
            &spec.description,
        );
        match (direction, spec.destination) {
            (Direction::Out, TransferDestination::Account(_)) => {
                candidate.account_id = Some(spec.source_account_id)
            }
            // A matched card payment knows its card on both legs.
            (Direction::Out, TransferDestination::CreditCard(id)) => {
                candidate.account_id = Some(spec.source_account_id);
                candidate.credit_card_account_id = Some(id);
            }
            (Direction::In, TransferDestination::Account(id)) => candidate.account_id = Some(id),
            (Direction::In, TransferDestination::CreditCard(id)) => {
                candidate.credit_card_account_id = Some(id)
            }
        }
        candidate.institution_id = spec.institution_id;
        candidate.category_id = category_id;
        candidate.import_source_id = spec.import_source_id;
        candidate.raw_transaction_id = raw_id;
        candidate.transfer_group_id = Some(group_id.clone());
        candidate.reconciliation_status = ReconciliationStatus::Matched;
        candidate.transfer_fee_cents = if direction == Direction::Out {
            spec.transfer_fee_cents
        } else {
            0
        };
        let fp = transfer_leg_fingerprint(&base, direction);
        let created = insert_entry(&tx, &candidate, &fp)?;
        let entry = find_by_fingerprint(&tx, spec.user_id, &fp)?
            .ok_or(TallyError::UpsertInvariant(fp))?;
        Ok((entry.id, created))
    };

    let (out_id, out_created) = leg(Direction::Out, spec.out_raw_transaction_id)?;
    let (in_id, in_created) = leg(Direction::In, spec.in_raw_transaction_id)?;

    if out_created || in_created {
        tx.execute(
            "UPDATE ledger_entries SET transfer_peer_id = ?1 WHERE id = ?2",
            [in_id, out_id],
        )?;
        tx.execute(
            "UPDATE ledger_entries SET transfer_peer_id = ?1 WHERE id = ?2",
            [out_id, in_id],
        )?;
    }
    tx.commit()?;

    let created = out_created || in_created;
    Ok(TransferPairOutcome {
        created,
        reason: if created { None } else { Some("duplicate") },
        transfer_group_id: group_id,
        out_entry_id: out_id,
        in_entry_id: in_id,
    })
}

/// Deletes an entry together with the suggestion and denial rows that point
/// at it; both tables hold foreign keys into ledger_entries.
pub fn delete_entry(conn: &Connection, user_id: i64, id: i64) -> Result<bool> {
    conn.execute(
        "DELETE FROM transfer_suggestions \
         WHERE user_id = ?1 AND (out_entry_id = ?2 OR in_entry_id = ?2)",
        [user_id, id],
    )?;
    conn.execute(
        "DELETE FROM reconciliation_denials WHERE user_id = ?1 AND entry_id = ?2",
        [user_id, id],
    )?;
    let deleted = conn.execute(
        "DELETE FROM ledger_entries WHERE user_id = ?1 AND id = ?2",
        [user_id, id],
    )?;
    Ok(deleted == 1)
}

// ---------------------------------------------------------------------------
// Read projections for the dashboard/UI collaborators
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AccountBalance {
    pub account_id: i64,
    pub account_name: String,
    pub balance_cents: i64,
}

#[derive(Debug)]
pub struct CardDebt {
    pub credit_card_account_id: i64,
    pub card_name: String,
    pub debt_cents: i64,
}

#[derive(Debug)]
pub struct DashboardSummary {
    pub entry_count: i64,
    pub income_cents: i64,
    pub spending_cents: i64,
    pub account_balances: Vec<AccountBalance>,
    pub card_debts: Vec<CardDebt>,
}

pub fn dashboard_summary(
    conn: &Connection,
    user_id: i64,
    from: Option<&str>,
    to: Option<&str>,
) -> Result<DashboardSummary> {
    let from = from.unwrap_or("0000-00-00");
    let to = to.unwrap_or("9999-99-99");
    let range = rusqlite::params![user_id, from, to];

    let entry_count: i64 = conn.query_row(
        "SELECT count(*) FROM ledger_entries \
         WHERE user_id = ?1 AND posted_at BETWEEN ?2 AND ?3",
        range,
        |r| r.get(0),
    )?;
    let income_cents: i64 = conn.query_row(
        "SELECT COALESCE(SUM(amount_cents), 0) FROM ledger_entries \
         WHERE user_id = ?1 AND posted_at BETWEEN ?2 AND ?3 AND entry_type = 'income'",
        range,
        |r| r.get(0),
    )?;
    let spending_cents: i64 = conn.query_row(
        "SELECT COALESCE(SUM(amount_cents), 0) FROM ledger_entries \
         WHERE user_id = ?1 AND posted_at BETWEEN ?2 AND ?3 \
         AND entry_type IN ('expense', 'cc_purchase', 'fee')",
        range,
        |r| r.get(0),
    )?;

    let mut stmt = conn.prepare(
        "SELECT a.id, a.name, COALESCE(SUM(CASE e.direction WHEN 'IN' THEN e.amount_cents \
                ELSE -e.amount_cents END), 0) \
         FROM accounts a \
         LEFT JOIN ledger_entries e \
           ON e.account_id = a.id AND e.user_id = a.user_id AND e.posted_at BETWEEN ?2 AND ?3 \
         WHERE a.user_id = ?1 AND a.account_type != 'credit' \
         GROUP BY a.id, a.name ORDER BY a.name",
    )?;
    let account_balances = stmt
        .query_map(range, |row| {
            Ok(AccountBalance {
                account_id: row.get(0)?,
                account_name: row.get(1)?,
                balance_cents: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    // Card debt is the signed sum seen from the card: purchases (OUT) add
    // to the balance owed, refunds and payment legs (IN) reduce it.
    let mut stmt = conn.prepare(
        "SELECT c.id, c.name, COALESCE(SUM(CASE e.direction WHEN 'OUT' THEN e.amount_cents \
                ELSE -e.amount_cents END), 0) \
         FROM credit_card_accounts c \
         LEFT JOIN ledger_entries e \
           ON e.credit_card_account_id = c.id AND e.user_id = c.user_id \
           AND e.posted_at BETWEEN ?2 AND ?3 \
         WHERE c.user_id = ?1 \
         GROUP BY c.id, c.name ORDER BY c.name",
    )?;
    let card_debts = stmt
        .query_map(range, |row| {
            Ok(CardDebt {
                credit_card_account_id: row.get(0)?,
                card_name: row.get(1)?,
                debt_cents: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(DashboardSummary {
        entry_count,
        income_cents,
        spending_cents,
        account_balances,
        card_debts,
    })
}

#[derive(Debug)]
pub struct PendingSuggestion {
    pub suggestion_id: i64,
    pub score: i64,
    pub out_entry_id: i64,
    pub out_posted_at: String,
    pub out_account: String,
    pub out_description: String,
    pub in_entry_id: i64,
    pub in_posted_at: String,
    pub in_account: String,
    pub in_description: String,
    pub amount_cents: i64,
}

#[derive(Debug)]
pub struct UnmatchedCardPayment {
    pub entry_id: i64,
    pub posted_at: String,
    pub account_name: Option<String>,
    pub description: String,
    pub amount_cents: i64,
}

#[derive(Debug)]
pub struct ReviewInbox {
    pub suggestions: Vec<PendingSuggestion>,
    pub unmatched_card_payments: Vec<UnmatchedCardPayment>,
}

/// Work queue for the human-in-the-loop confirmation UI: open transfer
/// suggestions with account context, plus card payments that never found
/// their card.
pub fn review_inbox(conn: &Connection, user_id: i64) -> Result<ReviewInbox> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.score, \
                o.id, o.posted_at, ao.name, o.description, \
                i.id, i.posted_at, ai.name, i.description, o.amount_cents \
         FROM transfer_suggestions s \
         JOIN ledger_entries o ON o.id = s.out_entry_id \
         JOIN ledger_entries i ON i.id = s.in_entry_id \
         LEFT JOIN accounts ao ON ao.id = o.account_id \
         LEFT JOIN accounts ai ON ai.id = i.account_id \
         WHERE s.user_id = ?1 AND s.status = 'suggested' \
         ORDER BY s.score DESC, s.id",
    )?;
    let suggestions = stmt
        .query_map([user_id], |row| {
            Ok(PendingSuggestion {
                suggestion_id: row.get(0)?,
                score: row.get(1)?,
                out_entry_id: row.get(2)?,
                out_posted_at: row.get(3)?,
                out_account: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                out_description: row.get(5)?,
                in_entry_id: row.get(6)?,
                in_posted_at: row.get(7)?,
                in_account: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
                in_description: row.get(9)?,
                amount_cents: row.get(10)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT e.id, e.posted_at, a.name, e.description, e.amount_cents \
         FROM ledger_entries e \
         LEFT JOIN accounts a ON a.id = e.account_id \
         WHERE e.user_id = ?1 AND e.entry_type = 'cc_payment' \
           AND e.reconciliation_status != 'matched' \
         ORDER BY e.posted_at",
    )?;
    let unmatched_card_payments = stmt
        .query_map([user_id], |row| {
            Ok(UnmatchedCardPayment {
                entry_id: row.get(0)?,
                posted_at: row.get(1)?,
                account_name: row.get(2)?,
                description: row.get(3)?,
                amount_cents: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(ReviewInbox {
        suggestions,
        unmatched_card_payments,
    })
}

pub use crate::accounts::list_card_mirrors as list_credit_card_accounts;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{add_account, test_db};
    use crate::models::AccountType;

    fn expense(user_id: i64, account_id: i64, date: &str, cents: i64, desc: &str) -> EntryCandidate {
        let mut c = EntryCandidate::new(user_id, date, cents, Direction::Out, EntryType::Expense, desc);
        c.account_id = Some(account_id);
        c
    }

    #[test]
    fn test_upsert_creates_then_dedups() {
        let (_dir, conn) = test_db();
        let acct = add_account(&conn, 1, "Checking", AccountType::Checking);
        let candidate = expense(1, acct, "2025-01-15", 5000, "COFFEE SHOP");

        let first = upsert_ledger_entry(&conn, &candidate).unwrap();
        assert!(first.created);
        let second = upsert_ledger_entry(&conn, &candidate).unwrap();
        assert!(!second.created);
        assert_eq!(first.entry.id, second.entry.id);

        let count: i64 = conn
            .query_row("SELECT count(*) FROM ledger_entries", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_upsert_same_content_different_source_collides() {
        let (_dir, conn) = test_db();
        let acct = add_account(&conn, 1, "Checking", AccountType::Checking);
        let a = expense(1, acct, "2025-01-15", 5000, "COFFEE SHOP");
        let mut b = a.clone();
        b.import_source_id = None;
        b.raw_transaction_id = None;
        upsert_ledger_entry(&conn, &a).unwrap();
        let outcome = upsert_ledger_entry(&conn, &b).unwrap();
        assert!(!outcome.created);
    }

    #[test]
    fn test_upsert_normalizes_description() {
        let (_dir, conn) = test_db();
        let acct = add_account(&conn, 1, "Checking", AccountType::Checking);
        let candidate = expense(1, acct, "2025-01-15", 5000, "  coffee   shop ");
        let outcome = upsert_ledger_entry(&conn, &candidate).unwrap();
        assert_eq!(outcome.entry.description, "COFFEE SHOP");
    }

    fn pair_spec(user_id: i64, src: i64, dst: i64, cents: i64) -> TransferPairSpec {
        TransferPairSpec {
            user_id,
            posted_at: "2025-02-01".to_string(),
            amount_cents: cents,
            entry_type: EntryType::Transfer,
            description: "TRANSFER TO SAVINGS".to_string(),
            source_account_id: src,
            destination: TransferDestination::Account(dst),
            institution_id: None,
            category_id: None,
            import_source_id: None,
            out_raw_transaction_id: None,
            in_raw_transaction_id: None,
            transfer_fee_cents: 0,
        }
    }

    #[test]
    fn test_create_transfer_pair() {
        let (_dir, mut conn) = test_db();
        let src = add_account(&conn, 1, "Checking", AccountType::Checking);
        let dst = add_account(&conn, 1, "Savings", AccountType::Checking);

        let outcome = create_transfer_pair(&mut conn, &pair_spec(1, src, dst, 50000)).unwrap();
        assert!(outcome.created);
        assert!(!outcome.transfer_group_id.is_empty());

        let out_leg = find_entry(&conn, 1, outcome.out_entry_id).unwrap().unwrap();
        let in_leg = find_entry(&conn, 1, outcome.in_entry_id).unwrap().unwrap();
        assert_eq!(out_leg.direction, Direction::Out);
        assert_eq!(in_leg.direction, Direction::In);
        assert_eq!(out_leg.transfer_group_id, in_leg.transfer_group_id);
        assert_eq!(out_leg.transfer_peer_id, Some(in_leg.id));
        assert_eq!(in_leg.transfer_peer_id, Some(out_leg.id));
        assert_eq!(out_leg.account_id, Some(src));
        assert_eq!(in_leg.account_id, Some(dst));
        assert_eq!(out_leg.reconciliation_status, ReconciliationStatus::Matched);
        assert_eq!(out_leg.category_id, None);
    }

    #[test]
    fn test_create_transfer_pair_duplicate() {
        let (_dir, mut conn) = test_db();
        let src = add_account(&conn, 1, "Checking", AccountType::Checking);
        let dst = add_account(&conn, 1, "Savings", AccountType::Checking);
        let spec = pair_spec(1, src, dst, 50000);

        create_transfer_pair(&mut conn, &spec).unwrap();
        let again = create_transfer_pair(&mut conn, &spec).unwrap();
        assert!(!again.created);
        assert_eq!(again.reason, Some("duplicate"));

        let count: i64 = conn
            .query_row("SELECT count(*) FROM ledger_entries", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_create_transfer_pair_rejects_same_account() {
        let (_dir, mut conn) = test_db();
        let src = add_account(&conn, 1, "Checking", AccountType::Checking);
        let err = create_transfer_pair(&mut conn, &pair_spec(1, src, src, 100)).unwrap_err();
        assert!(matches!(err, TallyError::SameAccountTransfer));
    }

    #[test]
    fn test_create_transfer_pair_rejects_non_positive() {
        let (_dir, mut conn) = test_db();
        let src = add_account(&conn, 1, "Checking", AccountType::Checking);
        let dst = add_account(&conn, 1, "Savings", AccountType::Checking);
        let err = create_transfer_pair(&mut conn, &pair_spec(1, src, dst, 0)).unwrap_err();
        assert!(matches!(err, TallyError::NonPositiveTransferAmount));
    }

    #[test]
    fn test_card_payment_pair_lands_on_mirror() {
        let (_dir, mut conn) = test_db();
        let src = add_account(&conn, 1, "Checking", AccountType::Checking);
        conn.execute(
            "INSERT INTO credit_card_accounts (user_id, name) VALUES (1, 'Rewards Card')",
            [],
        )
        .unwrap();
        let card = conn.last_insert_rowid();

        let mut spec = pair_spec(1, src, 0, 12000);
        spec.entry_type = EntryType::CcPayment;
        spec.destination = TransferDestination::CreditCard(card);
        let outcome = create_transfer_pair(&mut conn, &spec).unwrap();
        assert!(outcome.created);

        let in_leg = find_entry(&conn, 1, outcome.in_entry_id).unwrap().unwrap();
        assert_eq!(in_leg.credit_card_account_id, Some(card));
        assert_eq!(in_leg.account_id, None);
        assert_eq!(in_leg.entry_type, EntryType::CcPayment);

        // The checking-side leg is matched, so it names its card too.
        let out_leg = find_entry(&conn, 1, outcome.out_entry_id).unwrap().unwrap();
        assert_eq!(out_leg.account_id, Some(src));
        assert_eq!(out_leg.credit_card_account_id, Some(card));
        assert_eq!(out_leg.reconciliation_status, ReconciliationStatus::Matched);
    }

    #[test]
    fn test_delete_entry_clears_dependent_rows() {
        let (_dir, conn) = test_db();
        let checking = add_account(&conn, 1, "Checking", AccountType::Checking);
        let savings = add_account(&conn, 1, "Savings", AccountType::Checking);
        let out = upsert_ledger_entry(&conn, &expense(1, checking, "2025-03-01", 5000, "MOVE"))
            .unwrap()
            .entry;
        let mut inc =
            EntryCandidate::new(1, "2025-03-01", 5000, Direction::In, EntryType::Income, "MOVE");
        inc.account_id = Some(savings);
        let inn = upsert_ledger_entry(&conn, &inc).unwrap().entry;
        conn.execute(
            "INSERT INTO transfer_suggestions (user_id, out_entry_id, in_entry_id, score) \
             VALUES (1, ?1, ?2, 90)",
            [out.id, inn.id],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO reconciliation_denials (user_id, entry_id, reason) \
             VALUES (1, ?1, 'not a transfer')",
            [out.id],
        )
        .unwrap();

        assert!(delete_entry(&conn, 1, out.id).unwrap());

        let suggestions: i64 = conn
            .query_row("SELECT count(*) FROM transfer_suggestions", [], |r| r.get(0))
            .unwrap();
        let denials: i64 = conn
            .query_row("SELECT count(*) FROM reconciliation_denials", [], |r| r.get(0))
            .unwrap();
        assert_eq!(suggestions, 0);
        assert_eq!(denials, 0);
    }

    #[test]
    fn test_dashboard_summary_balances() {
        let (_dir, mut conn) = test_db();
        let checking = add_account(&conn, 1, "Checking", AccountType::Checking);
        let savings = add_account(&conn, 1, "Savings", AccountType::Checking);

        let mut income =
            EntryCandidate::new(1, "2025-01-10", 100000, Direction::In, EntryType::Income, "PAYROLL");
        income.account_id = Some(checking);
        upsert_ledger_entry(&conn, &income).unwrap();
        upsert_ledger_entry(&conn, &expense(1, checking, "2025-01-12", 25000, "RENT")).unwrap();
        create_transfer_pair(&mut conn, &pair_spec(1, checking, savings, 30000)).unwrap();

        let summary = dashboard_summary(&conn, 1, None, None).unwrap();
        assert_eq!(summary.entry_count, 4);
        assert_eq!(summary.income_cents, 100000);
        assert_eq!(summary.spending_cents, 25000);

        let by_name: std::collections::HashMap<_, _> = summary
            .account_balances
            .iter()
            .map(|b| (b.account_name.clone(), b.balance_cents))
            .collect();
        assert_eq!(by_name["Checking"], 100000 - 25000 - 30000);
        assert_eq!(by_name["Savings"], 30000);
    }

    #[test]
    fn test_review_inbox_lists_unmatched_card_payments() {
        let (_dir, conn) = test_db();
        let checking = add_account(&conn, 1, "Checking", AccountType::Checking);
        let mut payment = EntryCandidate::new(
            1,
            "2025-01-20",
            40000,
            Direction::Out,
            EntryType::CcPayment,
            "INVOICE PAYMENT CARD X",
        );
        payment.account_id = Some(checking);
        upsert_ledger_entry(&conn, &payment).unwrap();

        let inbox = review_inbox(&conn, 1).unwrap();
        assert_eq!(inbox.unmatched_card_payments.len(), 1);
        assert_eq!(inbox.unmatched_card_payments[0].account_name.as_deref(), Some("Checking"));
        assert!(inbox.suggestions.is_empty());
    }
}
