use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};

use crate::error::{Result, TallyError};
use crate::fingerprint::{transfer_base_hash, transfer_group_id};
use crate::ledger::{find_entry, map_entry, ENTRY_COLS};
use crate::models::{EntryType, LedgerEntry, SuggestionStatus};

/// Maximum date gap between the two legs of a plausible transfer.
pub const MATCH_WINDOW_DAYS: i64 = 5;

/// Maximum amount mismatch, as a fraction of the OUT amount. Covers wire
/// and transfer fees charged on the paying side.
pub const MATCH_FEE_TOLERANCE: f64 = 0.01;

#[derive(Debug, Default)]
pub struct SuggestOutcome {
    pub examined: usize,
    pub suggestions_created: usize,
}

#[derive(Debug, Clone)]
pub struct Suggestion {
    pub id: i64,
    pub user_id: i64,
    pub out_entry_id: i64,
    pub in_entry_id: i64,
    pub score: i64,
    pub status: SuggestionStatus,
}

fn load_suggestion(conn: &Connection, user_id: i64, id: i64) -> Result<Option<Suggestion>> {
    let s = conn
        .query_row(
            "SELECT id, user_id, out_entry_id, in_entry_id, score, status \
             FROM transfer_suggestions WHERE user_id = ?1 AND id = ?2",
            [user_id, id],
            |row| {
                Ok(Suggestion {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    out_entry_id: row.get(2)?,
                    in_entry_id: row.get(3)?,
                    score: row.get(4)?,
                    status: row.get(5)?,
                })
            },
        )
        .optional()?;
    Ok(s)
}

fn day_gap(a: &str, b: &str) -> Option<i64> {
    let a = NaiveDate::parse_from_str(a, "%Y-%m-%d").ok()?;
    let b = NaiveDate::parse_from_str(b, "%Y-%m-%d").ok()?;
    Some((a - b).num_days().abs())
}

/// Deterministic pair score: amount equality dominates, then date
/// proximity. Both inputs are pre-screened by `viable`.
fn score_pair(out: &LedgerEntry, inn: &LedgerEntry) -> i64 {
    let gap = day_gap(&out.posted_at, &inn.posted_at).unwrap_or(MATCH_WINDOW_DAYS);
    let cent_diff = (out.amount_cents - inn.amount_cents).abs();
    (100 - 10 * gap - (cent_diff / 10).min(20)).max(1)
}

fn viable(out: &LedgerEntry, inn: &LedgerEntry) -> bool {
    if out.account_id == inn.account_id {
        return false;
    }
    let Some(gap) = day_gap(&out.posted_at, &inn.posted_at) else {
        return false;
    };
    if gap > MATCH_WINDOW_DAYS {
        return false;
    }
    let tolerance = (out.amount_cents as f64 * MATCH_FEE_TOLERANCE).ceil() as i64;
    (out.amount_cents - inn.amount_cents).abs() <= tolerance
}

fn eligible_entries(conn: &Connection, user_id: i64, direction: &str) -> Result<Vec<LedgerEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTRY_COLS} FROM ledger_entries e \
         WHERE e.user_id = ?1 AND e.direction = ?2 \
           AND e.entry_type IN ('income', 'expense') \
           AND e.account_id IS NOT NULL \
           AND e.transfer_group_id IS NULL \
           AND e.reconciliation_status != 'matched' \
           AND NOT EXISTS (SELECT 1 FROM reconciliation_denials d \
                           WHERE d.user_id = e.user_id AND d.entry_id = e.id) \
         ORDER BY e.posted_at, e.id"
    ))?;
    let rows = stmt
        .query_map(rusqlite::params![user_id, direction], map_entry)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Search unmatched opposite-direction entries across accounts, persist a
/// scored suggestion per viable pair and move both sides to `suggested`.
/// Safe to re-run: the per-pair uniqueness makes persistence idempotent.
pub fn suggest_transfers(conn: &mut Connection, user_id: i64) -> Result<SuggestOutcome> {
    let outs = eligible_entries(conn, user_id, "OUT")?;
    let ins = eligible_entries(conn, user_id, "IN")?;

    let mut outcome = SuggestOutcome::default();
    let tx = conn.transaction()?;
    for out in &outs {
        outcome.examined += 1;
        let mut viable_ins: Vec<&LedgerEntry> = ins.iter().filter(|i| viable(out, i)).collect();
        // Closest date first, then lowest id, so re-runs list the same order.
        viable_ins.sort_by_key(|i| (day_gap(&out.posted_at, &i.posted_at).unwrap_or(i64::MAX), i.id));
        for inn in viable_ins {
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO transfer_suggestions \
                 (user_id, out_entry_id, in_entry_id, score) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![user_id, out.id, inn.id, score_pair(out, inn)],
            )?;
            if inserted == 1 {
                outcome.suggestions_created += 1;
            }
            for entry_id in [out.id, inn.id] {
                tx.execute(
                    "UPDATE ledger_entries SET reconciliation_status = 'suggested' \
                     WHERE user_id = ?1 AND id = ?2 AND reconciliation_status = 'unmatched'",
                    [user_id, entry_id],
                )?;
            }
        }
    }
    tx.commit()?;
    Ok(outcome)
}

fn has_open_suggestions(conn: &Connection, user_id: i64, entry_id: i64) -> Result<bool> {
    let mut stmt = conn.prepare_cached(
        "SELECT 1 FROM transfer_suggestions \
         WHERE user_id = ?1 AND status = 'suggested' \
           AND (out_entry_id = ?2 OR in_entry_id = ?2)",
    )?;
    Ok(stmt.exists([user_id, entry_id])?)
}

fn revert_if_orphaned(conn: &Connection, user_id: i64, entry_id: i64) -> Result<()> {
    if !has_open_suggestions(conn, user_id, entry_id)? {
        conn.execute(
            "UPDATE ledger_entries SET reconciliation_status = 'unmatched' \
             WHERE user_id = ?1 AND id = ?2 AND reconciliation_status = 'suggested'",
            [user_id, entry_id],
        )?;
    }
    Ok(())
}

/// Close every other open suggestion touching either confirmed entry, then
/// release entries that no longer hold any open suggestion.
fn supersede_open_suggestions(
    conn: &Connection,
    user_id: i64,
    suggestion_id: i64,
    entry_ids: [i64; 2],
) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT id, out_entry_id, in_entry_id FROM transfer_suggestions \
         WHERE user_id = ?1 AND status = 'suggested' AND id != ?2 \
           AND (out_entry_id IN (?3, ?4) OR in_entry_id IN (?3, ?4))",
    )?;
    let others: Vec<(i64, i64, i64)> = stmt
        .query_map(
            rusqlite::params![user_id, suggestion_id, entry_ids[0], entry_ids[1]],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for (other_id, out_id, in_id) in &others {
        conn.execute(
            "UPDATE transfer_suggestions SET status = 'rejected' WHERE id = ?1",
            [other_id],
        )?;
        for entry_id in [*out_id, *in_id] {
            if !entry_ids.contains(&entry_id) {
                revert_if_orphaned(conn, user_id, entry_id)?;
            }
        }
    }
    Ok(())
}

/// Promote a suggestion to a linked transfer: both entries become transfer
/// type with a shared group, mutual peer links and a rewritten label.
/// Confirming an already-confirmed suggestion is a no-op.
pub fn confirm_suggestion(conn: &mut Connection, user_id: i64, suggestion_id: i64) -> Result<()> {
    let suggestion = load_suggestion(conn, user_id, suggestion_id)?
        .ok_or(TallyError::SuggestionNotFound(suggestion_id))?;
    match suggestion.status {
        SuggestionStatus::Confirmed => return Ok(()),
        SuggestionStatus::Rejected => return Err(TallyError::SuggestionRejected(suggestion_id)),
        SuggestionStatus::Suggested => {}
    }
    let out = find_entry(conn, user_id, suggestion.out_entry_id)?
        .ok_or(TallyError::EntryNotFound(suggestion.out_entry_id))?;
    let inn = find_entry(conn, user_id, suggestion.in_entry_id)?
        .ok_or(TallyError::EntryNotFound(suggestion.in_entry_id))?;

    let base = transfer_base_hash(
        &out.posted_at,
        out.amount_cents,
        EntryType::Transfer,
        "confirmed transfer",
        &out.fingerprint,
        &inn.fingerprint,
    );
    let group_id = transfer_group_id(&base);
    let fee_cents = (out.amount_cents - inn.amount_cents).abs();

    let tx = conn.transaction()?;
    tx.execute(
        "UPDATE transfer_suggestions SET status = 'confirmed' WHERE id = ?1",
        [suggestion.id],
    )?;
    for (entry, peer, fee) in [(&out, inn.id, fee_cents), (&inn, out.id, 0)] {
        tx.execute(
            "UPDATE ledger_entries SET entry_type = 'transfer', category_id = NULL, \
             description = 'ACCOUNT TRANSFER', transfer_group_id = ?1, transfer_peer_id = ?2, \
             reconciliation_status = 'matched', transfer_fee_cents = ?3 \
             WHERE user_id = ?4 AND id = ?5",
            rusqlite::params![group_id, peer, fee, user_id, entry.id],
        )?;
    }
    supersede_open_suggestions(&tx, user_id, suggestion.id, [out.id, inn.id])?;
    tx.commit()?;
    Ok(())
}

/// Reject a suggestion: a denial for each involved entry keeps the pair out
/// of future candidate searches, and entries fall back to `unmatched` when
/// they hold no other open suggestion.
pub fn reject_suggestion(
    conn: &mut Connection,
    user_id: i64,
    suggestion_id: i64,
    reason: Option<&str>,
) -> Result<()> {
    let suggestion = load_suggestion(conn, user_id, suggestion_id)?
        .ok_or(TallyError::SuggestionNotFound(suggestion_id))?;
    match suggestion.status {
        SuggestionStatus::Rejected => return Ok(()),
        SuggestionStatus::Confirmed => {
            return Err(TallyError::Other(format!(
                "suggestion {suggestion_id} was already confirmed"
            )))
        }
        SuggestionStatus::Suggested => {}
    }

    let tx = conn.transaction()?;
    tx.execute(
        "UPDATE transfer_suggestions SET status = 'rejected' WHERE id = ?1",
        [suggestion.id],
    )?;
    for entry_id in [suggestion.out_entry_id, suggestion.in_entry_id] {
        tx.execute(
            "INSERT OR IGNORE INTO reconciliation_denials (user_id, entry_id, reason) \
             VALUES (?1, ?2, ?3)",
            rusqlite::params![user_id, entry_id, reason],
        )?;
        revert_if_orphaned(&tx, user_id, entry_id)?;
    }
    tx.commit()?;
    Ok(())
}

/// Attach an unmatched card payment to its card once a human picked one.
pub fn link_card_payment(
    conn: &Connection,
    user_id: i64,
    entry_id: i64,
    credit_card_account_id: i64,
) -> Result<()> {
    let entry =
        find_entry(conn, user_id, entry_id)?.ok_or(TallyError::EntryNotFound(entry_id))?;
    if entry.entry_type != EntryType::CcPayment {
        return Err(TallyError::Other(format!(
            "entry {entry_id} is not a card payment"
        )));
    }
    conn.execute(
        "UPDATE ledger_entries SET credit_card_account_id = ?1, reconciliation_status = 'matched' \
         WHERE user_id = ?2 AND id = ?3",
        rusqlite::params![credit_card_account_id, user_id, entry_id],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{add_account, test_db};
    use crate::ledger::upsert_ledger_entry;
    use crate::models::{AccountType, Direction, EntryCandidate, ReconciliationStatus};

    fn entry(
        conn: &Connection,
        account_id: i64,
        date: &str,
        cents: i64,
        direction: Direction,
        entry_type: EntryType,
        desc: &str,
    ) -> i64 {
        let mut c = EntryCandidate::new(1, date, cents, direction, entry_type, desc);
        c.account_id = Some(account_id);
        upsert_ledger_entry(conn, &c).unwrap().entry.id
    }

    fn transfer_shaped_pair(conn: &Connection) -> (i64, i64, i64, i64) {
        let checking = add_account(conn, 1, "Checking", AccountType::Checking);
        let savings = add_account(conn, 1, "Savings", AccountType::Checking);
        let out = entry(conn, checking, "2025-03-01", 50000, Direction::Out, EntryType::Expense, "WIRE OUT");
        let inn = entry(conn, savings, "2025-03-02", 50000, Direction::In, EntryType::Income, "WIRE IN");
        (checking, savings, out, inn)
    }

    fn suggestion_for(conn: &Connection, out_id: i64, in_id: i64) -> Option<(i64, SuggestionStatus)> {
        conn.query_row(
            "SELECT id, status FROM transfer_suggestions WHERE out_entry_id = ?1 AND in_entry_id = ?2",
            [out_id, in_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .unwrap()
    }

    #[test]
    fn test_suggest_finds_opposite_pair() {
        let (_dir, mut conn) = test_db();
        let (_, _, out, inn) = transfer_shaped_pair(&conn);

        let outcome = suggest_transfers(&mut conn, 1).unwrap();
        assert_eq!(outcome.suggestions_created, 1);
        let (_, status) = suggestion_for(&conn, out, inn).unwrap();
        assert_eq!(status, SuggestionStatus::Suggested);

        let entry = find_entry(&conn, 1, out).unwrap().unwrap();
        assert_eq!(entry.reconciliation_status, ReconciliationStatus::Suggested);
    }

    #[test]
    fn test_suggest_is_idempotent() {
        let (_dir, mut conn) = test_db();
        transfer_shaped_pair(&conn);
        let first = suggest_transfers(&mut conn, 1).unwrap();
        assert_eq!(first.suggestions_created, 1);
        let second = suggest_transfers(&mut conn, 1).unwrap();
        assert_eq!(second.suggestions_created, 0);
    }

    #[test]
    fn test_suggest_skips_same_account_and_far_dates() {
        let (_dir, mut conn) = test_db();
        let checking = add_account(&conn, 1, "Checking", AccountType::Checking);
        let savings = add_account(&conn, 1, "Savings", AccountType::Checking);
        // Same account: not viable.
        entry(&conn, checking, "2025-03-01", 1000, Direction::Out, EntryType::Expense, "A");
        entry(&conn, checking, "2025-03-01", 1000, Direction::In, EntryType::Income, "B");
        // Outside the window.
        entry(&conn, savings, "2025-03-20", 1000, Direction::In, EntryType::Income, "C");

        let outcome = suggest_transfers(&mut conn, 1).unwrap();
        assert_eq!(outcome.suggestions_created, 0);
    }

    #[test]
    fn test_suggest_allows_small_fee_gap() {
        let (_dir, mut conn) = test_db();
        let checking = add_account(&conn, 1, "Checking", AccountType::Checking);
        let savings = add_account(&conn, 1, "Savings", AccountType::Checking);
        entry(&conn, checking, "2025-03-01", 100000, Direction::Out, EntryType::Expense, "WIRE");
        // 0.5% short: within the fee tolerance.
        entry(&conn, savings, "2025-03-01", 99500, Direction::In, EntryType::Income, "WIRE IN");

        let outcome = suggest_transfers(&mut conn, 1).unwrap();
        assert_eq!(outcome.suggestions_created, 1);
    }

    #[test]
    fn test_score_prefers_equal_amount_and_close_dates() {
        let (_dir, conn) = test_db();
        let checking = add_account(&conn, 1, "Checking", AccountType::Checking);
        let savings = add_account(&conn, 1, "Savings", AccountType::Checking);
        let out_id = entry(&conn, checking, "2025-03-01", 50000, Direction::Out, EntryType::Expense, "A");
        let same_day = entry(&conn, savings, "2025-03-01", 50000, Direction::In, EntryType::Income, "B");
        let later = entry(&conn, savings, "2025-03-04", 50000, Direction::In, EntryType::Income, "C");

        let out = find_entry(&conn, 1, out_id).unwrap().unwrap();
        let a = find_entry(&conn, 1, same_day).unwrap().unwrap();
        let b = find_entry(&conn, 1, later).unwrap().unwrap();
        assert!(score_pair(&out, &a) > score_pair(&out, &b));
    }

    #[test]
    fn test_confirm_links_pair() {
        let (_dir, mut conn) = test_db();
        let (_, _, out, inn) = transfer_shaped_pair(&conn);
        suggest_transfers(&mut conn, 1).unwrap();
        let (sid, _) = suggestion_for(&conn, out, inn).unwrap();

        confirm_suggestion(&mut conn, 1, sid).unwrap();

        let out_e = find_entry(&conn, 1, out).unwrap().unwrap();
        let in_e = find_entry(&conn, 1, inn).unwrap().unwrap();
        assert_eq!(out_e.entry_type, EntryType::Transfer);
        assert_eq!(in_e.entry_type, EntryType::Transfer);
        assert_eq!(out_e.category_id, None);
        assert_eq!(out_e.description, "ACCOUNT TRANSFER");
        assert_eq!(out_e.transfer_group_id, in_e.transfer_group_id);
        assert!(out_e.transfer_group_id.is_some());
        assert_eq!(out_e.transfer_peer_id, Some(inn));
        assert_eq!(in_e.transfer_peer_id, Some(out));
        assert_eq!(out_e.reconciliation_status, ReconciliationStatus::Matched);
    }

    #[test]
    fn test_confirm_twice_is_noop() {
        let (_dir, mut conn) = test_db();
        let (_, _, out, inn) = transfer_shaped_pair(&conn);
        suggest_transfers(&mut conn, 1).unwrap();
        let (sid, _) = suggestion_for(&conn, out, inn).unwrap();
        confirm_suggestion(&mut conn, 1, sid).unwrap();
        confirm_suggestion(&mut conn, 1, sid).unwrap();
        let (_, status) = suggestion_for(&conn, out, inn).unwrap();
        assert_eq!(status, SuggestionStatus::Confirmed);
    }

    #[test]
    fn test_confirm_preserves_cross_account_sum() {
        // The confirmed transfer must not change net worth versus treating
        // the legs as an equal-and-opposite income/expense pair.
        let (_dir, mut conn) = test_db();
        let (_, _, out, inn) = transfer_shaped_pair(&conn);
        let signed_sum = |conn: &Connection| -> i64 {
            conn.query_row(
                "SELECT COALESCE(SUM(CASE direction WHEN 'IN' THEN amount_cents \
                        ELSE -amount_cents END), 0) FROM ledger_entries",
                [],
                |r| r.get(0),
            )
            .unwrap()
        };
        let before = signed_sum(&conn);
        suggest_transfers(&mut conn, 1).unwrap();
        let (sid, _) = suggestion_for(&conn, out, inn).unwrap();
        confirm_suggestion(&mut conn, 1, sid).unwrap();
        assert_eq!(signed_sum(&conn), before);
    }

    #[test]
    fn test_confirm_supersedes_competing_suggestions() {
        let (_dir, mut conn) = test_db();
        let checking = add_account(&conn, 1, "Checking", AccountType::Checking);
        let savings = add_account(&conn, 1, "Savings", AccountType::Checking);
        let broker = add_account(&conn, 1, "Brokerage", AccountType::Investment);
        let out = entry(&conn, checking, "2025-03-01", 50000, Direction::Out, EntryType::Expense, "A");
        let in_a = entry(&conn, savings, "2025-03-01", 50000, Direction::In, EntryType::Income, "B");
        let in_b = entry(&conn, broker, "2025-03-02", 50000, Direction::In, EntryType::Income, "C");

        suggest_transfers(&mut conn, 1).unwrap();
        let (sid_a, _) = suggestion_for(&conn, out, in_a).unwrap();
        let (_, status_b_before) = suggestion_for(&conn, out, in_b).unwrap();
        assert_eq!(status_b_before, SuggestionStatus::Suggested);

        confirm_suggestion(&mut conn, 1, sid_a).unwrap();

        let (_, status_b) = suggestion_for(&conn, out, in_b).unwrap();
        assert_eq!(status_b, SuggestionStatus::Rejected);
        // The loser's other side is released for future matching.
        let in_b_entry = find_entry(&conn, 1, in_b).unwrap().unwrap();
        assert_eq!(in_b_entry.reconciliation_status, ReconciliationStatus::Unmatched);
    }

    #[test]
    fn test_reject_records_denial_and_reverts() {
        let (_dir, mut conn) = test_db();
        let (_, _, out, inn) = transfer_shaped_pair(&conn);
        suggest_transfers(&mut conn, 1).unwrap();
        let (sid, _) = suggestion_for(&conn, out, inn).unwrap();

        reject_suggestion(&mut conn, 1, sid, Some("different payees")).unwrap();

        let denials: i64 = conn
            .query_row("SELECT count(*) FROM reconciliation_denials", [], |r| r.get(0))
            .unwrap();
        assert_eq!(denials, 2);
        let out_e = find_entry(&conn, 1, out).unwrap().unwrap();
        assert_eq!(out_e.reconciliation_status, ReconciliationStatus::Unmatched);
        assert_eq!(out_e.entry_type, EntryType::Expense);

        // Denied entries never come back as candidates.
        let outcome = suggest_transfers(&mut conn, 1).unwrap();
        assert_eq!(outcome.suggestions_created, 0);
    }

    #[test]
    fn test_matched_entries_leave_the_candidate_pool() {
        let (_dir, mut conn) = test_db();
        let (_, _, out, inn) = transfer_shaped_pair(&conn);
        suggest_transfers(&mut conn, 1).unwrap();
        let (sid, _) = suggestion_for(&conn, out, inn).unwrap();
        confirm_suggestion(&mut conn, 1, sid).unwrap();

        let outcome = suggest_transfers(&mut conn, 1).unwrap();
        assert_eq!(outcome.examined, 0);
    }

    #[test]
    fn test_link_card_payment() {
        let (_dir, conn) = test_db();
        let checking = add_account(&conn, 1, "Checking", AccountType::Checking);
        conn.execute(
            "INSERT INTO credit_card_accounts (user_id, name) VALUES (1, 'Rewards Card')",
            [],
        )
        .unwrap();
        let card = conn.last_insert_rowid();
        let payment = entry(
            &conn,
            checking,
            "2025-03-01",
            40000,
            Direction::Out,
            EntryType::CcPayment,
            "INVOICE PAYMENT",
        );

        link_card_payment(&conn, 1, payment, card).unwrap();
        let e = find_entry(&conn, 1, payment).unwrap().unwrap();
        assert_eq!(e.credit_card_account_id, Some(card));
        assert_eq!(e.reconciliation_status, ReconciliationStatus::Matched);
    }
}
