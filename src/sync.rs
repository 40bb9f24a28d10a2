use std::collections::{HashMap, HashSet};

use rusqlite::Connection;

use crate::accounts::resolve_card_mirror;
use crate::classifier::{classify, looks_like_card_payment, Classification};
use crate::error::Result;
use crate::fingerprint::{fingerprint, normalize_description, transfer_base_hash, transfer_group_id};
use crate::ledger::{
    delete_entry, find_by_external_ref, find_by_fingerprint, find_entry, map_entry, ENTRY_COLS,
};
use crate::models::{
    Account, AccountType, Direction, EntryCandidate, EntryType, LedgerEntry, LegacyTransaction,
    ReconciliationStatus,
};

const LEGACY_REF_PREFIX: &str = "LEGACY_TX:";

pub fn legacy_ref(legacy_id: i64) -> String {
    format!("{LEGACY_REF_PREFIX}{legacy_id}")
}

#[derive(Debug, Default)]
pub struct SyncOutcome {
    pub scanned: usize,
    pub created: usize,
    pub replaced: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub warnings: Vec<String>,
}

/// What one legacy record should look like on the ledger side.
enum Desired {
    /// Excluded by classification (the credit-side leg of a transfer).
    Skip,
    /// One entry; transfer legs land here too, each legacy row is one leg.
    Single(EntryCandidate),
    /// A card payment expands to a checking leg plus a card-mirror leg.
    Pair {
        out: EntryCandidate,
        inn: EntryCandidate,
    },
}

fn load_legacy(conn: &Connection, user_id: i64) -> Result<Vec<LegacyTransaction>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, legacy_type, direction, amount_cents, occurred_at, description, \
                account_id, transfer_account_id, category_id \
         FROM legacy_transactions WHERE user_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map([user_id], |row| {
            Ok(LegacyTransaction {
                id: row.get(0)?,
                user_id: row.get(1)?,
                legacy_type: row.get(2)?,
                direction: row.get(3)?,
                amount_cents: row.get(4)?,
                occurred_at: row.get(5)?,
                description: row.get(6)?,
                account_id: row.get(7)?,
                transfer_account_id: row.get(8)?,
                category_id: row.get(9)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Transfer legs from both legacy rows of one move must converge on the same
/// group id, so the hash input is ordered source-to-destination regardless of
/// which leg we are looking at.
fn leg_group_id(lt: &LegacyTransaction, counter_id: i64) -> String {
    let (src, dst) = match lt.direction {
        Direction::Out => (lt.account_id, counter_id),
        Direction::In => (counter_id, lt.account_id),
    };
    let base = transfer_base_hash(
        &lt.occurred_at,
        lt.amount_cents,
        EntryType::Transfer,
        "",
        &format!("a{src}"),
        &format!("a{dst}"),
    );
    transfer_group_id(&base)
}

fn base_candidate(lt: &LegacyTransaction, entry_type: EntryType) -> EntryCandidate {
    let mut c = EntryCandidate::new(
        lt.user_id,
        &lt.occurred_at,
        lt.amount_cents,
        lt.direction,
        entry_type,
        &lt.description,
    );
    c.category_id = lt.category_id;
    c.external_ref = Some(legacy_ref(lt.id));
    c
}

fn desired_for(
    conn: &Connection,
    accounts: &HashMap<i64, Account>,
    lt: &LegacyTransaction,
    warnings: &mut Vec<String>,
) -> Result<Option<Desired>> {
    let Some(account) = accounts.get(&lt.account_id) else {
        warnings.push(format!(
            "legacy tx {}: unknown account {}",
            lt.id, lt.account_id
        ));
        return Ok(None);
    };
    let counter = lt.transfer_account_id.and_then(|id| accounts.get(&id));
    let counter_is_credit = counter.map(|a| a.account_type == AccountType::Credit).unwrap_or(false);
    let hint = counter_is_credit || looks_like_card_payment(&normalize_description(&lt.description));

    let entry_type = match classify(account.account_type, lt.legacy_type, lt.direction, hint) {
        Classification::Excluded => return Ok(Some(Desired::Skip)),
        Classification::Entry(t) => t,
    };

    let desired = match entry_type {
        EntryType::Transfer => match counter {
            Some(counter) => {
                let mut c = base_candidate(lt, EntryType::Transfer);
                c.account_id = Some(lt.account_id);
                c.institution_id = account.institution_id;
                c.category_id = None;
                c.transfer_group_id = Some(leg_group_id(lt, counter.id));
                c.reconciliation_status = ReconciliationStatus::Matched;
                Desired::Single(c)
            }
            // Transfer entries always carry a group, so a leg whose
            // counterpart account is unknown lands as an ordinary money
            // movement instead; the matcher can pair it up later.
            None => {
                let fallback = match lt.direction {
                    Direction::Out => EntryType::Expense,
                    Direction::In => EntryType::Income,
                };
                let mut c = base_candidate(lt, fallback);
                c.account_id = Some(lt.account_id);
                c.institution_id = account.institution_id;
                Desired::Single(c)
            }
        },
        EntryType::CcPayment => {
            let credit_counter = counter.filter(|a| a.account_type == AccountType::Credit);
            match credit_counter {
                Some(credit) => {
                    let (mirror, _) = resolve_card_mirror(conn, credit)?;
                    let base = transfer_base_hash(
                        &lt.occurred_at,
                        lt.amount_cents,
                        EntryType::CcPayment,
                        &lt.description,
                        &format!("a{}", lt.account_id),
                        &format!("c{}", mirror.id),
                    );
                    let group = transfer_group_id(&base);

                    let mut out = base_candidate(lt, EntryType::CcPayment);
                    out.account_id = Some(lt.account_id);
                    // The matched payment knows its card on both legs; the
                    // fingerprint keys on account_id, so this does not
                    // change the OUT leg's identity.
                    out.credit_card_account_id = Some(mirror.id);
                    out.institution_id = account.institution_id;
                    out.transfer_group_id = Some(group.clone());
                    out.reconciliation_status = ReconciliationStatus::Matched;

                    let mut inn = out.clone();
                    inn.direction = lt.direction.opposite();
                    inn.account_id = None;
                    inn.credit_card_account_id = Some(mirror.id);
                    inn.institution_id = mirror.institution_id;
                    inn.external_ref = None;
                    Desired::Pair { out, inn }
                }
                // Description-only hint with no credit counterpart: keep the
                // payment on the source account for the review inbox.
                None => {
                    let mut c = base_candidate(lt, EntryType::CcPayment);
                    c.account_id = Some(lt.account_id);
                    c.institution_id = account.institution_id;
                    Desired::Single(c)
                }
            }
        }
        EntryType::CcPurchase | EntryType::Refund => {
            let (mirror, _) = resolve_card_mirror(conn, account)?;
            let mut c = base_candidate(lt, entry_type);
            c.credit_card_account_id = Some(mirror.id);
            c.institution_id = mirror.institution_id;
            Desired::Single(c)
        }
        _ => {
            let mut c = base_candidate(lt, entry_type);
            c.account_id = Some(lt.account_id);
            c.institution_id = account.institution_id;
            Desired::Single(c)
        }
    };
    Ok(Some(desired))
}

/// Whether the stored entry already reflects the candidate. The fingerprint
/// covers everything content-addressed; category, transfer group and
/// reconciliation status are synced fields outside it. An entry sitting at
/// `suggested` is open matcher state, not a divergence from the legacy
/// record, so it counts as unmatched here.
fn entry_matches(entry: &LedgerEntry, candidate: &EntryCandidate) -> bool {
    let status_matches = entry.reconciliation_status == candidate.reconciliation_status
        || (entry.reconciliation_status == ReconciliationStatus::Suggested
            && candidate.reconciliation_status == ReconciliationStatus::Unmatched);
    entry.fingerprint == fingerprint(candidate)
        && entry.category_id == candidate.category_id
        && entry.transfer_group_id == candidate.transfer_group_id
        && status_matches
}

/// Remove an entry together with any companion leg this sync created. Peer
/// legs with their own external ref belong to a different legacy row and
/// only get unlinked.
fn remove_entry(conn: &Connection, entry: &LedgerEntry) -> Result<()> {
    if let Some(peer_id) = entry.transfer_peer_id {
        if let Some(peer) = find_entry(conn, entry.user_id, peer_id)? {
            if peer.external_ref.is_none() {
                delete_entry(conn, peer.user_id, peer.id)?;
            } else {
                conn.execute(
                    "UPDATE ledger_entries SET transfer_peer_id = NULL \
                     WHERE user_id = ?1 AND id = ?2",
                    [peer.user_id, peer.id],
                )?;
            }
        }
    }
    delete_entry(conn, entry.user_id, entry.id)?;
    Ok(())
}

fn set_peers(conn: &Connection, user_id: i64, a: i64, b: i64) -> Result<()> {
    conn.execute(
        "UPDATE ledger_entries SET transfer_peer_id = ?1 WHERE user_id = ?2 AND id = ?3",
        [b, user_id, a],
    )?;
    conn.execute(
        "UPDATE ledger_entries SET transfer_peer_id = ?1 WHERE user_id = ?2 AND id = ?3",
        [a, user_id, b],
    )?;
    Ok(())
}

fn insert_desired(conn: &Connection, desired: &Desired) -> Result<()> {
    match desired {
        Desired::Skip => {}
        Desired::Single(candidate) => {
            let outcome = crate::ledger::upsert_ledger_entry(conn, candidate)?;
            // A transfer leg pairs up once its sibling row has synced.
            if let Some(group) = &candidate.transfer_group_id {
                let sibling: Option<i64> = {
                    let mut stmt = conn.prepare_cached(
                        "SELECT id FROM ledger_entries \
                         WHERE user_id = ?1 AND transfer_group_id = ?2 AND id != ?3",
                    )?;
                    let mut rows = stmt.query(rusqlite::params![
                        candidate.user_id,
                        group,
                        outcome.entry.id
                    ])?;
                    match rows.next()? {
                        Some(row) => Some(row.get(0)?),
                        None => None,
                    }
                };
                if let Some(sibling_id) = sibling {
                    set_peers(conn, candidate.user_id, outcome.entry.id, sibling_id)?;
                }
            }
        }
        Desired::Pair { out, inn } => {
            let out_row = crate::ledger::upsert_ledger_entry(conn, out)?;
            let in_row = crate::ledger::upsert_ledger_entry(conn, inn)?;
            set_peers(conn, out.user_id, out_row.entry.id, in_row.entry.id)?;
        }
    }
    Ok(())
}

fn sync_one(
    conn: &mut Connection,
    lt: &LegacyTransaction,
    accounts: &HashMap<i64, Account>,
    outcome: &mut SyncOutcome,
) -> Result<()> {
    let Some(desired) = desired_for(conn, accounts, lt, &mut outcome.warnings)? else {
        outcome.skipped += 1;
        return Ok(());
    };
    let ext_ref = legacy_ref(lt.id);
    let existing = find_by_external_ref(conn, lt.user_id, &ext_ref)?;

    match (&desired, existing) {
        (Desired::Skip, None) => outcome.skipped += 1,
        (Desired::Skip, Some(entry)) => {
            // Previously synced, now excluded by classification.
            let tx = conn.transaction()?;
            remove_entry(&tx, &entry)?;
            tx.commit()?;
            outcome.deleted += 1;
            outcome.skipped += 1;
        }
        (Desired::Single(candidate) | Desired::Pair { out: candidate, .. }, Some(entry))
            if entry_matches(&entry, candidate) =>
        {
            outcome.unchanged += 1;
        }
        (_, Some(entry)) => {
            let tx = conn.transaction()?;
            remove_entry(&tx, &entry)?;
            insert_desired(&tx, &desired)?;
            tx.commit()?;
            outcome.replaced += 1;
        }
        (Desired::Single(candidate) | Desired::Pair { out: candidate, .. }, None) => {
            // An import may already hold the same content; adopt it instead
            // of failing on the fingerprint collision.
            let fp = fingerprint(candidate);
            match find_by_fingerprint(conn, lt.user_id, &fp)? {
                Some(twin) if twin.external_ref.is_none() => {
                    conn.execute(
                        "UPDATE ledger_entries SET external_ref = ?1 \
                         WHERE user_id = ?2 AND id = ?3",
                        rusqlite::params![ext_ref, twin.user_id, twin.id],
                    )?;
                    outcome.unchanged += 1;
                }
                Some(_) => {
                    outcome.warnings.push(format!(
                        "legacy tx {}: content collides with an entry owned by another record",
                        lt.id
                    ));
                    outcome.skipped += 1;
                }
                None => {
                    let tx = conn.transaction()?;
                    insert_desired(&tx, &desired)?;
                    tx.commit()?;
                    outcome.created += 1;
                }
            }
        }
    }
    Ok(())
}

fn prune_orphans(
    conn: &mut Connection,
    user_id: i64,
    live_ids: &HashSet<i64>,
    outcome: &mut SyncOutcome,
) -> Result<()> {
    let synced: Vec<LedgerEntry> = {
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLS} FROM ledger_entries \
             WHERE user_id = ?1 AND external_ref LIKE '{LEGACY_REF_PREFIX}%'"
        ))?;
        let entries = stmt
            .query_map([user_id], map_entry)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        entries
    };
    let tx = conn.transaction()?;
    for entry in &synced {
        let legacy_id = entry
            .external_ref
            .as_deref()
            .and_then(|r| r.strip_prefix(LEGACY_REF_PREFIX))
            .and_then(|id| id.parse::<i64>().ok());
        let stale = match legacy_id {
            Some(id) => !live_ids.contains(&id),
            None => false,
        };
        if stale {
            remove_entry(&tx, entry)?;
            outcome.deleted += 1;
        }
    }
    tx.commit()?;
    Ok(())
}

/// One-way bridge from the legacy transaction store onto the ledger. Each
/// legacy record owns at most one ledger entry via its external ref; the
/// sync converges on the legacy side being authoritative, so edits replace
/// and deletions prune. Safe to re-run at any time.
pub fn sync_legacy(conn: &mut Connection, user_id: i64) -> Result<SyncOutcome> {
    let mut outcome = SyncOutcome::default();
    let accounts: HashMap<i64, Account> = crate::accounts::list_by_user(conn, user_id)?
        .into_iter()
        .map(|a| (a.id, a))
        .collect();
    let legacy = load_legacy(conn, user_id)?;
    let live_ids: HashSet<i64> = legacy.iter().map(|lt| lt.id).collect();

    for lt in &legacy {
        outcome.scanned += 1;
        sync_one(conn, lt, &accounts, &mut outcome)?;
    }
    prune_orphans(conn, user_id, &live_ids, &mut outcome)?;
    Ok(outcome)
}
