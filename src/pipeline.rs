use std::collections::{HashMap, HashSet};

use rusqlite::Connection;
use sha2::{Digest, Sha256};

use crate::accounts::{
    self, find_or_create_institution, name_hints_credit_product, resolve_by_name,
    resolve_card_mirror, NameResolution,
};
use crate::classifier::{
    classify, is_credit_side_payment_line, looks_like_card_payment, Classification,
};
use crate::error::{Result, TallyError};
use crate::fingerprint::{fingerprint, normalize_description, normalize_merchant};
use crate::ledger::{
    create_transfer_pair, fingerprint_exists, TransferDestination, TransferPairSpec,
};
use crate::models::{
    Account, AccountType, CreditCardAccount, Direction, EntryCandidate, EntryType, ImportKind,
    LegacyType, RowInput,
};

pub const MAX_BATCH_ROWS: usize = 5000;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parse a signed decimal amount string into cents. Accepts thousands
/// separators, currency symbols and parenthesized negatives; anything that
/// does not survive as a finite number is None.
pub fn parse_amount_cents(raw: &str) -> Option<i64> {
    let s = raw.replace(',', "").replace('"', "").replace('$', "");
    let mut s = s.trim();
    let mut negative = false;
    if let Some(inner) = s.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        negative = true;
        s = inner.trim();
    }
    let value: f64 = s.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    let cents = (value * 100.0).round() as i64;
    Some(if negative { -cents } else { cents })
}

/// Validate a posted date, normalizing to YYYY-MM-DD. Accepts ISO dates and
/// the MM/DD/YYYY form common in statement exports.
pub fn parse_posted_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let Ok(date) = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date.format("%Y-%m-%d").to_string());
    }
    chrono::NaiveDate::parse_from_str(raw, "%m/%d/%Y")
        .ok()
        .map(|d| d.format("%Y-%m-%d").to_string())
}

/// Content hash of the whole batch, used when the caller did not supply a
/// file checksum.
fn batch_content_hash(rows: &[RowInput]) -> String {
    let mut hasher = Sha256::new();
    for row in rows {
        hasher.update(row.date.as_bytes());
        hasher.update(b"|");
        hasher.update(row.description.as_bytes());
        hasher.update(b"|");
        hasher.update(row.amount.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

pub fn file_checksum(path: &std::path::Path) -> Result<String> {
    let data = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(hex::encode(hasher.finalize()))
}

// ---------------------------------------------------------------------------
// Options and outcome
// ---------------------------------------------------------------------------

pub struct ImportOptions {
    pub kind: ImportKind,
    pub filename: String,
    pub institution: Option<String>,
    pub default_account_id: Option<i64>,
    /// Explicit credit account to route a card-invoice document to.
    pub target_account_id: Option<i64>,
    /// Drop credit-side "payment received" lines already captured on the
    /// checking side. Default true; see DESIGN.md.
    pub skip_credit_payment_lines: bool,
    /// Count a transfer row with an unresolved destination as invalid
    /// instead of downgrading it to an ordinary row.
    pub require_transfer_destination: bool,
    pub file_hash: Option<String>,
}

impl ImportOptions {
    pub fn new(kind: ImportKind, filename: &str) -> Self {
        Self {
            kind,
            filename: filename.to_string(),
            institution: None,
            default_account_id: None,
            target_account_id: None,
            skip_credit_payment_lines: true,
            require_transfer_destination: false,
            file_hash: None,
        }
    }
}

/// Hook for the external categorization rule engine: normalized description
/// in, category id out.
pub type CategorySuggester<'a> = &'a dyn Fn(&str) -> Option<i64>;

#[derive(Debug, Default)]
pub struct ImportOutcome {
    pub imported: usize,
    pub skipped: usize,
    pub db_duplicates: usize,
    pub payload_duplicates: usize,
    pub invalid_rows: usize,
    pub invalid_dates: usize,
    pub unrouted_invoices: usize,
    pub unconverted_card_payments: usize,
    pub auto_created_cards: usize,
    pub skipped_payment_lines: usize,
    pub duplicate_file: bool,
    pub warnings: Vec<String>,
    pub date_range: Option<(String, String)>,
}

impl ImportOutcome {
    fn push_warnings(&mut self) {
        if self.unrouted_invoices > 0 {
            self.warnings.push(format!(
                "{} credit invoice row(s) could not be routed to a credit account",
                self.unrouted_invoices
            ));
        }
        if self.unconverted_card_payments > 0 {
            self.warnings.push(format!(
                "{} detected card payment(s) had no unique card target and were kept as expenses",
                self.unconverted_card_payments
            ));
        }
        if self.auto_created_cards > 0 {
            self.warnings.push(format!(
                "{} credit account(s) were auto-created during invoice routing",
                self.auto_created_cards
            ));
        }
        if self.skipped_payment_lines > 0 {
            self.warnings.push(format!(
                "{} credit-side payment line(s) were skipped as already captured on the bank side",
                self.skipped_payment_lines
            ));
        }
        if self.invalid_dates > 0 {
            self.warnings
                .push(format!("{} row(s) had unparseable dates", self.invalid_dates));
        }
    }
}

// ---------------------------------------------------------------------------
// Per-row planning
// ---------------------------------------------------------------------------

/// What a single row turned into. Built per batch; nothing here outlives
/// the commit call.
enum RowPlan {
    Ordinary {
        candidate: EntryCandidate,
        raw: RawDraft,
    },
    Pair {
        spec: TransferPairSpec,
        raw: RawDraft,
        batch_key: String,
    },
}

struct RawDraft {
    raw_external_id: Option<String>,
    posted_at: String,
    amount_cents: i64,
    direction: Direction,
    description_raw: String,
}

/// Batch-scoped resolution context: the user's accounts (including any
/// auto-created during the batch) and a mirror cache, so card lookups do
/// not depend on module-level state.
struct BatchContext {
    user_id: i64,
    accounts: Vec<Account>,
    mirrors: HashMap<i64, CreditCardAccount>,
    institution_id: Option<i64>,
}

impl BatchContext {
    fn account_by_id(&self, id: i64) -> Option<&Account> {
        self.accounts.iter().find(|a| a.id == id)
    }

    fn mirror_for(&mut self, conn: &Connection, credit_account: &Account) -> Result<(CreditCardAccount, bool)> {
        if let Some(card) = self.mirrors.get(&credit_account.id) {
            return Ok((card.clone(), false));
        }
        let (card, created) = resolve_card_mirror(conn, credit_account)?;
        self.mirrors.insert(credit_account.id, card.clone());
        Ok((card, created))
    }

    fn linked_cards(&self, parent_id: i64) -> Vec<&Account> {
        self.accounts
            .iter()
            .filter(|a| a.account_type == AccountType::Credit && a.parent_account_id == Some(parent_id))
            .collect()
    }

    fn same_institution_cards(&self, institution_id: i64) -> Vec<&Account> {
        self.accounts
            .iter()
            .filter(|a| {
                a.account_type == AccountType::Credit
                    && a.institution_id == Some(institution_id)
                    && name_hints_credit_product(&a.name)
            })
            .collect()
    }
}

fn resolve_row_account<'a>(
    ctx: &'a BatchContext,
    row: &RowInput,
    options: &ImportOptions,
) -> std::result::Result<&'a Account, &'static str> {
    if let Some(id) = row.account_id {
        return ctx.account_by_id(id).ok_or("explicit account id not found");
    }
    if let Some(hint) = row.account.as_deref() {
        match resolve_by_name(&ctx.accounts, hint) {
            NameResolution::Match(acct) => {
                // resolve_by_name clones; re-borrow from the context.
                return ctx.account_by_id(acct.id).ok_or("account vanished");
            }
            NameResolution::NoUniqueMatch => return Err("account hint is ambiguous"),
            NameResolution::NotFound => {}
        }
    }
    if let Some(id) = options.default_account_id {
        return ctx.account_by_id(id).ok_or("default account not found");
    }
    Err("no account resolved")
}

/// Route a credit-invoice document to a credit account when the resolved
/// account is not one: explicit target, single linked card, single
/// same-institution card by name heuristic, or auto-create under a lone
/// eligible checking parent.
fn reroute_invoice_account(
    conn: &Connection,
    ctx: &mut BatchContext,
    resolved_id: i64,
    options: &ImportOptions,
    outcome: &mut ImportOutcome,
) -> Result<Option<i64>> {
    if let Some(target) = options.target_account_id {
        match ctx.account_by_id(target) {
            Some(a) if a.account_type == AccountType::Credit => return Ok(Some(a.id)),
            _ => return Ok(None),
        }
    }
    if let [card] = ctx.linked_cards(resolved_id).as_slice() {
        return Ok(Some(card.id));
    }
    let resolved = match ctx.account_by_id(resolved_id) {
        Some(a) => a.clone(),
        None => return Ok(None),
    };
    if let Some(inst) = resolved.institution_id {
        if let [card] = ctx.same_institution_cards(inst).as_slice() {
            return Ok(Some(card.id));
        }
    }
    if resolved.account_type == AccountType::Checking && ctx.linked_cards(resolved_id).is_empty() {
        let created = accounts::create(
            conn,
            ctx.user_id,
            &format!("{} Card", resolved.name),
            AccountType::Credit,
            resolved.institution_id,
            Some(resolved.id),
        )?;
        outcome.auto_created_cards += 1;
        let id = created.id;
        ctx.accounts.push(created);
        return Ok(Some(id));
    }
    Ok(None)
}

/// Resolve the credit account a detected card payment should land on.
fn resolve_card_payment_target(ctx: &BatchContext, source: &Account, row: &RowInput) -> Option<i64> {
    if let Some(id) = row.card_target_id {
        return match ctx.account_by_id(id) {
            Some(a) if a.account_type == AccountType::Credit => Some(a.id),
            _ => None,
        };
    }
    if let [card] = ctx.linked_cards(source.id).as_slice() {
        return Some(card.id);
    }
    if let Some(inst) = source.institution_id {
        if let [card] = ctx.same_institution_cards(inst).as_slice() {
            return Some(card.id);
        }
    }
    None
}

fn resolve_transfer_destination(ctx: &BatchContext, row: &RowInput) -> Option<i64> {
    if let Some(id) = row.transfer_account_id {
        return ctx.account_by_id(id).map(|a| a.id);
    }
    if let Some(hint) = row.transfer_account.as_deref() {
        if let NameResolution::Match(acct) = resolve_by_name(&ctx.accounts, hint) {
            return Some(acct.id);
        }
    }
    None
}

// ---------------------------------------------------------------------------
// commit
// ---------------------------------------------------------------------------

/// Run one import batch to completion. Bad rows are counted and skipped,
/// never fatal; the returned outcome is the caller's partial-success report.
pub fn commit(
    conn: &mut Connection,
    user_id: i64,
    rows: &[RowInput],
    options: &ImportOptions,
    suggester: Option<CategorySuggester>,
) -> Result<ImportOutcome> {
    if rows.len() > MAX_BATCH_ROWS {
        return Err(TallyError::BatchTooLarge(rows.len(), MAX_BATCH_ROWS));
    }

    let mut outcome = ImportOutcome::default();
    let file_hash = options
        .file_hash
        .clone()
        .unwrap_or_else(|| batch_content_hash(rows));

    // Whole-file dedup only applies when the caller hands us a real file
    // checksum; ad-hoc batches fall through to row-level dedup so repeats
    // are reported per row.
    if options.file_hash.is_some() {
        let mut stmt = conn.prepare(
            "SELECT 1 FROM import_sources WHERE user_id = ?1 AND kind = ?2 AND file_hash = ?3",
        )?;
        if stmt.exists(rusqlite::params![user_id, options.kind, file_hash])? {
            outcome.duplicate_file = true;
            return Ok(outcome);
        }
    }

    let institution = match options.institution.as_deref() {
        Some(name) => Some(find_or_create_institution(conn, name)?),
        None => None,
    };
    let mut ctx = BatchContext {
        user_id,
        accounts: accounts::list_by_user(conn, user_id)?,
        mirrors: HashMap::new(),
        institution_id: institution.as_ref().map(|i| i.id),
    };

    let mut plans: Vec<RowPlan> = Vec::new();
    let mut batch_fingerprints: HashSet<String> = HashSet::new();
    let mut batch_pair_keys: HashSet<String> = HashSet::new();

    for row in rows {
        // Normalization first: a row we cannot date or price is invalid no
        // matter where it would have been routed.
        let Some(posted_at) = parse_posted_date(&row.date) else {
            outcome.invalid_rows += 1;
            outcome.invalid_dates += 1;
            continue;
        };
        let Some(signed_cents) = parse_amount_cents(&row.amount) else {
            outcome.invalid_rows += 1;
            continue;
        };
        let direction = Direction::from_signed_cents(signed_cents);
        let amount_cents = signed_cents.abs();
        let desc_norm = normalize_description(&row.description);

        // Account resolution, including invoice re-routing.
        let mut account = match resolve_row_account(&ctx, row, options) {
            Ok(a) => a.clone(),
            Err(reason) => {
                outcome.invalid_rows += 1;
                outcome.warnings.push(format!("row '{}': {reason}", row.description));
                continue;
            }
        };
        if options.kind == ImportKind::CcStatement && account.account_type != AccountType::Credit {
            match reroute_invoice_account(conn, &mut ctx, account.id, options, &mut outcome)? {
                Some(credit_id) => {
                    account = ctx
                        .account_by_id(credit_id)
                        .ok_or(TallyError::AccountNotFound(credit_id))?
                        .clone();
                }
                None => {
                    outcome.invalid_rows += 1;
                    outcome.unrouted_invoices += 1;
                    outcome
                        .warnings
                        .push(format!("row '{}': credit invoice not routed", row.description));
                    continue;
                }
            }
        }

        // Credit-side payment lines are the inbound half of a payment the
        // checking side already captured.
        if account.account_type == AccountType::Credit
            && options.skip_credit_payment_lines
            && is_credit_side_payment_line(&desc_norm)
        {
            outcome.skipped += 1;
            outcome.skipped_payment_lines += 1;
            continue;
        }

        let explicit_transfer = row.transfer_account_id.is_some() || row.transfer_account.is_some();
        let coarse = if explicit_transfer {
            LegacyType::Transfer
        } else if direction == Direction::In {
            LegacyType::Income
        } else {
            LegacyType::Expense
        };
        let hint = matches!(account.account_type, AccountType::Checking | AccountType::Cash)
            && direction == Direction::Out
            && looks_like_card_payment(&desc_norm);

        let entry_type = match classify(account.account_type, coarse, direction, hint) {
            Classification::Excluded => {
                outcome.skipped += 1;
                continue;
            }
            // The secondary heuristic also catches payments that arrived as
            // plain expense rows, not just pre-flagged transfers.
            Classification::Entry(EntryType::Expense) if hint => EntryType::CcPayment,
            Classification::Entry(t) => t,
        };

        let raw = RawDraft {
            raw_external_id: row.external_id.clone(),
            posted_at: posted_at.clone(),
            amount_cents: signed_cents,
            direction,
            description_raw: row.description.clone(),
        };

        let mut downgraded_type = None;
        match entry_type {
            EntryType::CcPayment => {
                match resolve_card_payment_target(&ctx, &account, row) {
                    Some(credit_id) => {
                        let credit_account = ctx
                            .account_by_id(credit_id)
                            .ok_or(TallyError::AccountNotFound(credit_id))?
                            .clone();
                        let (mirror, _) = ctx.mirror_for(conn, &credit_account)?;
                        let batch_key =
                            format!("{posted_at}|{amount_cents}|cc|{}|{}", account.id, mirror.id);
                        plans.push(RowPlan::Pair {
                            spec: TransferPairSpec {
                                user_id,
                                posted_at,
                                amount_cents,
                                entry_type: EntryType::CcPayment,
                                description: desc_norm.clone(),
                                source_account_id: account.id,
                                destination: TransferDestination::CreditCard(mirror.id),
                                institution_id: ctx.institution_id,
                                category_id: None,
                                import_source_id: None,
                                out_raw_transaction_id: None,
                                in_raw_transaction_id: None,
                                transfer_fee_cents: 0,
                            },
                            raw,
                            batch_key,
                        });
                        continue;
                    }
                    None => {
                        outcome.unconverted_card_payments += 1;
                        downgraded_type = Some(EntryType::Expense);
                    }
                }
            }
            EntryType::Transfer => {
                match resolve_transfer_destination(&ctx, row) {
                    Some(dest_id) if dest_id != account.id => {
                        // An inbound transfer row describes money arriving
                        // from the counter account; the pair is built from
                        // the paying side either way.
                        let (source_id, dest) = match direction {
                            Direction::Out => (account.id, dest_id),
                            Direction::In => (dest_id, account.id),
                        };
                        let batch_key =
                            format!("{posted_at}|{amount_cents}|tf|{source_id}|{dest}");
                        plans.push(RowPlan::Pair {
                            spec: TransferPairSpec {
                                user_id,
                                posted_at,
                                amount_cents,
                                entry_type: EntryType::Transfer,
                                description: desc_norm.clone(),
                                source_account_id: source_id,
                                destination: TransferDestination::Account(dest),
                                institution_id: ctx.institution_id,
                                category_id: None,
                                import_source_id: None,
                                out_raw_transaction_id: None,
                                in_raw_transaction_id: None,
                                transfer_fee_cents: 0,
                            },
                            raw,
                            batch_key,
                        });
                        continue;
                    }
                    _ if options.require_transfer_destination => {
                        outcome.invalid_rows += 1;
                        outcome.warnings.push(format!(
                            "row '{}': transfer destination unresolved",
                            row.description
                        ));
                        continue;
                    }
                    _ => {
                        downgraded_type = Some(if direction == Direction::In {
                            EntryType::Income
                        } else {
                            EntryType::Expense
                        });
                    }
                }
            }
            _ => {}
        }

        // Ordinary row.
        let entry_type = downgraded_type.unwrap_or(entry_type);
        let mut candidate =
            EntryCandidate::new(user_id, &posted_at, amount_cents, direction, entry_type, &desc_norm);
        candidate.merchant = row.merchant.as_deref().and_then(normalize_merchant);
        candidate.institution_id = ctx.institution_id;
        if account.account_type == AccountType::Credit {
            let acct = account.clone();
            let (mirror, _) = ctx.mirror_for(conn, &acct)?;
            candidate.credit_card_account_id = Some(mirror.id);
        } else {
            candidate.account_id = Some(account.id);
        }
        candidate.category_id = row
            .category_id
            .or_else(|| suggester.and_then(|suggest| suggest(&desc_norm)));
        plans.push(RowPlan::Ordinary { candidate, raw });
    }

    // Duplicate suppression before the batch write: repeats within the
    // payload and rows already present in storage are both dropped.
    let mut survivors: Vec<RowPlan> = Vec::new();
    for plan in plans {
        match &plan {
            RowPlan::Ordinary { candidate, .. } => {
                let fp = fingerprint(candidate);
                if !batch_fingerprints.insert(fp.clone()) {
                    outcome.payload_duplicates += 1;
                    continue;
                }
                if fingerprint_exists(conn, user_id, &fp)? {
                    outcome.db_duplicates += 1;
                    continue;
                }
            }
            RowPlan::Pair { batch_key, .. } => {
                if !batch_pair_keys.insert(batch_key.clone()) {
                    outcome.payload_duplicates += 1;
                    continue;
                }
            }
        }
        survivors.push(plan);
    }

    // Batch persistence: import source, raw rows and all ordinary entries
    // land in one transaction.
    let batch_id: i64;
    let source_id: i64;
    let mut pair_work: Vec<(TransferPairSpec, i64)> = Vec::new();
    {
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO import_batches (user_id, filename, total_rows) VALUES (?1, ?2, ?3)",
            rusqlite::params![user_id, options.filename, rows.len() as i64],
        )?;
        batch_id = tx.last_insert_rowid();
        tx.execute(
            "INSERT OR IGNORE INTO import_sources (user_id, institution_id, kind, filename, file_hash) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                user_id,
                ctx.institution_id,
                options.kind,
                options.filename,
                file_hash
            ],
        )?;
        source_id = tx.query_row(
            "SELECT id FROM import_sources WHERE user_id = ?1 AND kind = ?2 AND file_hash = ?3",
            rusqlite::params![user_id, options.kind, file_hash],
            |r| r.get(0),
        )?;

        let insert_raw = |raw: &RawDraft| -> Result<i64> {
            tx.execute(
                "INSERT INTO raw_transactions \
                 (import_source_id, raw_external_id, posted_at, amount_cents, direction, description_raw) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    source_id,
                    raw.raw_external_id,
                    raw.posted_at,
                    raw.amount_cents,
                    raw.direction,
                    raw.description_raw,
                ],
            )?;
            Ok(tx.last_insert_rowid())
        };

        for plan in survivors {
            match plan {
                RowPlan::Ordinary { mut candidate, raw } => {
                    let raw_id = insert_raw(&raw)?;
                    candidate.import_source_id = Some(source_id);
                    candidate.raw_transaction_id = Some(raw_id);
                    let upserted = crate::ledger::upsert_ledger_entry(&tx, &candidate)?;
                    if upserted.created {
                        outcome.imported += 1;
                        note_date(&mut outcome, &candidate.posted_at);
                    } else {
                        outcome.db_duplicates += 1;
                    }
                }
                RowPlan::Pair { mut spec, raw, .. } => {
                    let raw_id = insert_raw(&raw)?;
                    spec.import_source_id = Some(source_id);
                    spec.out_raw_transaction_id = Some(raw_id);
                    pair_work.push((spec, raw_id));
                }
            }
        }
        tx.commit()?;
    }

    // Transfer pairs go one at a time through the pair constructor; each
    // pair is independently idempotent.
    for (spec, _raw_id) in pair_work {
        let pair = create_transfer_pair(conn, &spec)?;
        if pair.created {
            outcome.imported += 2;
            note_date(&mut outcome, &spec.posted_at);
        } else {
            outcome.db_duplicates += 1;
        }
    }

    conn.execute(
        "UPDATE import_batches SET imported_rows = ?1 WHERE id = ?2",
        rusqlite::params![outcome.imported as i64, batch_id],
    )?;

    outcome.push_warnings();
    Ok(outcome)
}

fn note_date(outcome: &mut ImportOutcome, posted_at: &str) {
    match &mut outcome.date_range {
        None => outcome.date_range = Some((posted_at.to_string(), posted_at.to_string())),
        Some((min, max)) => {
            if posted_at < min.as_str() {
                *min = posted_at.to_string();
            }
            if posted_at > max.as_str() {
                *max = posted_at.to_string();
            }
        }
    }
}
