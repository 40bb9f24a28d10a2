use crate::cli::{resolve_user, DB_FILE};
use crate::db::get_connection;
use crate::error::Result;
use crate::settings::load_settings;

pub fn run(user: Option<i64>) -> Result<()> {
    let settings = load_settings();
    let data_dir = std::path::PathBuf::from(&settings.data_dir);
    let db_path = data_dir.join(DB_FILE);
    let user_id = resolve_user(user);

    println!("User id:    {user_id}");
    println!("Data dir:   {}", data_dir.display());
    println!("Database:   {}", db_path.display());

    if db_path.exists() {
        let conn = get_connection(&db_path)?;

        let accounts: i64 = conn.query_row(
            "SELECT count(*) FROM accounts WHERE user_id = ?1",
            [user_id],
            |r| r.get(0),
        )?;
        let cards: i64 = conn.query_row(
            "SELECT count(*) FROM credit_card_accounts WHERE user_id = ?1",
            [user_id],
            |r| r.get(0),
        )?;
        let entries: i64 = conn.query_row(
            "SELECT count(*) FROM ledger_entries WHERE user_id = ?1",
            [user_id],
            |r| r.get(0),
        )?;
        let unmatched: i64 = conn.query_row(
            "SELECT count(*) FROM ledger_entries \
             WHERE user_id = ?1 AND reconciliation_status = 'unmatched'",
            [user_id],
            |r| r.get(0),
        )?;
        let suggestions: i64 = conn.query_row(
            "SELECT count(*) FROM transfer_suggestions \
             WHERE user_id = ?1 AND status = 'suggested'",
            [user_id],
            |r| r.get(0),
        )?;
        let legacy: i64 = conn.query_row(
            "SELECT count(*) FROM legacy_transactions WHERE user_id = ?1",
            [user_id],
            |r| r.get(0),
        )?;

        println!();
        println!("Accounts:           {accounts}");
        println!("Credit cards:       {cards}");
        println!("Ledger entries:     {entries}");
        println!("Unmatched:          {unmatched}");
        println!("Open suggestions:   {suggestions}");
        println!("Legacy records:     {legacy}");
    } else {
        println!();
        println!("Database not found. Run `tally init` to set up.");
    }

    Ok(())
}
