mod accounts;
mod classifier;
mod cli;
mod db;
mod error;
mod fingerprint;
mod fmt;
mod ledger;
mod matcher;
mod models;
mod pipeline;
mod settings;
mod sync;

use clap::Parser;

use cli::{AccountsCommands, Cli, Commands, ReconcileCommands};

fn main() {
    let cli = Cli::parse();
    let user = cli.user;

    let result = match cli.command {
        Commands::Init { data_dir } => cli::init::run(data_dir),
        Commands::Accounts { command } => match command {
            AccountsCommands::Add {
                name,
                account_type,
                institution,
                parent,
            } => cli::accounts::add(user, &name, &account_type, institution.as_deref(), parent),
            AccountsCommands::List => cli::accounts::list(user),
            AccountsCommands::Link { id, parent } => cli::accounts::link(user, id, parent),
            AccountsCommands::Cards => cli::accounts::cards(user),
        },
        Commands::Import {
            file,
            kind,
            institution,
            account,
            card,
            keep_payment_lines,
        } => cli::import::run(
            user,
            &file,
            &kind,
            institution.as_deref(),
            account.as_deref(),
            card,
            keep_payment_lines,
        ),
        Commands::Sync => cli::sync::run(user),
        Commands::Reconcile { command } => match command {
            ReconcileCommands::Suggest => cli::reconcile::suggest(user),
            ReconcileCommands::List => cli::reconcile::list(user),
            ReconcileCommands::Confirm { id } => cli::reconcile::confirm(user, id),
            ReconcileCommands::Reject { id, reason } => {
                cli::reconcile::reject(user, id, reason.as_deref())
            }
            ReconcileCommands::LinkCard { entry, card } => {
                cli::reconcile::link_card(user, entry, card)
            }
        },
        Commands::Dashboard { from, to } => cli::dashboard::run(user, from.as_deref(), to.as_deref()),
        Commands::Inbox => cli::inbox::run(user),
        Commands::Backup { output } => cli::backup::run(output),
        Commands::Status => cli::status::run(user),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
