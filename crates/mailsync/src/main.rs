//! `mailsync` - IMAP mirror daemon
//!
//! Keeps a local copy of every configured account's mail, polling on an
//! interval and writing messages, cursors and attachments under the data
//! directory.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod cli;

use anyhow::{Context, Result, bail};
use clap::Parser;
use mailsync_core::{
    Account, AccountDirectory, AccountId, AccountRepository, ImapConfig, ImapConnector, Scheduler,
    SqliteStoreProvider, SyncConfig, SyncOrchestrator, validate_account,
};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{AddArgs, Cli, Command};

type DaemonScheduler = Scheduler<AccountRepository, SqliteStoreProvider, ImapConnector>;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so `once` output stays machine-readable.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailsync=info,mailsync_core=info,mailsync_imap=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env().context("invalid MAILSYNC_* configuration")?;
    let accounts_db = config.accounts_db();
    let accounts = AccountRepository::new(&accounts_db)
        .await
        .with_context(|| format!("cannot open account directory {}", accounts_db.display()))?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(accounts, config).await,
        Command::Once => once(accounts, config).await,
        Command::Add(args) => add(&accounts, args).await,
        Command::List => list(&accounts).await,
        Command::Enable { id } => enable(&accounts, id).await,
    }
}

/// Builds the scheduler and a shutdown channel flipped by Ctrl-C.
fn scheduler(accounts: AccountRepository, config: SyncConfig) -> DaemonScheduler {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received, finishing in-flight batches"),
            Err(e) => warn!(error = %e, "cannot listen for Ctrl-C, shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });

    let stores = SqliteStoreProvider::new(config.store_dir());
    let connector = ImapConnector::new(config.command_timeout(), config.max_message_bytes);
    let orchestrator = SyncOrchestrator::new(connector, config);
    Scheduler::new(accounts, stores, orchestrator, shutdown_rx)
}

async fn run(accounts: AccountRepository, config: SyncConfig) -> Result<()> {
    info!(
        data_dir = %config.data_dir.display(),
        interval_secs = config.interval_secs,
        "starting mailsync"
    );
    scheduler(accounts, config).run().await;
    info!("mailsync stopped");
    Ok(())
}

async fn once(accounts: AccountRepository, config: SyncConfig) -> Result<()> {
    let Some(results) = scheduler(accounts, config).run_cycle().await else {
        bail!("another sync cycle is already running");
    };
    for (account, result) in results {
        let line = serde_json::json!({ "account": account, "result": result });
        println!("{line}");
    }
    Ok(())
}

async fn add(accounts: &AccountRepository, args: AddArgs) -> Result<()> {
    let mut account = Account::with_email(&args.email);
    if let Some(name) = args.name {
        account.name = name;
    }
    if let Some(host) = args.host {
        account.imap.host = host;
    }
    account.imap.security = args.security;
    account.imap.port = args
        .port
        .unwrap_or_else(|| ImapConfig::default_port(args.security));
    if let Some(username) = args.username {
        account.imap.username = username;
    }
    account.imap.password = args.password;

    if let Err(errors) = validate_account(&account) {
        let details: Vec<String> = errors.iter().map(ToString::to_string).collect();
        bail!("invalid account: {}", details.join("; "));
    }

    accounts
        .save(&mut account)
        .await
        .context("cannot save account")?;
    let id = account
        .id
        .map_or_else(|| "?".to_string(), |id| id.to_string());
    println!(
        "Added account {id}: {} <{}> via {}:{} ({})",
        account.name,
        account.email,
        account.imap.host,
        account.imap.port,
        account.imap.security.display_name()
    );
    Ok(())
}

async fn list(accounts: &AccountRepository) -> Result<()> {
    let all = accounts.list().await.context("cannot list accounts")?;
    if all.is_empty() {
        println!("No accounts. Add one with `mailsync add`.");
        return Ok(());
    }

    println!(
        "{:>4}  {:<20} {:<32} {:<9} {:>6}  {:<20} ERROR",
        "ID", "NAME", "EMAIL", "STATUS", "ERRORS", "LAST SYNC"
    );
    for account in all {
        println!(
            "{:>4}  {:<20} {:<32} {:<9} {:>6}  {:<20} {}",
            account.id.map_or_else(String::new, |id| id.to_string()),
            account.name,
            account.email,
            status(&account),
            account.error_count,
            account
                .last_sync_at
                .map_or_else(|| "never".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
            account.error_message.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

const fn status(account: &Account) -> &'static str {
    if !account.is_active {
        "inactive"
    } else if account.sync_enabled {
        "enabled"
    } else {
        "disabled"
    }
}

async fn enable(accounts: &AccountRepository, id: AccountId) -> Result<()> {
    accounts
        .enable(id)
        .await
        .with_context(|| format!("cannot enable account {id}"))?;
    println!("Sync re-enabled for account {id}");
    Ok(())
}
