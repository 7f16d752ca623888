mod api;
mod dispatch;
mod sessions;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wagate_core::{
    config::{self, Config},
    shellexpand,
    types::{Account, SessionEventKind},
};
use wagate_store::Store;
use wagate_whatsapp::{generate_qr_terminal, WhatsAppSessionFactory};

use crate::dispatch::Dispatcher;
use crate::sessions::SessionManager;

#[derive(Parser)]
#[command(
    name = "wagate",
    version,
    about = "wagate — self-hosted WhatsApp messaging gateway"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file.
    #[arg(short, long, env = "WAGATE_CONFIG", default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API and restore account sessions.
    Serve,
    /// Show configuration and account overview.
    Status,
    /// Pair an account by scanning a QR code in the terminal.
    Pair {
        /// Account id or name.
        account: String,
    },
    /// Write a config file with default values.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

/// Install the tracing subscriber: a daily-rolling file under `{data_dir}/logs`,
/// plus stdout when `stdout` is set. The guard must outlive the program.
fn init_logging(cfg: &Config, stdout: bool) -> anyhow::Result<WorkerGuard> {
    let log_dir = format!("{}/logs", shellexpand(&cfg.wagate.data_dir));
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create log dir {log_dir}"))?;

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "wagate.log"));

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.wagate.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .with(stdout.then(fmt::layer))
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve => {
            let cfg = config::load(&cli.config)?;
            let _guard = init_logging(&cfg, true)?;
            serve(cfg).await?;
        }
        Commands::Status => {
            let cfg = config::load(&cli.config)?;
            let _guard = init_logging(&cfg, false)?;
            status(&cli.config, &cfg).await?;
        }
        Commands::Pair { account } => {
            let cfg = config::load(&cli.config)?;
            let _guard = init_logging(&cfg, false)?;
            pair(&cfg, &account).await?;
        }
        Commands::Init { force } => {
            let path = std::path::Path::new(&cli.config);
            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists. Use --force to overwrite it.",
                    path.display()
                );
            }
            let rendered = config::render(&Config::default())?;
            std::fs::write(path, rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Wrote default config to {}", path.display());
        }
    }

    Ok(())
}

/// Open the store and build the session manager on the real WhatsApp factory.
async fn build_sessions(cfg: &Config) -> anyhow::Result<(Store, Arc<SessionManager>)> {
    let store = Store::new(&cfg.store).await?;
    let factory = WhatsAppSessionFactory::new(store.pool().clone(), cfg.whatsapp.clone()).await?;
    let sessions = SessionManager::new(store.clone(), Arc::new(factory));
    Ok((store, sessions))
}

async fn serve(cfg: Config) -> anyhow::Result<()> {
    tracing::info!("{} starting", cfg.wagate.name);
    let (store, sessions) = build_sessions(&cfg).await?;

    let restored = sessions.restore(cfg.whatsapp.auto_reconnect).await?;
    if restored > 0 {
        tracing::info!("reconnecting {restored} account(s)");
    }

    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        sessions.clone(),
        cfg.bulk.clone(),
    ));
    let state = api::ApiState::new(&cfg, store, sessions, dispatcher);
    api::serve(&cfg, state).await?;
    Ok(())
}

async fn status(config_path: &str, cfg: &Config) -> anyhow::Result<()> {
    println!("wagate — Status\n");
    println!("Config:   {config_path}");
    println!("Database: {}", shellexpand(&cfg.store.db_path));
    println!("API:      http://{}:{}", cfg.api.host, cfg.api.port);
    println!(
        "Auth:     {}",
        if cfg.api.api_key.is_empty() {
            "disabled (no api_key)"
        } else {
            "bearer token"
        }
    );
    println!();

    let store = Store::new(&cfg.store).await?;
    let accounts = store.list_accounts().await?;
    if accounts.is_empty() {
        println!("No accounts yet. Create one with POST /api/accounts.");
        return Ok(());
    }

    println!("Accounts:");
    for account in accounts {
        let counts = store.count_messages_by_status(&account.id).await?;
        println!(
            "  {} {:<20} {:<13} sent {:>5}  failed {:>5}",
            account.id,
            account.name,
            account.status.as_str(),
            counts.sent,
            counts.failed
        );
    }
    Ok(())
}

/// Find an account by id, falling back to an exact name match.
async fn find_account(store: &Store, key: &str) -> anyhow::Result<Account> {
    if let Ok(account) = store.get_account(key).await {
        return Ok(account);
    }
    store
        .list_accounts()
        .await?
        .into_iter()
        .find(|a| a.name == key)
        .with_context(|| format!("no account with id or name '{key}'"))
}

/// Connect an account and print each QR code until the phone has paired.
async fn pair(cfg: &Config, key: &str) -> anyhow::Result<()> {
    let (store, sessions) = build_sessions(cfg).await?;
    let account = find_account(&store, key).await?;

    if sessions.is_connected(&account.id).await {
        println!("Account '{}' is already connected.", account.name);
        return Ok(());
    }

    let mut events = sessions.subscribe();
    sessions.connect(&account.id).await?;
    println!("Pairing account '{}'.", account.name);
    println!("On your phone: WhatsApp > Linked devices > Link a device.\n");

    if let Some(qr) = sessions.latest_qr(&account.id).await? {
        println!("{}", generate_qr_terminal(&qr)?);
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) if event.account_id == account.id => match event.kind {
                    SessionEventKind::QrCode(qr) => {
                        println!("{}", generate_qr_terminal(&qr)?);
                        println!("(QR codes rotate; scan the latest one)\n");
                    }
                    SessionEventKind::Paired => println!("Paired. Finishing connection..."),
                    SessionEventKind::Connected => {
                        println!("Connected. Account '{}' is ready.", account.name);
                        return Ok(());
                    }
                    SessionEventKind::LoggedOut => {
                        anyhow::bail!("session was logged out during pairing");
                    }
                    SessionEventKind::Connecting | SessionEventKind::Disconnected => {}
                },
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => anyhow::bail!("session event stream closed"),
            },
            _ = tokio::signal::ctrl_c() => {
                sessions.disconnect(&account.id).await?;
                anyhow::bail!("pairing cancelled");
            }
        }
    }
}
