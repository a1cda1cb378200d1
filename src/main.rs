use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use mailsift::config::{self, Credentials};
use mailsift::error::{ConfigError, Error, StoreError};
use mailsift::pipeline::loader::{self, RuleLoader};
use mailsift::pipeline::rules::RuleEngine;
use mailsift::pipeline::{self, ScanSummary};
use mailsift::session::RetrievalSession;
use mailsift::store::ImapStore;

/// Filter IMAP mail with an ordered list of rules.
#[derive(Debug, Parser)]
#[command(name = "mailsift", version)]
struct Cli {
    /// Log every message and action.
    #[arg(short, long)]
    verbose: bool,

    /// Credentials file (default: <config dir>/credentials.toml).
    #[arg(long, value_name = "PATH")]
    credentials: Option<PathBuf>,

    /// Rules file (default: <config dir>/rules.toml).
    #[arg(long, value_name = "PATH")]
    rules: Option<PathBuf>,

    /// Folder to filter.
    #[arg(long, default_value = "INBOX")]
    folder: String,

    /// Filter again every SECS seconds until interrupted.
    #[arg(long, value_name = "SECS")]
    interval: Option<u64>,

    /// Only load and validate the rules file.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
        }
    }
}

async fn run(cli: Cli) -> mailsift::Result<()> {
    let rules_path = match cli.rules {
        Some(path) => path,
        None => loader::rules_path_in(&config::config_dir()?),
    };

    if cli.check {
        let rules = RuleLoader::default().load(&rules_path)?;
        println!("{}: {} rule(s) OK", rules_path.display(), rules.len());
        return Ok(());
    }

    let credentials_path = match cli.credentials {
        Some(path) => path,
        None => config::default_credentials_path()?,
    };
    let credentials = match config::load_credentials(&credentials_path) {
        Ok(credentials) => Arc::new(credentials),
        Err(ConfigError::NotFound { path }) => {
            config::write_template(&path)?;
            println!(
                "Could not find server credentials file. A template has been written to {}. \
                 Please edit it and run again.",
                path.display()
            );
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    // Rules are checked before any connection is made.
    RuleLoader::default().load(&rules_path)?;

    let Some(secs) = cli.interval else {
        filter_once(credentials, rules_path, cli.folder).await?;
        return Ok(());
    };

    info!(interval_secs = secs, folder = %cli.folder, "Filtering periodically");
    let mut tick = tokio::time::interval(Duration::from_secs(secs.max(1)));
    loop {
        tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
                return Ok(());
            }
            _ = tick.tick() => {
                let run = filter_once(Arc::clone(&credentials), rules_path.clone(), cli.folder.clone());
                if let Err(e) = run.await {
                    error!(error = %e, "Filter run failed");
                }
            }
        }
    }
}

/// One full pass over `folder` on a blocking thread.
async fn filter_once(
    credentials: Arc<Credentials>,
    rules_path: PathBuf,
    folder: String,
) -> mailsift::Result<ScanSummary> {
    tokio::task::spawn_blocking(move || filter_folder(&credentials, &rules_path, &folder))
        .await
        .map_err(|e| Error::Store(StoreError::Backend(format!("filter task panicked: {e}"))))?
}

fn filter_folder(
    credentials: &Credentials,
    rules_path: &Path,
    folder: &str,
) -> mailsift::Result<ScanSummary> {
    let rules = RuleLoader::default().load(rules_path)?;
    let session = RetrievalSession::new(ImapStore::connect(credentials)?);
    session.select_mailbox(folder)?;
    let engine = RuleEngine::new(rules, session.gateway());
    pipeline::run_scan(&session, &engine)
}
