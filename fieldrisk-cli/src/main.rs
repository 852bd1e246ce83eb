//! FieldRisk command-line tool
//!
//! Usage:
//!   fieldrisk [--config fieldrisk.toml] [--verbose] <command>
//!
//! Configuration comes from the optional file, then `FIELDRISK__*`
//! environment variables (a `.env` file is honoured). Logs go to stderr;
//! command output goes to stdout.

mod commands;

use anyhow::Context;
use clap::{Parser, Subcommand};
use fieldrisk_sync::{FieldRiskConfig, SyncEngine};
use std::path::PathBuf;
use tracing_subscriber::{
    fmt, fmt::time::ChronoUtc, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

#[derive(Parser, Debug)]
#[command(name = "fieldrisk")]
#[command(about = "Save, back up and share workplace risk assessments")]
#[command(version)]
struct Args {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, env = "FIELDRISK_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Save an assessment from a JSON file
    Save {
        file: PathBuf,
    },
    /// List assessments, syncing first when online
    List {
        /// Only assessments in this folder
        #[arg(long)]
        folder: Option<String>,
    },
    /// Merge with the remote backup
    Sync,
    /// Assessments not yet confirmed by the remote
    Pending {
        /// Try to push them now
        #[arg(long)]
        push: bool,
    },
    /// Share an assessment; prints the share id and key
    Share {
        id: String,
        /// Days until the share expires
        #[arg(long)]
        days: Option<u32>,
        /// Who the share is meant for (stored as a hint)
        #[arg(long)]
        recipient: Option<String>,
    },
    /// Import a shared assessment
    Redeem {
        share_id: String,
        key: String,
        /// Destination folder id
        #[arg(long)]
        folder: String,
    },
    /// Write an assessment as JSON
    Export {
        id: String,
        /// Output file; stdout if omitted
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Manage folders
    #[command(subcommand)]
    Folder(FolderCommand),
    /// Manage the in-progress draft
    #[command(subcommand)]
    Draft(DraftCommand),
    /// Print this installation's device id
    DeviceId,
}

#[derive(Subcommand, Debug)]
enum FolderCommand {
    Add { name: String },
    List,
    Rename { id: String, name: String },
    Delete { id: String },
}

#[derive(Subcommand, Debug)]
enum DraftCommand {
    /// Store a JSON file as the draft
    Save { file: PathBuf },
    Show,
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_tracing(args.verbose);

    let config = FieldRiskConfig::load(args.config.as_ref()).context("loading configuration")?;
    tracing::debug!(?config, "Configuration loaded");

    let engine = SyncEngine::open(&config)
        .await
        .context("opening local store")?;

    commands::run(&engine, args.command).await
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("fieldrisk_sync={level},fieldrisk={level},sqlx=warn").into());

    if std::env::var_os("FIELDRISK_LOG_JSON").is_some() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(false)
                    .with_writer(std::io::stderr)
                    .json(),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(verbose)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}
