//! # index-sync CLI (`isync`)
//!
//! Keeps a remote search index in step with a chunked corpus, re-embedding
//! and re-uploading only what changed.
//!
//! ## Usage
//!
//! ```bash
//! isync --config ./config/isync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `isync sync` | Diff the corpus against the index and apply the changes |
//! | `isync sync --dry-run` | Show the plan without writing anything |
//! | `isync sync --recreate` | Drop the index and upload everything |
//! | `isync plan` | Dry run that lists every planned action |
//! | `isync init-index` | Create or update the index schema |
//!
//! ## Exit codes
//!
//! `0` on success, `1` on a fatal error, `2` when the run finished but some
//! chunks failed.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use index_sync::config;
use index_sync::progress::ProgressMode;
use index_sync::sync_cmd::{self, SyncArgs};

/// Incremental search index synchronization.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Secrets are read from the environment variables it names.
#[derive(Parser)]
#[command(
    name = "isync",
    about = "Incrementally synchronize a search index with a chunked corpus",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/isync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Synchronize the index with the corpus.
    ///
    /// Reads the index's chunk fingerprints, diffs them against the corpus,
    /// then embeds and upserts new or changed chunks and deletes chunks that
    /// no longer exist locally.
    Sync {
        /// Compute the plan only; no embedding, upload or delete calls.
        #[arg(long)]
        dry_run: bool,

        /// Drop and recreate the index, then upload every chunk.
        #[arg(long)]
        recreate: bool,

        /// Maximum number of batches in flight (overrides `sync.max_concurrency`).
        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Chunks per embedding/upload batch (overrides `sync.batch_size`).
        #[arg(long)]
        batch_size: Option<usize>,

        /// Corpus file (overrides `corpus.path`).
        #[arg(long)]
        corpus: Option<PathBuf>,

        /// Print the run report as JSON.
        #[arg(long)]
        json: bool,

        /// Progress output on stderr. Defaults to human when stderr is a TTY.
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,
    },

    /// Show every action a sync would take, without writing anything.
    Plan {
        /// Corpus file (overrides `corpus.path`).
        #[arg(long)]
        corpus: Option<PathBuf>,

        /// Plan against an empty index, as `sync --recreate` would.
        #[arg(long)]
        recreate: bool,

        /// Print the plan as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Create the index, or update its schema, without touching documents.
    InitIndex,
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("index_sync=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    let report = match cli.command {
        Commands::Sync {
            dry_run,
            recreate,
            max_concurrency,
            batch_size,
            corpus,
            json,
            progress,
        } => {
            let args = SyncArgs {
                dry_run,
                recreate,
                max_concurrency,
                batch_size,
                corpus,
                json,
                list_actions: false,
                progress: progress
                    .map(ProgressMode::from)
                    .unwrap_or_else(ProgressMode::default_for_tty),
            };
            sync_cmd::run_sync(&cfg, &args).await?
        }
        Commands::Plan {
            corpus,
            recreate,
            json,
        } => {
            let args = SyncArgs {
                dry_run: true,
                recreate,
                max_concurrency: None,
                batch_size: None,
                corpus,
                json,
                list_actions: true,
                progress: ProgressMode::Off,
            };
            sync_cmd::run_sync(&cfg, &args).await?
        }
        Commands::InitIndex => {
            sync_cmd::run_init_index(&cfg).await?;
            return Ok(());
        }
    };

    if report.has_failures() {
        std::process::exit(2);
    }
    Ok(())
}
