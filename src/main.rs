//! # docs-expert CLI (`dex`)
//!
//! The `dex` binary drives the documentation pipeline and the chat API.
//!
//! ## Usage
//!
//! ```bash
//! dex --config ./config/docs-expert.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dex init` | Create the SQLite database and run schema migrations |
//! | `dex convert` | Export every configured version as Markdown |
//! | `dex process` | Convert, chunk, embed and store changed sources |
//! | `dex check` | Show which sources changed since the last run |
//! | `dex ask "<q>" --version V` | Answer one question in the terminal |
//! | `dex stats` | Per-version source and chunk counts |
//! | `dex serve` | Start the HTTP chat API |
//!
//! ## Examples
//!
//! ```bash
//! # Ingest only 18.0, printing progress as JSON lines
//! dex process --version 18.0 --progress json
//!
//! # See what a run would do without touching the store
//! dex process --dry-run
//!
//! # Ask a question
//! dex ask "How do I define a computed field?" --version 18.0
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use docs_expert::progress::ProgressMode;
use docs_expert::{chat, config, db, ingest, server, stats};

/// docs-expert: versioned documentation search and chat.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docs-expert.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "dex",
    about = "docs-expert: versioned documentation ingestion and retrieval-augmented chat",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docs-expert.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Convert reStructuredText and Markdown sources to Markdown files
    /// under `paths.markdown_dir`.
    Convert,

    /// Ingest changed sources into the store.
    ///
    /// Unchanged files are skipped by fingerprint; removed files lose
    /// their chunks.
    Process {
        /// Only this version (e.g. `18.0`). Defaults to every configured version.
        #[arg(long)]
        version: Option<String>,

        /// Show what would change without converting or embedding anything.
        #[arg(long)]
        dry_run: bool,

        /// Progress output on stderr. Defaults to human when stderr is a TTY.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Report new, modified and removed sources per version.
    Check,

    /// Ask a single question against one version.
    Ask {
        /// The question.
        query: String,

        /// Documentation version (e.g. `18.0`).
        #[arg(long)]
        version: String,
    },

    /// Show database statistics.
    Stats,

    /// Start the HTTP chat API.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "docs_expert=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            db::open_store(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Convert => {
            ingest::run_convert(&cfg)?;
        }
        Commands::Process {
            version,
            dry_run,
            progress,
        } => {
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            ingest::run_process(&cfg, version.as_deref(), dry_run, mode.reporter()).await?;
        }
        Commands::Check => {
            ingest::run_check(&cfg).await?;
        }
        Commands::Ask { query, version } => {
            chat::run_ask(&cfg, &query, &version).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
