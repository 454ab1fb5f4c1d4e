//! # docchat CLI
//!
//! ## Usage
//!
//! ```bash
//! docchat --config ./config/docchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docchat init` | Create the SQLite database and run schema migrations |
//! | `docchat ingest` | Load, chunk and embed the document collection |
//! | `docchat ask "<question>"` | Answer one question |
//! | `docchat chat` | Interactive conversation on stdin |
//! | `docchat serve` | Start the HTTP API |
//! | `docchat profiles` | List domain profiles |
//! | `docchat stats` | Index coverage and query statistics |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use docchat::config::{load_config, Config};
use docchat::engine::Engine;
use docchat::{ask, ingest, logging, migrate, profiles, server, stats};

/// docchat: conversational question answering over your documents.
#[derive(Parser)]
#[command(name = "docchat", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Load documents from `[documents].root`, embed changed chunks and
    /// persist the index.
    Ingest {
        /// Re-embed every chunk instead of only new or changed ones.
        #[arg(long)]
        full: bool,

        /// Report what would be ingested without embedding or writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Answer a single question.
    Ask {
        question: String,

        /// Domain profile (falls back to the default when unknown).
        #[arg(long)]
        profile: Option<String>,
    },

    /// Start an interactive conversation. Type `exit` or `quit` to leave.
    Chat {
        #[arg(long)]
        profile: Option<String>,

        /// Session identifier; a random one is used by default.
        #[arg(long)]
        session: Option<String>,

        /// Write the session transcript as JSON to this path on exit.
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// List domain profiles. The default is marked with `*`.
    Profiles,

    /// Show index coverage and query statistics.
    Stats,
}

/// A missing file under the default path means "all defaults"; an explicit
/// path must exist.
fn read_config(path: &std::path::Path) -> anyhow::Result<Config> {
    if !path.exists() && path == std::path::Path::new("./config/docchat.toml") {
        return Ok(Config::default());
    }
    load_config(path)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = read_config(&cli.config)?;
    logging::init(&cfg.logging);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Ingest { full, dry_run } => {
            ingest::run_ingest(&cfg, full, dry_run).await?;
        }
        Commands::Ask { question, profile } => {
            let engine = Engine::open(cfg).await?;
            ask::run_ask(&engine, &question, profile.as_deref()).await?;
        }
        Commands::Chat {
            profile,
            session,
            export,
        } => {
            let engine = Engine::open(cfg).await?;
            ask::run_chat(&engine, profile.as_deref(), session, export.as_deref()).await?;
        }
        Commands::Serve => {
            let engine = Arc::new(Engine::open(cfg).await?.with_session_limits()?);
            server::run_server(engine).await?;
        }
        Commands::Profiles => {
            profiles::run_profiles(&cfg)?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
