//! historyindex CLI: run an indexing node and manage its database.
//!
//! # Commands
//! ```text
//! historyindex run       [--db <path>] [--listen <addr>] [--no-http] [--produce-every-ms <N>]
//! historyindex import    --file <blocks.jsonl>
//! historyindex generate  --count <N> --file <out.jsonl>
//! historyindex status
//! historyindex reset
//! historyindex info
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use historyindex_core::{BlockSource, IndexStore};
use historyindex_storage::SqliteStorage;

mod cmd_blocks;
mod config;
mod logging;
mod node;

use config::NodeConfig;

#[derive(Parser)]
#[command(
    name = "historyindex",
    about = "Ordered, resumable transaction history index for a block chain",
    long_about = "
historyindex keeps a derived history index (transactions, outputs and
per-address history) in step with a stored block chain. The index records the
height it has been applied up to and resumes from there after a restart.

ENVIRONMENT VARIABLES:
  RUST_LOG    tracing filter, overrides the `log` section of the config file
",
    version
)]
struct Cli {
    /// YAML config file (defaults are used when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path (overrides `db_path`)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node: index the stored chain, follow new blocks, serve queries
    Run {
        /// HTTP listen address (overrides `http.listen`)
        #[arg(long)]
        listen: Option<String>,
        /// Do not start the HTTP query API
        #[arg(long)]
        no_http: bool,
        /// Append a synthetic block every N milliseconds (demo mode)
        #[arg(long)]
        produce_every_ms: Option<u64>,
    },

    /// Append blocks from a JSON-lines file to the stored chain
    Import {
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Write synthetic blocks continuing from the stored head
    Generate {
        /// Number of blocks
        #[arg(short = 'n', long, default_value_t = 10)]
        count: u64,
        /// Output JSON-lines file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Show chain head, parsed height and lag
    Status,

    /// Drop the history index; the next run rebuilds it from height 1
    Reset,

    /// Print version and default settings
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = NodeConfig::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    logging::init_tracing(&config.log, cli.verbose);

    match cli.command {
        Commands::Run {
            listen,
            no_http,
            produce_every_ms,
        } => {
            if let Some(listen) = listen {
                config.http.listen = listen;
            }
            if no_http {
                config.http.enabled = false;
            }
            node::run(config, produce_every_ms.map(Duration::from_millis)).await
        }

        Commands::Import { file } => {
            let storage = open_storage(&config).await?;
            let imported = cmd_blocks::import(&storage, &file).await?;
            println!("Imported {imported} blocks from {}", file.display());
            Ok(())
        }

        Commands::Generate { count, file } => {
            let storage = open_storage(&config).await?;
            let head = cmd_blocks::generate(&storage, count, &file).await?;
            let head_height = head.map_or(0, |b| b.height());
            println!("Wrote {count} blocks to {} (last height {head_height})", file.display());
            Ok(())
        }

        Commands::Status => cmd_status(&config).await,

        Commands::Reset => {
            let storage = open_storage(&config).await?;
            storage.reset_index().await?;
            println!("History index reset; parsed height is now 0");
            Ok(())
        }

        Commands::Info => cmd_info(&config, cli.verbose),
    }
}

// ─── Command implementations ─────────────────────────────────────────────────

async fn open_storage(config: &NodeConfig) -> Result<SqliteStorage> {
    let db = config.db_location()?;
    SqliteStorage::open(db)
        .await
        .with_context(|| format!("opening database {db}"))
}

async fn cmd_status(config: &NodeConfig) -> Result<()> {
    let storage = open_storage(config).await?;
    let head = storage.head_height().await?;
    let parsed = storage.parsed_height().await?;

    println!("Database:      {}", config.db_path.display());
    println!("Chain head:    {head}");
    println!("Parsed height: {parsed}");
    if parsed > head {
        println!("Lag:           index is {} blocks AHEAD of the chain", parsed - head);
    } else {
        println!("Lag:           {} blocks", head - parsed);
    }
    println!("Transactions:  {}", storage.tx_count().await?);
    println!("Outputs:       {}", storage.output_count().await?);
    Ok(())
}

fn cmd_info(config: &NodeConfig, verbose: bool) -> Result<()> {
    println!("historyindex v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Settings:");
    println!("  Database         {}", config.db_path.display());
    println!(
        "  HTTP API         {} ({})",
        config.http.listen,
        if config.http.enabled { "enabled" } else { "disabled" }
    );
    println!("  Queue capacity   {}", config.parser.queue_capacity);
    println!("  On fatal error   {:?}", config.parser.on_fatal);
    match config.parser.stop_timeout_ms {
        Some(ms) => println!("  Stop timeout     {ms} ms"),
        None => println!("  Stop timeout     none"),
    }
    println!("  Log filter       {}", config.log.directives(verbose));
    println!();
    println!("Effective config (YAML):");
    print!("{}", serde_yaml::to_string(config)?);
    Ok(())
}
