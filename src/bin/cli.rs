//! KeelKV CLI
//!
//! Command-line interface for a local KeelKV data directory.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use keelkv::config::{CompactionPolicy, Config};
use keelkv::{Result, Store};
use tracing_subscriber::{fmt, EnvFilter};

/// KeelKV CLI
#[derive(Parser, Debug)]
#[command(name = "keelkv-cli")]
#[command(about = "CLI for the KeelKV embedded key-value store")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./keelkv_data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new key
    Create {
        /// The key to create
        key: String,

        /// The value to store
        value: String,
    },

    /// Read the value of a key
    Read {
        /// The key to read
        key: String,
    },

    /// Update an existing key
    Update {
        /// The key to update
        key: String,

        /// The new value
        value: String,
    },

    /// Delete an existing key
    Delete {
        /// The key to delete
        key: String,
    },

    /// List all keys
    List,

    /// Fold the log into a new snapshot
    Compact,

    /// Check the data directory without modifying it
    Verify,
}

fn main() -> ExitCode {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,keelkv=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let command = match args.command {
        Commands::Verify => return verify(&args.data_dir),
        command => command,
    };

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .compaction(CompactionPolicy::Manual)
        .build();
    let store: Store<String> = Store::open(config)?;

    match command {
        Commands::Create { key, value } => store.create(&key, value)?,
        Commands::Read { key } => println!("{}", store.read(&key)?),
        Commands::Update { key, value } => store.update(&key, value)?,
        Commands::Delete { key } => store.delete(&key)?,
        Commands::List => {
            for key in store.list_keys() {
                println!("{}", key);
            }
        }
        Commands::Compact => {
            let stats = store.compact()?;
            println!(
                "snapshot at sequence {} ({} keys, {} log records retired)",
                stats.sequence, stats.entries, stats.retired_records
            );
        }
        Commands::Verify => {}
    }

    store.close()
}

fn verify(data_dir: &Path) -> Result<()> {
    let report = keelkv::wal::verify(data_dir)?;
    println!("snapshot sequence: {}", report.snapshot_sequence);
    println!("snapshot entries:  {}", report.snapshot_entries);
    println!("log records:       {}", report.log_records);
    println!("stale records:     {}", report.stale_records);
    println!("last sequence:     {}", report.last_sequence);
    println!("torn tail bytes:   {}", report.torn_bytes);
    Ok(())
}
