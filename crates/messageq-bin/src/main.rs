//! messageq - journal raw messages to Kafka, Pulsar or SQS with bounded,
//! batched writes and acknowledgments.

mod pump;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use messageq_config::{init_logging, Config, JournalMode, Paths};
use tokio::io::BufReader;

/// messageq command-line interface.
#[derive(Parser)]
#[command(name = "messageq")]
#[command(about = "Batched message journal for Kafka, Pulsar and SQS")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). Defaults to the configured level
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for config and logs. Defaults to ~/.messageq
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// JSONL log file. Defaults to <base-dir>/logs/messageq.jsonl
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Journal input lines, read them back and acknowledge them
    Pump {
        /// Journal mode, overriding the configuration (kafka, pulsar, sqs)
        #[arg(short, long)]
        mode: Option<JournalMode>,

        /// Read lines from this file instead of stdin
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let mut config = Config::load(&paths)?;

    match cli.command {
        Commands::Pump { mode, input } => {
            paths.ensure_dirs()?;
            let level = cli.log_level.unwrap_or_else(|| config.log_level.clone());
            init_logging(&level, Some(cli.log_file.unwrap_or_else(|| paths.log_file())))?;

            if let Some(mode) = mode {
                config.message_journal_mode = mode;
            }
            let shutdown = async {
                if tokio::signal::ctrl_c().await.is_err() {
                    // No signal handler; run until input ends.
                    std::future::pending::<()>().await;
                }
            };

            let summary = match input {
                Some(path) => {
                    let file = tokio::fs::File::open(&path).await?;
                    pump::run_pump(config, BufReader::new(file), shutdown).await?
                }
                None => pump::run_pump(config, BufReader::new(tokio::io::stdin()), shutdown).await?,
            };

            println!("read:           {}", summary.read);
            println!("written:        {}", summary.written);
            println!("acknowledged:   {}", summary.acknowledged);
            println!("failed_batches: {}", summary.failed_batches);
            println!("failed_entries: {}", summary.failed_entries);
            println!("lost_entries:   {}", summary.lost_entries);
            if summary.interrupted {
                println!("(interrupted)");
            }
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
