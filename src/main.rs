//! `onyx-background` CLI entry point.
//!
//! The `status` subcommand reads the shared key layout read-only and prints
//! one tab-separated table per queue.

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use onyx_background::{OnyxError, QueueStatus, queue_statuses};

#[derive(Parser)]
#[command(name = "onyx-background")]
#[command(about = "Redis-backed background job processing")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a per-queue status table
    Status {
        /// Comma-separated queue names
        #[arg(short = 'q', long, value_delimiter = ',', default_value = "default")]
        queues: Vec<String>,

        /// Redis URL
        #[arg(short = 'r', long, default_value = "redis://127.0.0.1:6379")]
        redis_url: String,

        /// Key-prefix namespace
        #[arg(short = 'n', long, default_value = "onyx-background")]
        namespace: String,

        /// Verbose logging
        #[arg(short = 'v', long)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e)
            if matches!(
                e.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            ) =>
        {
            let _ = e.print();
            std::process::exit(0);
        }
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    };

    if let Err(e) = run(cli).await {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), OnyxError> {
    match cli.command {
        Command::Status {
            queues,
            redis_url,
            namespace,
            verbose,
        } => {
            init_tracing(verbose);

            let client = deadpool_redis::redis::Client::open(redis_url.as_str())?;
            let mut conn = client.get_multiplexed_async_connection().await?;

            for status in queue_statuses(&mut conn, &namespace, &queues).await? {
                println!("{}", status.queue);
                println!("{}", QueueStatus::header());
                println!("{}", status.row());
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();
}
