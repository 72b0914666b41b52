use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use qdrain::{DEFAULT_DELAY_SECONDS, MAX_BATCH};

mod commands;

#[tokio::main]
pub async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "qdrain")]
#[command(about = "drain AWS SQS queues into a table or redrive them into another queue", long_about = None)]
pub struct Cli {
    /// AWS region of the queues
    #[arg(long, global = true, env = "AWS_REGION")]
    region: Option<String>,

    /// Override the SQS endpoint, e.g. http://localhost:4566 for LocalStack
    #[arg(long, global = true, env = "AWS_ENDPOINT_URL")]
    endpoint: Option<String>,

    /// Log more (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Csv,
    Jsonl,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Drain a queue and print its messages to stdout
    DrainToTable {
        /// Name of the queue to drain
        #[arg(short, long)]
        queue: String,

        #[arg(long, value_enum, default_value_t = Format::Csv)]
        format: Format,

        /// Put every drained message back on the queue once it is empty
        #[arg(long)]
        restore: bool,

        /// Messages per receive call
        #[arg(
            long,
            default_value_t = MAX_BATCH,
            value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..=MAX_BATCH as u64)
        )]
        batch_size: usize,
    },
    /// Move every message from one queue into another
    Redrive {
        /// Name of the source queue
        #[arg(short, long)]
        from: String,

        /// Name of the destination queue
        #[arg(short, long)]
        to: String,

        /// Delete each batch before sending, and send everything at the end.
        /// A failed send then loses messages.
        #[arg(long)]
        deferred: bool,

        /// Delivery delay for messages sent to a standard queue
        #[arg(long, default_value_t = DEFAULT_DELAY_SECONDS)]
        delay_seconds: i32,
    },
    /// List queue URLs
    List {
        #[arg(long)]
        prefix: Option<String>,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let transport = commands::connect(self.region.as_deref(), self.endpoint.as_deref()).await?;

        match self.command {
            Commands::DrainToTable {
                queue,
                format,
                restore,
                batch_size,
            } => commands::drain_to_table(&transport, &queue, format, restore, batch_size).await,
            Commands::Redrive {
                from,
                to,
                deferred,
                delay_seconds,
            } => commands::redrive(&transport, &from, &to, deferred, delay_seconds).await,
            Commands::List { prefix } => commands::list(&transport, prefix.as_deref()).await,
        }
    }
}
