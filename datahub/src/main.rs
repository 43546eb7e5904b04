use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use datahub::{Datahub, DatahubConfig, FlushReport};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "DATAHUB_CONFIG", default_value = "datahub.yaml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List channels
    Channels,
    /// Show the latest item(s) of a channel
    Latest {
        channel: String,
        /// Number of items
        #[arg(short = 'n', long)]
        count: Option<u32>,
    },
    /// Show channel status
    Status { channel: String },
    /// Queue JSON lines from stdin into a channel, then drain the queue
    Pipe { channel: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays machine readable
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = DatahubConfig::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config))?;

    tracing::debug!(?args, "Starting");

    match args.command {
        Command::Channels => print_json(&Datahub::new(config)?.get_channels().await?),
        Command::Latest { channel, count } => {
            print_json(&Datahub::new(config)?.get_latest(&channel, count).await?)
        }
        Command::Status { channel } => {
            print_json(&Datahub::new(config)?.get_channel_status(&channel).await?)
        }
        Command::Pipe { channel } => pipe(config, &channel).await,
    }
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Push every stdin line through the queue and wait until each item has been
/// reported by some flush.
async fn pipe(config: DatahubConfig, channel: &str) -> anyhow::Result<()> {
    let (reports_tx, mut reports) = mpsc::unbounded_channel::<FlushReport>();
    let hub = Datahub::builder(config)
        .on_queue_finished(move |report| {
            let _ = reports_tx.send(report.clone());
        })
        .build()?;

    if !hub.queue_enabled() {
        bail!("The write queue is disabled in the configuration");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut queued = 0usize;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let item: Value = serde_json::from_str(line)
            .with_context(|| format!("Line {} is not valid JSON", queued + 1))?;
        hub.add_content_to_queue(channel, item)?;
        queued += 1;
    }
    tracing::info!(queued, channel, "Input read, draining queue");

    hub.finish_queue();
    hub.send_queue().await;

    let mut reported = 0usize;
    let mut failed = 0usize;
    while reported < queued {
        let Some(report) = reports.recv().await else {
            break;
        };
        for outcome in &report.outcomes {
            reported += outcome.item_count;
            if !outcome.success {
                failed += outcome.item_count;
            }
            println!("{}", serde_json::to_string(outcome)?);
        }
    }
    hub.stop_queue();

    if failed > 0 {
        bail!("{} of {} items could not be written", failed, queued);
    }
    Ok(())
}
