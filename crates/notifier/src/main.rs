//! Tripwire notifier binary entrypoint.
//!
//! Reads newline-delimited JSON event records from stdin and delivers them to
//! the configured channels until input ends or a shutdown signal arrives.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use tripwire_common::config::{AppConfig, LogFormat};
use tripwire_common::types::EventRecord;
use tripwire_notifier::dispatcher::Dispatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = AppConfig::from_env()?;

    // Initialize tracing
    init_tracing(config.log_format);

    tracing::info!("Tripwire notifier starting...");

    let root = CancellationToken::new();
    let handle = Dispatcher::from_app_config(&config)?.spawn(root.clone());
    let mut stats = handle.stats();
    let producer = handle.sender();

    tokio::select! {
        accepted = read_records(producer) => {
            let accepted = accepted?;
            tracing::info!(accepted, "Input closed, waiting for pending deliveries");
            tokio::select! {
                _ = stats.wait_for(|s| s.received >= accepted && s.total_pending() == 0) => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Received shutdown signal, stopping gracefully...");
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    root.cancel();
    let totals = handle.wait().await?;

    tracing::info!(
        received = totals.received,
        success = totals.total_success(),
        failure = totals.total_failure(),
        "Tripwire notifier stopped."
    );
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tripwire_notifier=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Compact => builder.compact().init(),
    }
}

/// Queue every valid record from stdin. Returns how many were accepted.
async fn read_records(producer: mpsc::Sender<EventRecord>) -> anyhow::Result<u64> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut accepted = 0;

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<EventRecord>(&line) {
            Ok(record) => {
                let record_id = record.id();
                producer
                    .send(record)
                    .await
                    .map_err(|_| anyhow::anyhow!("dispatcher stopped accepting records"))?;
                accepted += 1;
                tracing::debug!(record_id = %record_id, "Event record queued");
            }
            Err(err) => tracing::warn!(error = %err, "Skipping invalid event record"),
        }
    }

    Ok(accepted)
}
