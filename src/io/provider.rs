//! Inbound location-sample adapter
//!
//! The OS location provider is an external collaborator; this adapter is
//! the engine-side end of that boundary. It parses one JSON fix per line
//! from an async reader (stdin in the shipped binary) and feeds the
//! engine's bounded sample channel. Malformed lines are logged and
//! skipped — provider hiccups must not stall the pipeline.

use crate::domain::types::RawSample;
use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Parse fixes line by line and push them into the sample channel.
/// Returns when the reader or the channel closes.
pub async fn pump_samples<R>(reader: R, tx: mpsc::Sender<RawSample>) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let sample: RawSample = match serde_json::from_str(trimmed) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "provider_line_unparseable");
                continue;
            }
        };

        debug!(ts = %sample.ts_ms, "provider_sample_received");
        if tx.send(sample).await.is_err() {
            // Engine gone; nothing left to feed
            break;
        }
    }

    info!("provider_stream_ended");
    Ok(())
}

/// Stdin-backed provider for the shipped binary
pub async fn run_stdin_provider(
    tx: mpsc::Sender<RawSample>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());

    tokio::select! {
        result = pump_samples(stdin, tx) => result,
        _ = shutdown.changed() => {
            info!("provider_shutdown");
            Ok(())
        }
    }
}
