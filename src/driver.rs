//! Driver spawns and manages the connection read loop.
//!
//! The read loop owns the source, feeds each line into the engine, and
//! forwards issues to subscribers. A dead connection never clears engine
//! state: staleness is the consumer's signal, not connection liveness.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::SyncEngine;
use crate::error::SyncError;
use crate::source::Source;
use crate::types::Issue;

/// Handles returned by [`Driver::spawn`].
pub struct DriverChannels {
    /// Issues observed during ingestion, in arrival order
    pub issues: mpsc::UnboundedReceiver<Issue>,
    /// True while no data has arrived within the read timeout
    pub disconnected: watch::Receiver<bool>,
    /// Outbound raw lines (command channel back to the producer)
    pub outbound: mpsc::UnboundedSender<String>,
    /// Cancellation token for graceful shutdown
    pub cancel: CancellationToken,
}

/// Driver spawns and manages the ingestion task for one connection.
pub struct Driver;

impl Driver {
    /// Spawn the read loop for the given source and engine.
    pub fn spawn<S>(source: S, engine: Arc<SyncEngine>) -> DriverChannels
    where
        S: Source,
    {
        let (issue_tx, issue_rx) = mpsc::unbounded_channel();
        let (disconnect_tx, disconnect_rx) = watch::channel(false);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let cancel_task = cancel.clone();

        tokio::spawn(async move {
            Self::read_loop(source, engine, issue_tx, disconnect_tx, outbound_rx, cancel_task)
                .await;
        });

        DriverChannels {
            issues: issue_rx,
            disconnected: disconnect_rx,
            outbound: outbound_tx,
            cancel,
        }
    }

    async fn read_loop<S>(
        mut source: S,
        engine: Arc<SyncEngine>,
        issue_tx: mpsc::UnboundedSender<Issue>,
        disconnect_tx: watch::Sender<bool>,
        mut outbound_rx: mpsc::UnboundedReceiver<String>,
        cancel: CancellationToken,
    ) where
        S: Source,
    {
        info!(source = %source.description(), "Read loop started");
        let mut line_count = 0u64;
        let mut error_count = 0u32;
        const MAX_ERRORS: u32 = 10;

        enum Step {
            Inbound(crate::Result<Option<String>>),
            Outbound(Option<String>),
        }

        let mut outbound_open = true;

        loop {
            let step = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Read loop cancelled");
                    break;
                }
                cmd = outbound_rx.recv(), if outbound_open => Step::Outbound(cmd),
                result = source.next_line() => Step::Inbound(result),
            };

            let result = match step {
                Step::Outbound(Some(line)) => {
                    if let Err(e) = source.send_line(&line).await {
                        warn!("Failed to write command line: {e}");
                    }
                    continue;
                }
                Step::Outbound(None) => {
                    // All outbound senders dropped; keep reading.
                    outbound_open = false;
                    continue;
                }
                Step::Inbound(result) => result,
            };

            match result {
                Ok(Some(line)) => {
                    error_count = 0;
                    let _ = disconnect_tx.send(false);
                    line_count += 1;

                    match engine.ingest(&line) {
                        Ok(issues) => {
                            for issue in issues {
                                // Receiver gone is fine; issues are also logged.
                                let _ = issue_tx.send(issue);
                            }
                        }
                        Err(e) if e.is_fatal() => {
                            error!("Fatal protocol error, closing connection: {e}");
                            break;
                        }
                        Err(e) => {
                            // Malformed message: discard exactly this line.
                            warn!("Skipping undecodable line: {e}");
                        }
                    }
                }
                Ok(None) => {
                    info!("Source ended after {} lines", line_count);
                    let _ = disconnect_tx.send(true);
                    break;
                }
                Err(SyncError::Timeout { duration }) => {
                    // No data within the budget: likely a dead connection.
                    // State is preserved; consumers see it through staleness.
                    debug!("No data within {duration:?}");
                    let _ = disconnect_tx.send(true);
                }
                Err(e) => {
                    error_count += 1;
                    error!("Source error ({}/{}): {}", error_count, MAX_ERRORS, e);
                    if error_count >= MAX_ERRORS {
                        error!("Too many source errors, shutting down");
                        let _ = disconnect_tx.send(true);
                        break;
                    }
                }
            }
        }

        info!("Read loop ended (processed {} lines)", line_count);
    }
}
