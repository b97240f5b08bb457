//! Connection facade: engine + driver + command channel in one handle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::driver::{Driver, DriverChannels};
use crate::engine::{Entity, SyncEngine};
use crate::error::Result;
use crate::source::Source;
use crate::sources::{ScriptSource, SocketSource};
use crate::tracker::EntityDiff;
use crate::types::{Command, Issue};

/// A synchronized telemetry connection.
///
/// Owns the engine and the driver task. The read API delegates to the
/// engine; state survives a dropped connection until [`SyncConnection::reset`]
/// is called, so consumers treat staleness as the signal rather than
/// connection liveness.
pub struct SyncConnection {
    engine: Arc<SyncEngine>,
    issues: Option<mpsc::UnboundedReceiver<Issue>>,
    disconnected: watch::Receiver<bool>,
    outbound: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl SyncConnection {
    /// Connect to a live telemetry producer over TCP.
    pub async fn connect<A>(addr: A, config: SyncConfig) -> Result<Self>
    where
        A: tokio::net::ToSocketAddrs + std::fmt::Display,
    {
        let read_timeout = Duration::from_millis(config.read_timeout_ms);
        let source = SocketSource::connect(addr, read_timeout, config.max_line_len).await?;
        info!(source = %source.description(), "Synchronization connection established");
        Ok(Self::from_source(source, config))
    }

    /// Drive the engine from a scripted envelope stream (replay, tests).
    pub fn scripted(source: ScriptSource, config: SyncConfig) -> Self {
        Self::from_source(source, config)
    }

    /// Build a connection from any source implementation.
    pub fn from_source<S: Source>(source: S, config: SyncConfig) -> Self {
        let engine = Arc::new(SyncEngine::new(config));
        let DriverChannels { issues, disconnected, outbound, cancel } =
            Driver::spawn(source, Arc::clone(&engine));
        Self { engine, issues: Some(issues), disconnected, outbound, cancel }
    }

    /// Shared handle to the underlying engine.
    pub fn engine(&self) -> Arc<SyncEngine> {
        Arc::clone(&self.engine)
    }

    /// Take the issue stream. Yields each ingestion issue once; returns
    /// `None` after the first call.
    pub fn take_issues(&mut self) -> Option<mpsc::UnboundedReceiver<Issue>> {
        self.issues.take()
    }

    /// Whether the read loop currently sees a silent/dead connection.
    pub fn is_disconnected(&self) -> bool {
        *self.disconnected.borrow()
    }

    /// Send a command to the producer. Fire-and-forget: the producer's
    /// acknowledgement arrives later as an opaque COMMAND envelope.
    pub fn send_command(&self, name: impl Into<String>, params: Value) -> Result<()> {
        let command = Command { command: name.into(), params };
        let line = serde_json::to_string(&command)?;
        debug!(line = %line, "Queueing command");
        self.outbound
            .send(line)
            .map_err(|_| crate::SyncError::ConnectionClosed)
    }

    // ---- read API, delegated to the engine ----

    pub fn snapshot(&self, channels: &[&str], max_skew: i64) -> Result<HashMap<String, Value>> {
        self.engine.snapshot(channels, max_skew)
    }

    pub fn entities(&self, kind: &str) -> EntityDiff {
        self.engine.entities(kind)
    }

    pub fn fresh_entities(&self, kind: &str, max_staleness: i64) -> Vec<Entity> {
        self.engine.fresh_entities(kind, max_staleness)
    }

    pub fn is_channel_fresh(&self, channel: &str, max_staleness: i64) -> bool {
        self.engine.is_channel_fresh(channel, max_staleness)
    }

    pub fn current_instant(&self) -> i64 {
        self.engine.current_instant()
    }

    /// Clear all synchronized state and timing continuity (producer
    /// restart).
    pub fn reset(&self) {
        self.engine.reset();
    }
}

impl Drop for SyncConnection {
    fn drop(&mut self) {
        debug!("Dropping synchronization connection");
        self.cancel.cancel();
    }
}
