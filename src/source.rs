//! Source trait for wire message transports

use crate::Result;

/// Trait for envelope line transports.
///
/// Sources abstract over where wire lines come from (a live socket, a
/// scripted replay) and handle their own timing internally. The engine
/// never touches a socket; the driver pulls lines from a source and feeds
/// them into ingestion.
#[async_trait::async_trait]
pub trait Source: Send + 'static {
    /// Get the next raw wire line.
    ///
    /// Returns:
    /// - `Ok(Some(line))` - a complete message, newline stripped
    /// - `Ok(None)` - stream ended (peer closed, or script exhausted)
    /// - `Err(SyncError::Timeout)` - no data within the read budget; the
    ///   connection may be dead, but the caller decides
    /// - `Err(e)` - transport failure
    async fn next_line(&mut self) -> Result<Option<String>>;

    /// Write one raw line back to the producer (command channel).
    async fn send_line(&mut self, line: &str) -> Result<()>;

    /// Human-readable description for logs.
    fn description(&self) -> String;
}
