//! Scripted source: replays a prepared envelope stream.
//!
//! Behaves like a live socket from the driver's point of view, which makes
//! it the backbone of integration tests and offline replay tooling.
//! Outbound lines are collected instead of sent anywhere.

use std::collections::VecDeque;
use std::time::Duration;

use crate::codec;
use crate::error::Result;
use crate::source::Source;
use crate::types::Envelope;

/// In-memory source that yields a fixed sequence of lines.
pub struct ScriptSource {
    lines: VecDeque<String>,
    /// Optional pacing delay between lines
    pace: Option<Duration>,
    sent: Vec<String>,
}

impl ScriptSource {
    /// Replay raw wire lines as-is (including intentionally malformed ones).
    pub fn from_lines(lines: impl IntoIterator<Item = String>) -> Self {
        Self { lines: lines.into_iter().collect(), pace: None, sent: Vec::new() }
    }

    /// Replay a sequence of envelopes.
    pub fn from_envelopes(envelopes: impl IntoIterator<Item = Envelope>) -> Result<Self> {
        let lines = envelopes
            .into_iter()
            .map(|e| codec::encode_line(&e))
            .collect::<Result<VecDeque<String>>>()?;
        Ok(Self { lines, pace: None, sent: Vec::new() })
    }

    /// Delay each line by `pace`, simulating a producer tick interval.
    pub fn paced(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }

    /// Lines written back through this source so far.
    pub fn sent_lines(&self) -> &[String] {
        &self.sent
    }

    pub fn remaining(&self) -> usize {
        self.lines.len()
    }
}

#[async_trait::async_trait]
impl Source for ScriptSource {
    async fn next_line(&mut self) -> Result<Option<String>> {
        if let Some(pace) = self.pace {
            tokio::time::sleep(pace).await;
        }
        Ok(self.lines.pop_front())
    }

    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.sent.push(line.to_string());
        Ok(())
    }

    fn description(&self) -> String {
        format!("script ({} lines remaining)", self.lines.len())
    }
}
