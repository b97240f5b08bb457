//! Observational issues emitted by the ingestion pipeline

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single anomaly observed during ingestion.
///
/// Issues are observational: they never block ingestion. The driver logs
/// them and forwards them to whoever subscribed to the issue channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Issue {
    pub kind: IssueKind,
    pub severity: Severity,
    /// Structured context (channel names, counts, tick values)
    pub details: BTreeMap<String, String>,
}

impl Issue {
    pub fn new(kind: IssueKind, severity: Severity) -> Self {
        Self { kind, severity, details: BTreeMap::new() }
    }

    /// Attach a detail entry, builder style.
    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {:?}", self.severity, self.kind)?;
        for (k, v) in &self.details {
            write!(f, " {k}={v}")?;
        }
        Ok(())
    }
}

/// What kind of anomaly was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueKind {
    /// Duplicate or regressed sequence number
    SequenceReorder,
    /// One or more sequence numbers were skipped
    SequenceGap,
    /// Simulation tick advanced further than scheduling jitter explains
    FrameJump,
    /// Simulation tick went backwards or stood still
    FrameRegression,
    /// A channel's data is older than twice its expected cadence
    StaleChannel,
    /// Two every-tick channels disagree on which tick they were sampled at
    ChannelDesync,
    /// A sanitization rule fired on a channel payload
    RuleTriggered,
}

/// How serious an issue is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warn,
    Error,
}
