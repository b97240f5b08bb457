//! Core types for the telemetry synchronization protocol.
//!
//! This module provides the data structures shared across the pipeline:
//! - [`Envelope`] is one self-delimited unit on the wire
//! - [`ChannelUpdate`] is one channel's payload with its production instant
//! - [`RateClass`] describes the cadence a channel is produced at
//! - [`Issue`] is an observational anomaly emitted during ingestion
//!
//! Payloads are carried as [`serde_json::Value`]; channel-specific schemas
//! are the concern of the sanitization rules and the consumer, not of this
//! layer.

mod envelope;
mod issue;

pub use envelope::{
    ChannelUpdate, Command, DEFAULT_PERIOD, Envelope, EnvelopeKind, PROTOCOL_VERSION, RateClass,
};
pub use issue::{Issue, IssueKind, Severity};
