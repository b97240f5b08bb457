//! Wire envelope types for the telemetry protocol

use std::collections::BTreeMap;
use std::fmt;

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version this crate speaks. Envelopes carrying any other
/// version are rejected at the facade (no safe interpretation exists).
pub const PROTOCOL_VERSION: &str = "2.1";

/// Fallback period applied when a rate class string is unrecognized.
pub const DEFAULT_PERIOD: u32 = 30;

/// One unit on the wire.
///
/// This is the fundamental data unit that flows through the system.
/// Sequence numbers are assigned by the producer and strictly increase
/// per connection; `sim_instant` is the producer's own monotonic tick
/// counter at send time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Protocol version string (see [`PROTOCOL_VERSION`])
    pub version: String,

    /// Message kind
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,

    /// Producer-assigned, strictly increasing per connection
    pub sequence: u64,

    /// Producer tick counter at send time
    pub sim_instant: i64,

    /// `sim_instant` of the previous envelope sent (redundant check value)
    pub prev_sim_instant: i64,

    /// Producer scope identifier (e.g. current simulation area).
    /// Entity ids are only unique within one scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Channel payloads, present for DATA and FULL_STATE envelopes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub channels: BTreeMap<String, ChannelUpdate>,
}

impl Envelope {
    /// Create an empty envelope of the given kind.
    pub fn new(kind: EnvelopeKind, sequence: u64, sim_instant: i64, prev_sim_instant: i64) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            kind,
            sequence,
            sim_instant,
            prev_sim_instant,
            scope: None,
            channels: BTreeMap::new(),
        }
    }

    /// Whether this envelope carries channel payloads.
    pub fn carries_channels(&self) -> bool {
        matches!(self.kind, EnvelopeKind::Data | EnvelopeKind::FullState)
    }
}

/// Envelope message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeKind {
    #[serde(rename = "DATA")]
    Data,
    #[serde(rename = "FULL_STATE")]
    FullState,
    #[serde(rename = "EVENT")]
    Event,
    #[serde(rename = "COMMAND")]
    Command,
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EnvelopeKind::Data => "DATA",
            EnvelopeKind::FullState => "FULL_STATE",
            EnvelopeKind::Event => "EVENT",
            EnvelopeKind::Command => "COMMAND",
        };
        f.write_str(s)
    }
}

/// One channel's payload inside an envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelUpdate {
    /// Channel-specific payload, validated by the sanitization rules,
    /// not by this layer
    pub data: Value,

    /// Simulation tick at which this data was actually sampled.
    /// May be far behind the envelope's `sim_instant` for low-rate channels.
    pub produced_at: i64,

    /// Cadence at which the producer samples this channel
    pub rate_class: RateClass,
}

/// The cadence at which a channel is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateClass {
    /// Sampled every simulation tick
    EveryTick,
    /// Sampled every `n` ticks
    Periodic(u32),
    /// Sent only when the value changes
    OnChange,
}

impl RateClass {
    /// Expected ticks between samples for this class.
    ///
    /// ON_CHANGE channels have no fixed cadence; they are treated like the
    /// default periodic cadence for staleness classification.
    pub fn period(self) -> u32 {
        match self {
            RateClass::EveryTick => 1,
            RateClass::Periodic(n) => n.max(1),
            RateClass::OnChange => DEFAULT_PERIOD,
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "EVERY_TICK" => Some(RateClass::EveryTick),
            "ON_CHANGE" => Some(RateClass::OnChange),
            other => {
                let n = other.strip_prefix("PERIODIC:")?;
                n.parse::<u32>().ok().map(RateClass::Periodic)
            }
        }
    }
}

impl fmt::Display for RateClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateClass::EveryTick => f.write_str("EVERY_TICK"),
            RateClass::Periodic(n) => write!(f, "PERIODIC:{n}"),
            RateClass::OnChange => f.write_str("ON_CHANGE"),
        }
    }
}

impl Serialize for RateClass {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RateClass {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(RateClass::parse(&s).unwrap_or_else(|| {
            // Unknown rate class degrades to the default periodic cadence
            // rather than poisoning the whole envelope.
            tracing::warn!("Unknown rate class '{}', defaulting to PERIODIC:{}", s, DEFAULT_PERIOD);
            RateClass::Periodic(DEFAULT_PERIOD)
        }))
    }
}

/// Consumer-to-producer command payload.
///
/// The engine never interprets command semantics; this type only exists so
/// connections can write well-formed command messages back to the producer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub command: String,
    #[serde(default)]
    pub params: Value,
}
