//! Engine configuration.
//!
//! Everything behavioral is configurable without recompilation: timing
//! thresholds, history depths, the per-channel rate-class table, and the
//! mapping from channels to tracked entity kinds. Configuration loads from
//! YAML; every field has a serde default so partial files work.

use std::collections::HashMap;

use anyhow::Context;
use serde::Deserialize;

use crate::error::{Result, SyncError};
use crate::types::RateClass;

/// Thresholds for the timing monitor.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Tick delta beyond which a FRAME_JUMP is reported
    pub jump_threshold: i64,
    /// Tick delta at which a jump is treated as a pause/resume (ERROR)
    pub pause_threshold: i64,
    /// A channel is stale past `stale_factor * period(rate_class)` ticks
    pub stale_factor: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self { jump_threshold: 5, pause_threshold: 30, stale_factor: 2 }
    }
}

/// Per-entity-kind tracking configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityKindConfig {
    /// Channel whose payload carries this kind's entity list
    pub channel: String,
    /// Payload field holding the entity id
    #[serde(default = "default_id_field")]
    pub id_field: String,
    /// Ticks an entity may go unseen before eviction; -1 disables expiry
    #[serde(default = "default_expiry_horizon")]
    pub expiry_horizon: i64,
    /// Per-entity history ring depth
    #[serde(default = "default_entity_history")]
    pub history_depth: usize,
}

fn default_id_field() -> String {
    "id".to_string()
}

fn default_expiry_horizon() -> i64 {
    60
}

fn default_entity_history() -> usize {
    10
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub timing: TimingConfig,

    /// Channel history ring depth in the state store
    pub history_depth: usize,

    /// Default skew budget for `snapshot` convenience calls
    pub default_max_skew: i64,

    /// Authoritative rate-class overrides; the wire value applies only
    /// for channels absent from this table
    pub rate_classes: HashMap<String, RateClass>,

    /// Tracked entity kinds, keyed by kind name ("enemies", "pickups", ...)
    pub entity_kinds: HashMap<String, EntityKindConfig>,

    /// Also clear channel state on a scope transition
    pub clear_store_on_scope_change: bool,

    /// Socket read timeout; a dead connection is noticed within one interval
    pub read_timeout_ms: u64,

    /// Maximum wire line length in bytes
    pub max_line_len: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timing: TimingConfig::default(),
            history_depth: 300,
            default_max_skew: 1,
            rate_classes: HashMap::new(),
            entity_kinds: HashMap::new(),
            clear_store_on_scope_change: false,
            read_timeout_ms: 2000,
            max_line_len: crate::codec::DEFAULT_MAX_LINE_LEN,
        }
    }
}

impl SyncConfig {
    /// Parse configuration from a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: SyncConfig = serde_yaml_ng::from_str(yaml)
            .context("parsing sync configuration")
            .map_err(|e| SyncError::config(format!("{e:#}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.history_depth == 0 {
            return Err(SyncError::config("history_depth must be at least 1"));
        }
        for (kind, cfg) in &self.entity_kinds {
            if cfg.channel.is_empty() {
                return Err(SyncError::config(format!("entity kind '{kind}' has empty channel")));
            }
            if cfg.history_depth == 0 {
                return Err(SyncError::config(format!(
                    "entity kind '{kind}' history_depth must be at least 1"
                )));
            }
            if cfg.expiry_horizon < -1 {
                return Err(SyncError::config(format!(
                    "entity kind '{kind}' expiry_horizon must be >= -1"
                )));
            }
        }
        Ok(())
    }

    /// The entity kind (if any) fed by the given channel.
    pub fn kind_for_channel(&self, channel: &str) -> Option<(&str, &EntityKindConfig)> {
        self.entity_kinds
            .iter()
            .find(|(_, cfg)| cfg.channel == channel)
            .map(|(kind, cfg)| (kind.as_str(), cfg))
    }

    /// Effective rate class for a channel: the config table wins over the
    /// wire value when both exist.
    pub fn rate_class_for(&self, channel: &str, wire: RateClass) -> RateClass {
        self.rate_classes.get(channel).copied().unwrap_or(wire)
    }
}
