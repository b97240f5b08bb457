//! Synchronization facade: the single ingestion pipeline and read API.
//!
//! One [`SyncEngine`] per connection composes the codec, timing monitor,
//! sanitization rules, channel store and entity trackers. Ingestion and
//! reads share one coarse lock: a single ingest step is atomic with
//! respect to readers, so partial updates are never visible. The engine
//! holds no sockets — transport plumbing lives in the connection layer and
//! feeds raw lines into [`SyncEngine::ingest`].

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::codec;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::monitor::TimingMonitor;
use crate::sanitize::RuleSet;
use crate::store::{ChannelState, ChannelStore};
use crate::tracker::{EntityDiff, EntityTracker, TrackedEntity, TrackerConfig};
use crate::types::{Envelope, Issue, IssueKind, Severity, PROTOCOL_VERSION};

/// A tracked entity as exposed by the read API.
pub type Entity = TrackedEntity<Value>;

struct Inner {
    monitor: TimingMonitor,
    store: ChannelStore,
    rules: RuleSet,
    trackers: HashMap<String, EntityTracker<Value>>,
    /// Most recent diff per kind, as returned by `entities()`
    diffs: HashMap<String, EntityDiff>,
    /// Ids evicted by a scope clear, owed to the next diff's expired set
    pending_expired: HashMap<String, Vec<i64>>,
    current_instant: i64,
    scope: Option<String>,
    last_issues: Vec<Issue>,
}

/// The synchronization engine for one connection.
///
/// `Send + Sync`; share it as `Arc<SyncEngine>` between the connection
/// read loop and consumers of the read API.
pub struct SyncEngine {
    config: SyncConfig,
    inner: Mutex<Inner>,
}

impl SyncEngine {
    pub fn new(config: SyncConfig) -> Self {
        Self::with_rules(config, RuleSet::standard())
    }

    /// Build an engine with a custom sanitization rule set.
    pub fn with_rules(config: SyncConfig, rules: RuleSet) -> Self {
        let trackers = config
            .entity_kinds
            .iter()
            .map(|(kind, cfg)| {
                let tracker = EntityTracker::new(TrackerConfig {
                    expiry_horizon: cfg.expiry_horizon,
                    history_depth: cfg.history_depth,
                });
                (kind.clone(), tracker)
            })
            .collect();

        let inner = Inner {
            monitor: TimingMonitor::new(config.timing.clone()),
            store: ChannelStore::new(config.history_depth),
            rules,
            trackers,
            diffs: HashMap::new(),
            pending_expired: HashMap::new(),
            current_instant: 0,
            scope: None,
            last_issues: Vec::new(),
        };
        Self { config, inner: Mutex::new(inner) }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Ingest one raw wire line.
    ///
    /// Decode, then timing check, then per channel: sanitize, store,
    /// entity-track. Returns the union of timing issues and triggered-rule
    /// records. Channel processing is independent: a defective channel is
    /// stored verbatim with tracking skipped, never affecting its siblings.
    ///
    /// Errors: [`SyncError::Decode`] for a malformed line (discard one
    /// message and continue), [`SyncError::VersionMismatch`] when the
    /// envelope speaks a different protocol (fatal to the connection).
    pub fn ingest(&self, line: &str) -> Result<Vec<Issue>> {
        let envelope = codec::decode_line(line)?;
        self.ingest_envelope(envelope)
    }

    /// Ingest an already-decoded envelope.
    pub fn ingest_envelope(&self, mut envelope: Envelope) -> Result<Vec<Issue>> {
        if envelope.version != PROTOCOL_VERSION {
            return Err(SyncError::VersionMismatch {
                expected: PROTOCOL_VERSION.to_string(),
                found: envelope.version,
            });
        }

        // The configured rate-class table is authoritative; the wire value
        // applies only for channels it does not cover.
        for (name, update) in envelope.channels.iter_mut() {
            update.rate_class = self.config.rate_class_for(name, update.rate_class);
        }

        let mut inner = self.inner.lock().expect("engine lock poisoned");
        trace!(
            sequence = envelope.sequence,
            sim_instant = envelope.sim_instant,
            kind = %envelope.kind,
            channels = envelope.channels.len(),
            "Ingesting envelope"
        );

        // Scope transitions invalidate all entity ids before this
        // envelope's channels are applied.
        if let Some(scope) = &envelope.scope {
            let changed = inner.scope.as_deref().is_some_and(|s| s != scope.as_str());
            if changed {
                debug!(from = ?inner.scope, to = %scope, "Scope transition");
                Self::clear_for_scope_change(&mut inner, self.config.clear_store_on_scope_change);
            }
            inner.scope = Some(scope.clone());
        }

        let mut issues = inner.monitor.check(&envelope);
        inner.current_instant = inner.current_instant.max(envelope.sim_instant);

        if envelope.carries_channels() {
            for (name, update) in &envelope.channels {
                let (data, triggered) = inner.rules.apply(name, update.data.clone());
                for rule_id in triggered {
                    issues.push(
                        Issue::new(IssueKind::RuleTriggered, Severity::Info)
                            .with("rule", rule_id)
                            .with("channel", name),
                    );
                }

                inner.store.update(name, data.clone(), update.produced_at, envelope.sim_instant);

                if let Some((kind, kind_cfg)) = self.config.kind_for_channel(name) {
                    let kind = kind.to_string();
                    let id_field = kind_cfg.id_field.clone();
                    match normalize_entity_list(&data, &id_field) {
                        Some(fresh) => {
                            let tracker = inner
                                .trackers
                                .get_mut(&kind)
                                .expect("tracker exists for configured kind");
                            let mut diff = tracker.apply(fresh, update.produced_at);
                            if let Some(mut pending) = inner.pending_expired.remove(&kind) {
                                pending.extend(diff.expired);
                                pending.sort_unstable();
                                pending.dedup();
                                diff.expired = pending;
                            }
                            inner.diffs.insert(kind, diff);
                        }
                        None => {
                            // Unknown payload shape: stored verbatim above,
                            // entity tracking skipped for this update.
                            debug!(channel = %name, kind = %kind, "Unrecognized entity list shape");
                        }
                    }
                }
            }
        }

        for issue in &issues {
            match issue.severity {
                Severity::Error | Severity::Warn => warn!(%issue, "Ingestion anomaly"),
                Severity::Info => debug!(%issue, "Ingestion observation"),
            }
        }

        inner.last_issues = issues.clone();
        Ok(issues)
    }

    /// Force a scope transition, clearing every entity tracker (and the
    /// channel store if configured). Cleared ids surface in the `expired`
    /// set of each kind's next diff.
    pub fn on_scope_transition(&self, new_scope: impl Into<String>) {
        let mut inner = self.inner.lock().expect("engine lock poisoned");
        Self::clear_for_scope_change(&mut inner, self.config.clear_store_on_scope_change);
        inner.scope = Some(new_scope.into());
    }

    fn clear_for_scope_change(inner: &mut Inner, clear_store: bool) {
        let kinds: Vec<String> = inner.trackers.keys().cloned().collect();
        for kind in kinds {
            let cleared = inner.trackers.get_mut(&kind).expect("kind present").clear();
            if !cleared.is_empty() {
                inner.diffs.insert(
                    kind.clone(),
                    EntityDiff { expired: cleared.clone(), ..EntityDiff::default() },
                );
                inner.pending_expired.entry(kind).or_default().extend(cleared);
            }
        }
        if clear_store {
            inner.store.clear();
        }
    }

    /// Forget everything: store, trackers, timing continuity, scope.
    ///
    /// The caller invokes this when it has decided a tick regression was a
    /// producer restart rather than a corrupt stream; the engine never
    /// makes that call on its own.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("engine lock poisoned");
        inner.monitor.reset();
        inner.store.clear();
        for tracker in inner.trackers.values_mut() {
            tracker.clear();
        }
        inner.diffs.clear();
        inner.pending_expired.clear();
        inner.current_instant = 0;
        inner.scope = None;
        inner.last_issues.clear();
        debug!("Engine state reset");
    }

    // ---- read API ----

    /// Skew-bounded multi-channel read. Fails closed with
    /// [`SyncError::NotSynchronized`] or [`SyncError::ChannelMissing`].
    pub fn snapshot(&self, channels: &[&str], max_skew: i64) -> Result<HashMap<String, Value>> {
        let inner = self.inner.lock().expect("engine lock poisoned");
        inner.store.synchronized_snapshot(channels, max_skew)
    }

    /// [`SyncEngine::snapshot`] with the configured default skew budget.
    pub fn snapshot_default(&self, channels: &[&str]) -> Result<HashMap<String, Value>> {
        self.snapshot(channels, self.config.default_max_skew)
    }

    /// The most recent add/update/expire diff for an entity kind.
    pub fn entities(&self, kind: &str) -> EntityDiff {
        let inner = self.inner.lock().expect("engine lock poisoned");
        inner.diffs.get(kind).cloned().unwrap_or_default()
    }

    /// Entities of a kind seen within the staleness budget.
    pub fn fresh_entities(&self, kind: &str, max_staleness: i64) -> Vec<Entity> {
        let inner = self.inner.lock().expect("engine lock poisoned");
        let Some(tracker) = inner.trackers.get(kind) else {
            return Vec::new();
        };
        tracker.get_fresh(max_staleness, inner.current_instant).into_iter().cloned().collect()
    }

    /// Whether a channel is present and fresh relative to the current
    /// instant.
    pub fn is_channel_fresh(&self, channel: &str, max_staleness: i64) -> bool {
        let inner = self.inner.lock().expect("engine lock poisoned");
        inner.store.is_fresh(channel, max_staleness, inner.current_instant)
    }

    /// Current state of one channel, if any.
    pub fn channel(&self, channel: &str) -> Option<ChannelState> {
        let inner = self.inner.lock().expect("engine lock poisoned");
        inner.store.get(channel).cloned()
    }

    /// The stored value closest to `target` in a channel's history.
    pub fn value_at(&self, channel: &str, target: i64) -> Option<Value> {
        let inner = self.inner.lock().expect("engine lock poisoned");
        inner.store.value_at(channel, target).cloned()
    }

    /// Latest simulation instant observed on this connection.
    pub fn current_instant(&self) -> i64 {
        self.inner.lock().expect("engine lock poisoned").current_instant
    }

    /// The producer scope last observed, if any.
    pub fn scope(&self) -> Option<String> {
        self.inner.lock().expect("engine lock poisoned").scope.clone()
    }

    /// Issues produced by the most recent ingest.
    pub fn last_issues(&self) -> Vec<Issue> {
        self.inner.lock().expect("engine lock poisoned").last_issues.clone()
    }
}

/// Normalize the two wire shapes of an entity list into one canonical
/// form: `[(id, payload)]`.
///
/// The producer emits either an array of objects carrying the id field, or
/// an object keyed by stringified id. Downstream code never branches on
/// shape again.
fn normalize_entity_list(data: &Value, id_field: &str) -> Option<Vec<(i64, Value)>> {
    match data {
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let id = item.get(id_field)?.as_i64()?;
                out.push((id, item.clone()));
            }
            Some(out)
        }
        Value::Object(map) => {
            let mut out = Vec::with_capacity(map.len());
            for (key, item) in map {
                // The id field inside the value wins over the key when both
                // are present and disagree; the key is a transport artifact.
                let id = match item.get(id_field).and_then(Value::as_i64) {
                    Some(id) => id,
                    None => key.parse::<i64>().ok()?,
                };
                out.push((id, item.clone()));
            }
            Some(out)
        }
        _ => None,
    }
}
