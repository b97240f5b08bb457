//! Timing monitor: sequence and simulation-tick anomaly detection.
//!
//! One monitor instance per connection. The monitor is purely
//! observational: it classifies anomalies in the envelope stream and emits
//! [`Issue`]s, but never blocks ingestion.

use crate::config::TimingConfig;
use crate::types::{Envelope, Issue, IssueKind, RateClass, Severity};

/// Tracks sequence and tick continuity across one connection's envelopes.
#[derive(Debug)]
pub struct TimingMonitor {
    config: TimingConfig,
    last_sequence: Option<u64>,
    last_sim_instant: Option<i64>,
}

impl TimingMonitor {
    pub fn new(config: TimingConfig) -> Self {
        Self { config, last_sequence: None, last_sim_instant: None }
    }

    /// Forget all continuity state (producer restart / explicit reset).
    pub fn reset(&mut self) {
        self.last_sequence = None;
        self.last_sim_instant = None;
    }

    /// Validate one envelope against the stream seen so far.
    ///
    /// Always updates `last_sequence` / `last_sim_instant`, even when
    /// anomalies are found: the stream's own counters are the only ground
    /// truth available, so tracking follows the producer rather than
    /// second-guessing it.
    pub fn check(&mut self, envelope: &Envelope) -> Vec<Issue> {
        let mut issues = Vec::new();

        if let Some(last_seq) = self.last_sequence {
            if envelope.sequence <= last_seq {
                issues.push(
                    Issue::new(IssueKind::SequenceReorder, Severity::Error)
                        .with("sequence", envelope.sequence)
                        .with("last_sequence", last_seq),
                );
            } else if envelope.sequence > last_seq + 1 {
                issues.push(
                    Issue::new(IssueKind::SequenceGap, Severity::Warn)
                        .with("sequence", envelope.sequence)
                        .with("missing", envelope.sequence - last_seq - 1),
                );
            }
        }

        if let Some(last_instant) = self.last_sim_instant {
            let delta = envelope.sim_instant - last_instant;
            if delta <= 0 {
                let mut issue = Issue::new(IssueKind::FrameRegression, Severity::Error)
                    .with("sim_instant", envelope.sim_instant)
                    .with("last_sim_instant", last_instant);
                if envelope.prev_sim_instant != last_instant {
                    issue = issue.with("prev_sim_instant", envelope.prev_sim_instant);
                }
                issues.push(issue);
            } else if delta > self.config.jump_threshold {
                // Ordinary scheduling jitter vs. a simulation pause/resume.
                let severity = if delta < self.config.pause_threshold {
                    Severity::Warn
                } else {
                    Severity::Error
                };
                let mut issue = Issue::new(IssueKind::FrameJump, severity)
                    .with("delta", delta)
                    .with("sim_instant", envelope.sim_instant);
                if envelope.prev_sim_instant != last_instant {
                    issue = issue.with("prev_sim_instant", envelope.prev_sim_instant);
                }
                issues.push(issue);
            }
        }

        for (name, update) in &envelope.channels {
            let staleness = envelope.sim_instant - update.produced_at;
            let budget = i64::from(self.config.stale_factor) * i64::from(update.rate_class.period());
            if staleness > budget {
                issues.push(
                    Issue::new(IssueKind::StaleChannel, Severity::Info)
                        .with("channel", name)
                        .with("staleness", staleness),
                );
            }
        }

        let every_tick: Vec<i64> = envelope
            .channels
            .values()
            .filter(|u| u.rate_class == RateClass::EveryTick)
            .map(|u| u.produced_at)
            .collect();
        if let (Some(min), Some(max)) =
            (every_tick.iter().min().copied(), every_tick.iter().max().copied())
        {
            if max - min > 1 {
                issues.push(
                    Issue::new(IssueKind::ChannelDesync, Severity::Warn)
                        .with("spread", max - min)
                        .with("sim_instant", envelope.sim_instant),
                );
            }
        }

        self.last_sequence = Some(envelope.sequence);
        self.last_sim_instant = Some(envelope.sim_instant);
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChannelUpdate, EnvelopeKind};
    use serde_json::json;

    fn env(sequence: u64, sim_instant: i64) -> Envelope {
        Envelope::new(EnvelopeKind::Data, sequence, sim_instant, sim_instant - 1)
    }

    fn with_channel(mut e: Envelope, name: &str, produced_at: i64, rate: RateClass) -> Envelope {
        e.channels.insert(
            name.to_string(),
            ChannelUpdate { data: json!({}), produced_at, rate_class: rate },
        );
        e
    }

    fn kinds(issues: &[Issue]) -> Vec<IssueKind> {
        issues.iter().map(|i| i.kind).collect()
    }

    #[test]
    fn clean_stream_emits_nothing() {
        let mut monitor = TimingMonitor::new(TimingConfig::default());
        for i in 1..=5u64 {
            let issues = monitor.check(&env(i, 10 + i as i64));
            assert!(issues.is_empty(), "unexpected issues at {i}: {issues:?}");
        }
    }

    #[test]
    fn reorder_sequence_1_2_4_3() {
        let mut monitor = TimingMonitor::new(TimingConfig::default());
        let mut all = Vec::new();
        for (seq, tick) in [(1u64, 11i64), (2, 12), (4, 14), (3, 15)] {
            all.extend(monitor.check(&env(seq, tick)));
        }
        let gaps = all.iter().filter(|i| i.kind == IssueKind::SequenceGap).count();
        let reorders = all.iter().filter(|i| i.kind == IssueKind::SequenceReorder).count();
        assert_eq!(gaps, 1);
        assert_eq!(reorders, 1);
    }

    #[test]
    fn gap_reports_missing_count() {
        let mut monitor = TimingMonitor::new(TimingConfig::default());
        monitor.check(&env(10, 100));
        let issues = monitor.check(&env(14, 101));
        assert_eq!(kinds(&issues), vec![IssueKind::SequenceGap]);
        assert_eq!(issues[0].details["missing"], "3");
        assert_eq!(issues[0].severity, Severity::Warn);
    }

    #[test]
    fn duplicate_sequence_is_a_reorder() {
        let mut monitor = TimingMonitor::new(TimingConfig::default());
        monitor.check(&env(5, 50));
        let issues = monitor.check(&env(5, 51));
        assert_eq!(kinds(&issues), vec![IssueKind::SequenceReorder]);
        assert_eq!(issues[0].severity, Severity::Error);
    }

    #[test]
    fn tick_regression_is_an_error() {
        let mut monitor = TimingMonitor::new(TimingConfig::default());
        monitor.check(&env(1, 100));
        let issues = monitor.check(&env(2, 100));
        assert_eq!(kinds(&issues), vec![IssueKind::FrameRegression]);
        assert_eq!(issues[0].severity, Severity::Error);
    }

    #[test]
    fn jump_severity_depends_on_magnitude() {
        let mut monitor = TimingMonitor::new(TimingConfig::default());
        monitor.check(&env(1, 100));

        // delta 10: above jump threshold (5), below pause threshold (30)
        let issues = monitor.check(&env(2, 110));
        assert_eq!(kinds(&issues), vec![IssueKind::FrameJump]);
        assert_eq!(issues[0].severity, Severity::Warn);

        // delta 40: simulation pause/resume
        let issues = monitor.check(&env(3, 150));
        assert_eq!(kinds(&issues), vec![IssueKind::FrameJump]);
        assert_eq!(issues[0].severity, Severity::Error);
    }

    #[test]
    fn stale_channel_uses_rate_class_budget() {
        let mut monitor = TimingMonitor::new(TimingConfig::default());
        // PERIODIC:30 gets a 60-tick budget; 90 ticks behind is stale.
        let e = with_channel(env(1, 100), "STATS", 10, RateClass::Periodic(30));
        let issues = monitor.check(&e);
        assert_eq!(kinds(&issues), vec![IssueKind::StaleChannel]);
        assert_eq!(issues[0].severity, Severity::Info);
        assert_eq!(issues[0].details["staleness"], "90");

        // 50 ticks behind is within budget.
        let e = with_channel(env(2, 101), "STATS", 51, RateClass::Periodic(30));
        assert!(monitor.check(&e).is_empty());
    }

    #[test]
    fn every_tick_channels_must_agree_within_one_tick() {
        let mut monitor = TimingMonitor::new(TimingConfig::default());
        let e = with_channel(
            with_channel(env(1, 100), "POSITIONS", 100, RateClass::EveryTick),
            "ENEMIES",
            98,
            RateClass::EveryTick,
        );
        let issues = monitor.check(&e);
        assert!(issues.iter().any(|i| i.kind == IssueKind::ChannelDesync));

        // Spread of exactly 1 is tolerated.
        let e = with_channel(
            with_channel(env(2, 101), "POSITIONS", 101, RateClass::EveryTick),
            "ENEMIES",
            100,
            RateClass::EveryTick,
        );
        assert!(monitor.check(&e).iter().all(|i| i.kind != IssueKind::ChannelDesync));
    }

    #[test]
    fn reset_forgets_continuity() {
        let mut monitor = TimingMonitor::new(TimingConfig::default());
        monitor.check(&env(100, 5000));
        monitor.reset();
        // Producer restarted from zero: no regression or reorder reported.
        assert!(monitor.check(&env(1, 1)).is_empty());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn strictly_increasing_sequences_never_reorder(
                start in 0u64..1000,
                steps in prop::collection::vec(1u64..5, 1..40)
            ) {
                let mut monitor = TimingMonitor::new(TimingConfig::default());
                monitor.check(&env(start, 0));
                let mut seq = start;
                let mut tick = 0i64;
                for step in steps {
                    seq += step;
                    tick += 1;
                    let issues = monitor.check(&env(seq, tick));
                    prop_assert!(issues.iter().all(|i| i.kind != IssueKind::SequenceReorder));
                    // Gaps appear exactly when a sequence number was skipped.
                    let has_gap = issues.iter().any(|i| i.kind == IssueKind::SequenceGap);
                    prop_assert_eq!(has_gap, step > 1);
                }
            }

            #[test]
            fn issues_never_mutate_tracking_divergently(
                sequences in prop::collection::vec(0u64..50, 2..30)
            ) {
                // Whatever anomalies appear, the monitor always adopts the
                // last envelope's counters as the new baseline.
                let mut monitor = TimingMonitor::new(TimingConfig::default());
                for (i, seq) in sequences.iter().enumerate() {
                    monitor.check(&env(*seq, i as i64 + 1));
                    prop_assert_eq!(monitor.last_sequence, Some(*seq));
                    prop_assert_eq!(monitor.last_sim_instant, Some(i as i64 + 1));
                }
            }
        }
    }
}
