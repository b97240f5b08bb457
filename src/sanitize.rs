//! Sanitization rule engine for known producer-side data defects.
//!
//! A rule pairs a `detect` predicate with an optional `correct` function
//! and an origin classification. Rules are data: newly discovered producer
//! defects get a new registration, not a new branch in the ingestion
//! pipeline. Rules compose left-to-right in registration order, each
//! correction feeding the next rule's detection. Rules never fail; a rule
//! without a correction is purely observational.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// Which side of the wire introduced the defect a rule targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOrigin {
    ProducerDefect,
    ConsumerDefect,
}

/// Which channels a rule applies to.
#[derive(Debug, Clone)]
pub enum ChannelMatch {
    Any,
    Exact(String),
}

impl ChannelMatch {
    fn matches(&self, channel: &str) -> bool {
        match self {
            ChannelMatch::Any => true,
            ChannelMatch::Exact(name) => name == channel,
        }
    }
}

type DetectFn = dyn Fn(&Value) -> bool + Send + Sync;
type CorrectFn = dyn Fn(&Value) -> Value + Send + Sync;

/// One declarative sanitization rule.
#[derive(Clone)]
pub struct Rule {
    id: String,
    channel: ChannelMatch,
    origin: RuleOrigin,
    detect: Arc<DetectFn>,
    correct: Option<Arc<CorrectFn>>,
}

impl Rule {
    /// A rule that detects and corrects a defect.
    pub fn corrective(
        id: impl Into<String>,
        channel: ChannelMatch,
        origin: RuleOrigin,
        detect: impl Fn(&Value) -> bool + Send + Sync + 'static,
        correct: impl Fn(&Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            channel,
            origin,
            detect: Arc::new(detect),
            correct: Some(Arc::new(correct)),
        }
    }

    /// A rule that only records the defect, leaving the payload untouched.
    ///
    /// Used for values that are defects but must not be silently altered,
    /// e.g. a sentinel zero vector meaning "no input".
    pub fn observational(
        id: impl Into<String>,
        channel: ChannelMatch,
        origin: RuleOrigin,
        detect: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self { id: id.into(), channel, origin, detect: Arc::new(detect), correct: None }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn origin(&self) -> RuleOrigin {
        self.origin
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("origin", &self.origin)
            .field("corrective", &self.correct.is_some())
            .finish()
    }
}

/// Ordered registry of sanitization rules.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// An empty rule set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The stock rule set covering the producer defects known today.
    pub fn standard() -> Self {
        let mut set = Self::empty();
        set.register(Rule::corrective(
            "stringified-number",
            ChannelMatch::Any,
            RuleOrigin::ProducerDefect,
            |v| has_stringified_number(v),
            |v| parse_stringified_numbers(v),
        ));
        set.register(Rule::observational(
            "sentinel-zero-vector",
            ChannelMatch::Any,
            RuleOrigin::ProducerDefect,
            |v| is_zero_vector(v),
        ));
        set.register(Rule::corrective(
            "negative-count",
            ChannelMatch::Any,
            RuleOrigin::ProducerDefect,
            |v| has_negative_count(v),
            |v| clamp_negative_counts(v),
        ));
        set
    }

    /// Append a rule. Order of registration is order of application.
    pub fn register(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Run every matching rule over the payload.
    ///
    /// Returns the possibly-corrected payload and the ids of all rules
    /// whose `detect` fired.
    pub fn apply(&self, channel: &str, payload: Value) -> (Value, Vec<String>) {
        let mut current = payload;
        let mut triggered = Vec::new();

        for rule in &self.rules {
            if !rule.channel.matches(channel) {
                continue;
            }
            if (rule.detect)(&current) {
                triggered.push(rule.id.clone());
                if let Some(correct) = &rule.correct {
                    current = correct(&current);
                }
            }
        }

        (current, triggered)
    }
}

// The producer intermittently emits numeric fields as strings ("12.5"
// instead of 12.5), depending on which code path serialized the channel.
fn as_stringified_number(value: &Value) -> Option<f64> {
    let s = value.as_str()?;
    let parsed: f64 = s.trim().parse().ok()?;
    parsed.is_finite().then_some(parsed)
}

fn has_stringified_number(value: &Value) -> bool {
    match value {
        Value::String(_) => as_stringified_number(value).is_some(),
        Value::Array(items) => items.iter().any(has_stringified_number),
        Value::Object(map) => map.values().any(has_stringified_number),
        _ => false,
    }
}

fn parse_stringified_numbers(value: &Value) -> Value {
    match value {
        Value::String(_) => match as_stringified_number(value) {
            Some(f) => serde_json::Number::from_f64(f).map(Value::Number).unwrap_or_else(|| value.clone()),
            None => value.clone(),
        },
        Value::Array(items) => Value::Array(items.iter().map(parse_stringified_numbers).collect()),
        Value::Object(map) => Value::Object(
            map.iter().map(|(k, v)| (k.clone(), parse_stringified_numbers(v))).collect(),
        ),
        other => other.clone(),
    }
}

fn is_zero_component(value: Option<&Value>) -> bool {
    value.and_then(Value::as_f64).is_some_and(|f| f == 0.0)
}

fn is_zero_vector(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            let vector = map.len() == 3
                && is_zero_component(map.get("x"))
                && is_zero_component(map.get("y"))
                && is_zero_component(map.get("z"));
            vector || map.values().any(is_zero_vector)
        }
        Value::Array(items) => items.iter().any(is_zero_vector),
        _ => false,
    }
}

fn has_negative_count(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.iter().any(|(k, v)| {
            (k == "count" && v.as_i64().is_some_and(|n| n < 0)) || has_negative_count(v)
        }),
        Value::Array(items) => items.iter().any(has_negative_count),
        _ => false,
    }
}

fn clamp_negative_counts(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    if k == "count" && v.as_i64().is_some_and(|n| n < 0) {
                        (k.clone(), Value::from(0))
                    } else {
                        (k.clone(), clamp_negative_counts(v))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(clamp_negative_counts).collect()),
        other => other.clone(),
    }
}
