//! Subscription filters
//!
//! A filter is a `field operator value` triple evaluated against one event.
//! Evaluation is pure; a subscription admits an event when all of its filters
//! match, so filter order never matters.

use super::types::Event;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    StartsWith,
    EndsWith,
    Contains,
    /// Field equals one of the values in an array
    In,
    /// Field is present (value ignored)
    Exists,
    GreaterThan,
    LessThan,
    /// Segment glob: `*` matches one segment, `**` any number
    Matches,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFilter {
    /// `type`, `id`, `kind`, `metadata.<field>` or `data.<path>`
    pub field: String,
    pub operator: FilterOperator,
    pub value: Value,
}

impl EventFilter {
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    pub fn type_equals(event_type: &str) -> Self {
        Self::new("type", FilterOperator::Equals, Value::from(event_type))
    }

    pub fn type_starts_with(prefix: &str) -> Self {
        Self::new("type", FilterOperator::StartsWith, Value::from(prefix))
    }

    pub fn type_matches(pattern: &str) -> Self {
        Self::new("type", FilterOperator::Matches, Value::from(pattern))
    }

    pub fn kind_equals(kind: &str) -> Self {
        Self::new("kind", FilterOperator::Equals, Value::from(kind))
    }

    pub fn matches(&self, event: &Event) -> bool {
        let actual = resolve_field(event, &self.field);

        match (self.operator, actual) {
            (FilterOperator::Exists, actual) => actual.is_some(),
            (FilterOperator::NotEquals, None) => true,
            (_, Some(actual)) => self.compare(&actual),
            (_, None) => false,
        }
    }

    fn compare(&self, actual: &Value) -> bool {
        match self.operator {
            FilterOperator::Equals => actual == &self.value,
            FilterOperator::NotEquals => actual != &self.value,
            FilterOperator::Exists => true,
            FilterOperator::StartsWith => {
                string_pair(actual, &self.value).is_some_and(|(a, v)| a.starts_with(v))
            }
            FilterOperator::EndsWith => {
                string_pair(actual, &self.value).is_some_and(|(a, v)| a.ends_with(v))
            }
            FilterOperator::Contains => match actual {
                Value::Array(items) => items.contains(&self.value),
                _ => string_pair(actual, &self.value).is_some_and(|(a, v)| a.contains(v)),
            },
            FilterOperator::In => self
                .value
                .as_array()
                .is_some_and(|options| options.contains(actual)),
            FilterOperator::GreaterThan => {
                number_pair(actual, &self.value).is_some_and(|(a, v)| a > v)
            }
            FilterOperator::LessThan => {
                number_pair(actual, &self.value).is_some_and(|(a, v)| a < v)
            }
            FilterOperator::Matches => string_pair(actual, &self.value)
                .is_some_and(|(a, pattern)| segment_glob(pattern, a)),
        }
    }
}

fn string_pair<'a>(actual: &'a Value, expected: &'a Value) -> Option<(&'a str, &'a str)> {
    Some((actual.as_str()?, expected.as_str()?))
}

fn number_pair(actual: &Value, expected: &Value) -> Option<(f64, f64)> {
    Some((actual.as_f64()?, expected.as_f64()?))
}

fn resolve_field(event: &Event, field: &str) -> Option<Value> {
    match field {
        "type" => Some(Value::from(event.event_type())),
        "id" => Some(Value::from(event.id().to_string())),
        "kind" => Some(Value::from(event.kind().name())),
        "metadata.priority" => Some(Value::from(event.metadata().priority.as_str())),
        "metadata.delivery_guarantee" => {
            Some(Value::from(event.metadata().delivery_guarantee.as_str()))
        }
        "metadata.source" => event.metadata().source.clone().map(Value::from),
        "metadata.correlation_id" => event.metadata().correlation_id.clone().map(Value::from),
        _ => {
            let path = field.strip_prefix("data.")?;
            path.split('.')
                .try_fold(event.data(), |node, segment| match node {
                    Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                    _ => node.get(segment),
                })
                .cloned()
        }
    }
}

/// Match `/` or `.` delimited segments against a glob
pub fn segment_glob(pattern: &str, candidate: &str) -> bool {
    let pattern: Vec<&str> = pattern.split(['/', '.']).collect();
    let candidate: Vec<&str> = candidate.split(['/', '.']).collect();
    glob_segments(&pattern, &candidate)
}

fn glob_segments(pattern: &[&str], candidate: &[&str]) -> bool {
    match (pattern.first(), candidate.first()) {
        (None, None) => true,
        (Some(&"**"), _) => {
            glob_segments(&pattern[1..], candidate)
                || (!candidate.is_empty() && glob_segments(pattern, &candidate[1..]))
        }
        (Some(&"*"), Some(_)) => glob_segments(&pattern[1..], &candidate[1..]),
        (Some(p), Some(c)) if p == c => glob_segments(&pattern[1..], &candidate[1..]),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_run_prefix_excludes_heartbeat() {
        let filter = EventFilter::type_starts_with("run.");
        assert!(filter.matches(&Event::new("run.started", json!({}))));
        assert!(!filter.matches(&Event::new("telemetry.heartbeat", json!({}))));
    }

    #[test]
    fn test_data_paths_and_numbers() {
        let event = Event::new(
            "execution/resource/reading",
            json!({"resources": {"memory": 0.91}, "tags": ["gpu"]}),
        );

        assert!(EventFilter::new(
            "data.resources.memory",
            FilterOperator::GreaterThan,
            json!(0.8)
        )
        .matches(&event));
        assert!(EventFilter::new("data.tags", FilterOperator::Contains, json!("gpu")).matches(&event));
        assert!(!EventFilter::new("data.resources.cpu", FilterOperator::Exists, json!(null))
            .matches(&event));
    }

    #[test]
    fn test_in_and_not_equals() {
        let event = Event::new("safety/emergency_stop", json!({}));
        assert!(EventFilter::new("kind", FilterOperator::In, json!(["safety", "telemetry"]))
            .matches(&event));
        assert!(EventFilter::new("kind", FilterOperator::NotEquals, json!("telemetry"))
            .matches(&event));
    }

    #[test]
    fn test_segment_glob() {
        assert!(segment_glob("*/run/*", "process/run/completed"));
        assert!(segment_glob("execution/**", "execution/resource/reading"));
        assert!(segment_glob("**/failed", "coordination/run/failed"));
        assert!(!segment_glob("*/run/*", "process/resource/reading"));
        assert!(segment_glob("run.*", "run/started"));
    }
}
