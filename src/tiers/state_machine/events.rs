use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inputs that move a [`Run`](super::run::Run) between states
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RunEvent {
    /// Begin invoking the delegate
    Start,
    /// Save a checkpoint while running
    Checkpoint(Value),
    /// Delegate finished, with optional result data
    Complete(Option<Value>),
    /// Mark the run as failed with an error message
    Fail(String),
}

impl RunEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Checkpoint(_) => "checkpoint",
            Self::Complete(_) => "complete",
            Self::Fail(_) => "fail",
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(msg) => Some(msg),
            _ => None,
        }
    }

    /// Completion and failure both end the run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete(_) | Self::Fail(_))
    }

    pub fn fail_with_error(error: impl Into<String>) -> Self {
        Self::Fail(error.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_helpers() {
        assert_eq!(RunEvent::Checkpoint(json!({})).event_type(), "checkpoint");
        assert_eq!(
            RunEvent::fail_with_error("boom").error_message(),
            Some("boom")
        );
        assert!(RunEvent::Complete(None).is_terminal());
        assert!(!RunEvent::Start.is_terminal());
    }
}
