//! # Error Classification
//!
//! Turns a failure message plus its [`ErrorContext`] into an
//! [`ErrorClassification`]: category, severity, recoverability, risk flags and
//! a confidence score.
//!
//! ## Pipeline
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Vocabulary   │──▶│ Base severity│──▶│ Repetition   │──▶│ Learned      │
//! │ scoring      │   │ per category │   │ escalation   │   │ patterns     │
//! └──────────────┘   └──────────────┘   └──────────────┘   └──────────────┘
//! ```
//!
//! Classification is pure with respect to the pattern library contents: the
//! same message and context always produce the same category and severity
//! until a pattern is added or removed.
//!
//! ## Usage
//!
//! ```rust
//! use agent_runtime::config::ResilienceConfig;
//! use agent_runtime::resilience::{
//!     ErrorCategory, ErrorClassifier, ErrorContext, PatternLibrary, Severity,
//!     StandardErrorClassifier,
//! };
//! use std::sync::Arc;
//!
//! let classifier = StandardErrorClassifier::new(
//!     ResilienceConfig::default(),
//!     Arc::new(PatternLibrary::new()),
//! );
//! let context = ErrorContext::new("llm_client", "complete");
//! let classification = classifier.classify("Network timeout calling upstream", &context);
//!
//! assert_eq!(classification.category, ErrorCategory::Transient);
//! assert_eq!(classification.severity, Severity::Warning);
//! ```

use super::patterns::PatternLibrary;
use super::types::{
    ClassificationMetadata, ErrorCategory, ErrorClassification, ErrorContext, Recoverability,
    Severity,
};
use crate::config::ResilienceConfig;
use chrono::Utc;
use std::sync::Arc;

/// Category vocabularies in tie-break order
const VOCABULARY: &[(ErrorCategory, &[&str])] = &[
    (
        ErrorCategory::Security,
        &[
            "unauthorized",
            "unauthenticated",
            "forbidden",
            "authentication",
            "authorization",
            "invalid token",
            "expired token",
            "token expired",
            "jwt",
            "api key",
            "credential",
            "permission denied",
            "access denied",
            "csrf",
            "injection",
            "401",
            "403",
        ],
    ),
    (
        ErrorCategory::System,
        &[
            "connection refused",
            "econnrefused",
            "database",
            "disk",
            "filesystem",
            "segfault",
            "panic",
            "crash",
            "service unavailable",
            "internal server error",
            "corrupt",
            "fatal",
            "503",
            "500",
        ],
    ),
    (
        ErrorCategory::Resource,
        &[
            "out of memory",
            "oom",
            "memory",
            "cpu",
            "quota",
            "too many requests",
            "rate limit",
            "resource exhausted",
            "capacity",
            "throttl",
            "pool exhausted",
            "429",
        ],
    ),
    (
        ErrorCategory::Transient,
        &[
            "timeout",
            "timed out",
            "etimedout",
            "network",
            "econnreset",
            "connection reset",
            "socket hang up",
            "temporarily",
            "unavailable",
            "try again",
            "dns",
            "502",
            "504",
        ],
    ),
    (
        ErrorCategory::Logic,
        &[
            "validation",
            "invalid",
            "schema",
            "parse",
            "type error",
            "typeerror",
            "undefined",
            "null",
            "missing field",
            "assertion",
            "unexpected token",
            "bad request",
            "400",
        ],
    ),
];

/// SYSTEM failures with these terms leave nothing functional to recover into
const FATAL_VOCABULARY: &[&str] = &[
    "fatal",
    "corrupt",
    "data loss",
    "unrecoverable",
    "kernel panic",
];

const PERSISTENCE_CONTEXT: &[&str] = &[
    "database",
    "db",
    "storage",
    "store",
    "persist",
    "repository",
    "checkpoint",
    "write",
];

const DURABILITY_LOSS: &[&str] = &[
    "data loss",
    "corrupt",
    "write failed",
    "not persisted",
    "durability",
    "fsync",
    "lost write",
    "partial write",
    "rollback failed",
];

/// Message terms weigh more than component/operation terms
const MESSAGE_WEIGHT: f64 = 1.0;
const CONTEXT_WEIGHT: f64 = 0.5;

const UNMATCHED_CONFIDENCE: f64 = 0.3;
const BASE_CONFIDENCE: f64 = 0.5;
const CONFIDENCE_PER_HIT: f64 = 0.1;
const MAX_LEXICAL_CONFIDENCE: f64 = 0.95;

/// Substring match; status codes must stand alone so "5000ms" is not a 500
fn contains_term(haystack: &str, term: &str) -> bool {
    if !term.bytes().all(|b| b.is_ascii_digit()) {
        return haystack.contains(term);
    }

    haystack.match_indices(term).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + term.len()..].chars().next();
        !before.is_some_and(|c| c.is_ascii_alphanumeric())
            && !after.is_some_and(|c| c.is_ascii_alphanumeric())
    })
}

pub trait ErrorClassifier: Send + Sync {
    /// Classify a failure; never fails for any message or context
    fn classify(&self, message: &str, context: &ErrorContext) -> ErrorClassification;

    fn classifier_name(&self) -> &'static str;
}

#[derive(Debug)]
pub struct StandardErrorClassifier {
    config: ResilienceConfig,
    patterns: Arc<PatternLibrary>,
}

#[derive(Debug)]
struct LexicalResult {
    category: ErrorCategory,
    score: f64,
    keywords: Vec<String>,
}

impl StandardErrorClassifier {
    pub fn new(config: ResilienceConfig, patterns: Arc<PatternLibrary>) -> Self {
        Self { config, patterns }
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn patterns(&self) -> &Arc<PatternLibrary> {
        &self.patterns
    }

    fn lexical_category(message: &str, context: &ErrorContext) -> Option<LexicalResult> {
        let message = message.to_lowercase();
        let scope = format!("{} {}", context.component, context.operation).to_lowercase();

        let mut best: Option<LexicalResult> = None;
        for (category, terms) in VOCABULARY {
            let mut score = 0.0;
            let mut keywords = Vec::new();
            for term in *terms {
                let in_message = contains_term(&message, term);
                let in_scope = contains_term(&scope, term);
                if in_message {
                    score += MESSAGE_WEIGHT;
                }
                if in_scope {
                    score += CONTEXT_WEIGHT;
                }
                if in_message || in_scope {
                    keywords.push((*term).to_string());
                }
            }

            // Strictly greater keeps the earlier category on ties
            if score > 0.0 && best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(LexicalResult {
                    category: *category,
                    score,
                    keywords,
                });
            }
        }
        best
    }

    fn base_severity(category: ErrorCategory) -> Severity {
        match category {
            ErrorCategory::Transient => Severity::Warning,
            ErrorCategory::System | ErrorCategory::Security => Severity::Critical,
            ErrorCategory::Logic | ErrorCategory::Resource => Severity::Error,
        }
    }

    fn should_escalate(&self, context: &ErrorContext) -> bool {
        context.attempt_count >= self.config.severity_escalation_attempts
            || context.previous_strategies.len() >= self.config.severity_escalation_previous_strategies
    }

    fn recoverability(
        category: ErrorCategory,
        severity: Severity,
        system_functional: bool,
    ) -> Recoverability {
        match category {
            ErrorCategory::Transient | ErrorCategory::Resource => Recoverability::Automatic,
            ErrorCategory::Security | ErrorCategory::Logic => Recoverability::Manual,
            ErrorCategory::System if !system_functional && severity >= Severity::Critical => {
                Recoverability::None
            }
            ErrorCategory::System => Recoverability::Manual,
        }
    }

    fn has_data_risk(message: &str, context: &ErrorContext) -> bool {
        let scope = format!("{} {}", context.component, context.operation).to_lowercase();
        let message = message.to_lowercase();
        PERSISTENCE_CONTEXT.iter().any(|term| scope.contains(term))
            && DURABILITY_LOSS.iter().any(|term| message.contains(term))
    }

    fn lexical_confidence(lexical: Option<&LexicalResult>) -> f64 {
        match lexical {
            Some(result) => {
                (BASE_CONFIDENCE + CONFIDENCE_PER_HIT * result.score).min(MAX_LEXICAL_CONFIDENCE)
            }
            None => UNMATCHED_CONFIDENCE,
        }
    }

    fn attempt_adjusted(&self, confidence: f64, attempt_count: u32) -> f64 {
        let penalty = self.config.attempt_confidence_penalty
            * f64::from(attempt_count.saturating_sub(1));
        let floor = self.config.confidence_floor.min(confidence);
        (confidence - penalty).max(floor)
    }
}

impl ErrorClassifier for StandardErrorClassifier {
    fn classify(&self, message: &str, context: &ErrorContext) -> ErrorClassification {
        let lexical = Self::lexical_category(message, context);
        let matches =
            self.patterns
                .match_patterns(message, context, self.config.pattern_match_threshold);
        let best_match = matches.first();

        // Learned patterns only decide the category when the vocabulary is silent
        let (category, mut severity) = match (&lexical, best_match) {
            (Some(result), _) => (result.category, Self::base_severity(result.category)),
            (None, Some(pattern)) => (pattern.category, pattern.severity),
            (None, None) => (ErrorCategory::Logic, Self::base_severity(ErrorCategory::Logic)),
        };

        let lowered = message.to_lowercase();
        let fatal_terms = FATAL_VOCABULARY.iter().any(|term| lowered.contains(term));
        if category == ErrorCategory::System && fatal_terms {
            severity = Severity::Fatal;
        }
        if self.should_escalate(context) {
            severity = severity.escalate();
        }

        let system_functional =
            context.system_state.functional && !(category == ErrorCategory::System && fatal_terms);
        let multiple_components_affected = context.system_state.affected_components.len() > 1;

        let mut confidence =
            self.attempt_adjusted(Self::lexical_confidence(lexical.as_ref()), context.attempt_count);
        if let Some(pattern) = best_match {
            confidence += pattern.confidence * pattern.score * self.config.pattern_confidence_boost;
        }

        ErrorClassification {
            category,
            severity,
            recoverability: Self::recoverability(category, severity, system_functional),
            system_functional,
            multiple_components_affected,
            data_risk: Self::has_data_risk(message, context),
            security_risk: category == ErrorCategory::Security,
            confidence_score: confidence.clamp(0.0, 1.0),
            timestamp: Utc::now(),
            metadata: ClassificationMetadata {
                matching_patterns: matches.iter().map(|m| m.pattern_id.clone()).collect(),
                matched_keywords: lexical.map(|l| l.keywords).unwrap_or_default(),
            },
        }
    }

    fn classifier_name(&self) -> &'static str {
        "StandardErrorClassifier"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::types::{
        ConditionOperator, ErrorPattern, StrategyType, SystemState, TriggerCondition,
    };
    use serde_json::json;

    fn create_classifier() -> StandardErrorClassifier {
        StandardErrorClassifier::new(ResilienceConfig::default(), Arc::new(PatternLibrary::new()))
    }

    fn create_test_context() -> ErrorContext {
        ErrorContext::new("llm_client", "complete")
    }

    #[test]
    fn test_network_timeout_is_transient_warning() {
        let classifier = create_classifier();
        let c = classifier.classify("Network timeout while calling upstream", &create_test_context());
        assert_eq!(c.category, ErrorCategory::Transient);
        assert_eq!(c.severity, Severity::Warning);
        assert_eq!(c.recoverability, Recoverability::Automatic);
        assert!(!c.security_risk);
        assert!(c.metadata.matched_keywords.contains(&"timeout".to_string()));
    }

    #[test]
    fn test_connection_refused_is_system_critical() {
        let classifier = create_classifier();
        let c = classifier.classify("ECONNREFUSED: connection refused", &create_test_context());
        assert_eq!(c.category, ErrorCategory::System);
        assert_eq!(c.severity, Severity::Critical);
        assert_eq!(c.recoverability, Recoverability::Manual);
    }

    #[test]
    fn test_auth_failure_is_security() {
        let classifier = create_classifier();
        let c = classifier.classify("401 Unauthorized: invalid token", &create_test_context());
        assert_eq!(c.category, ErrorCategory::Security);
        assert_eq!(c.severity, Severity::Critical);
        assert_eq!(c.recoverability, Recoverability::Manual);
        assert!(c.security_risk);
    }

    #[test]
    fn test_validation_failure_is_logic() {
        let classifier = create_classifier();
        let c = classifier.classify("Schema validation failed: missing field 'id'", &create_test_context());
        assert_eq!(c.category, ErrorCategory::Logic);
        assert_eq!(c.severity, Severity::Error);
        assert_eq!(c.recoverability, Recoverability::Manual);
    }

    #[test]
    fn test_memory_pressure_is_resource() {
        let classifier = create_classifier();
        let c = classifier.classify("Out of memory allocating buffer", &create_test_context());
        assert_eq!(c.category, ErrorCategory::Resource);
        assert_eq!(c.recoverability, Recoverability::Automatic);
    }

    #[test]
    fn test_unknown_message_defaults_to_low_confidence_logic() {
        let classifier = create_classifier();
        let c = classifier.classify("something odd happened", &create_test_context());
        assert_eq!(c.category, ErrorCategory::Logic);
        assert!(c.confidence_score < 0.5);
        assert!(c.metadata.matched_keywords.is_empty());
    }

    #[test]
    fn test_attempt_four_escalates_and_lowers_confidence() {
        let classifier = create_classifier();
        let message = "Network timeout while calling upstream";
        let first = classifier.classify(message, &create_test_context());
        let fourth = classifier.classify(message, &create_test_context().with_attempt(4));

        assert_eq!(first.severity, Severity::Warning);
        assert_eq!(fourth.severity, Severity::Error);
        assert!(fourth.confidence_score < first.confidence_score);
    }

    #[test]
    fn test_previous_strategies_escalate() {
        let classifier = create_classifier();
        let context = create_test_context().with_previous_strategies(vec![
            StrategyType::RetrySame,
            StrategyType::WaitAndRetry,
        ]);
        let c = classifier.classify("Network timeout", &context);
        assert_eq!(c.severity, Severity::Error);
    }

    #[test]
    fn test_fatal_system_failure_is_unrecoverable() {
        let classifier = create_classifier();
        let context = create_test_context().with_system_state(SystemState {
            functional: false,
            affected_components: vec!["db".to_string(), "queue".to_string()],
        });
        let c = classifier.classify("Fatal: database corrupt", &context);
        assert_eq!(c.category, ErrorCategory::System);
        assert_eq!(c.severity, Severity::Fatal);
        assert_eq!(c.recoverability, Recoverability::None);
        assert!(!c.system_functional);
        assert!(c.multiple_components_affected);
    }

    #[test]
    fn test_data_risk_requires_persistence_context() {
        let classifier = create_classifier();
        let persistence = ErrorContext::new("checkpoint_store", "save");
        let c = classifier.classify("fsync failed, write not persisted", &persistence);
        assert!(c.data_risk);

        let c = classifier.classify("fsync failed, write not persisted", &create_test_context());
        assert!(!c.data_risk);
    }

    #[test]
    fn test_pattern_boosts_confidence_without_overriding_category() {
        let patterns = Arc::new(PatternLibrary::new());
        let classifier = StandardErrorClassifier::new(ResilienceConfig::default(), Arc::clone(&patterns));
        let message = "Network timeout while calling upstream";
        let baseline = classifier.classify(message, &create_test_context());

        patterns.add_pattern(ErrorPattern::new(
            "upstream-timeout",
            "Upstream timeout",
            ErrorCategory::Resource,
            Severity::Error,
            vec![TriggerCondition::new(
                "message",
                ConditionOperator::Contains,
                json!("upstream"),
                1.0,
            )],
            1.0,
        ));

        let boosted = classifier.classify(message, &create_test_context());
        assert_eq!(boosted.category, ErrorCategory::Transient);
        assert_eq!(boosted.metadata.matching_patterns, vec!["upstream-timeout"]);
        assert!(boosted.confidence_score > baseline.confidence_score);
    }

    #[test]
    fn test_pattern_decides_category_when_vocabulary_is_silent() {
        let patterns = Arc::new(PatternLibrary::new());
        patterns.add_pattern(ErrorPattern::new(
            "vendor-code",
            "Vendor specific code",
            ErrorCategory::Resource,
            Severity::Error,
            vec![TriggerCondition::new(
                "message",
                ConditionOperator::Matches,
                json!(r"^E\d{4}$"),
                1.0,
            )],
            0.8,
        ));
        let classifier = StandardErrorClassifier::new(ResilienceConfig::default(), patterns);

        let c = classifier.classify("E4021", &create_test_context());
        assert_eq!(c.category, ErrorCategory::Resource);
        assert_eq!(c.severity, Severity::Error);
    }

    #[test]
    fn test_status_codes_match_whole_numbers_only() {
        let classifier = create_classifier();
        let c = classifier.classify("worker delegate timed out after 5000ms", &create_test_context());
        assert_eq!(c.category, ErrorCategory::Transient);

        let c = classifier.classify("upstream returned 503", &create_test_context());
        assert_eq!(c.category, ErrorCategory::System);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let classifier = create_classifier();
        let context = create_test_context().with_attempt(2);
        let a = classifier.classify("connection reset by peer", &context);
        let b = classifier.classify("connection reset by peer", &context);
        assert_eq!(a.category, b.category);
        assert_eq!(a.severity, b.severity);
        assert_eq!(a.confidence_score, b.confidence_score);
    }
}
