//! Error taxonomy for the orchestration engine.
//!
//! Classification is a string/shape heuristic over raw error text and is
//! centralized in [`classify_error`] so the recovery engine and the model
//! cascade agree on meaning.

use crate::utils::iso_timestamp;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed classification of failures, independent of the originating
/// exception type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The provider returned text that is not the expected JSON.
    JsonParse,
    /// The call exceeded its deadline.
    Timeout,
    /// The provider rejected the call for quota reasons.
    RateLimit,
    /// Produced data failed a validation rule.
    Validation,
    /// The provider returned an empty body.
    EmptyResponse,
    /// Transport-level failure.
    Network,
    /// Missing or rejected credentials.
    Auth,
    /// The requested model does not exist or is unavailable.
    ModelNotFound,
    /// Anything the heuristics could not place.
    Unknown,
}

impl ErrorKind {
    /// Returns the wire name of the kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::JsonParse => "json_parse",
            Self::Timeout => "timeout",
            Self::RateLimit => "rate_limit",
            Self::Validation => "validation",
            Self::EmptyResponse => "empty_response",
            Self::Network => "network",
            Self::Auth => "auth",
            Self::ModelNotFound => "model_not_found",
            Self::Unknown => "unknown",
        }
    }
}

/// Classification result stored against steps and recovery state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    /// Human-readable message from the raw error.
    pub message: String,
    /// Optional provider/status code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// The classified kind.
    pub kind: ErrorKind,
    /// When the classification was made (ISO 8601).
    pub timestamp: String,
}

impl ErrorInfo {
    /// Classifies a raw error message into an `ErrorInfo`.
    #[must_use]
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = classify_error(&message);
        Self {
            message,
            code: None,
            kind,
            timestamp: iso_timestamp(),
        }
    }

    /// Attaches a provider/status code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// Classifies a raw error message into an [`ErrorKind`].
///
/// The heuristics match on status codes and message substrings; this is
/// the only place they live.
#[must_use]
pub fn classify_error(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();

    // Order matters: the more specific signals are checked first.
    if lower.contains("429") || lower.contains("rate limit") || lower.contains("quota") || lower.contains("resource exhausted") {
        ErrorKind::RateLimit
    } else if lower.contains("401")
        || lower.contains("403")
        || lower.contains("unauthorized")
        || lower.contains("api key")
        || lower.contains("permission denied")
    {
        ErrorKind::Auth
    } else if (lower.contains("404") || lower.contains("not found")) && lower.contains("model") {
        ErrorKind::ModelNotFound
    } else if lower.contains("timeout") || lower.contains("timed out") || lower.contains("deadline") {
        ErrorKind::Timeout
    } else if lower.contains("json") || lower.contains("parse") || lower.contains("unexpected token") {
        ErrorKind::JsonParse
    } else if lower.contains("empty response") || lower.contains("no content") || lower.contains("empty body") {
        ErrorKind::EmptyResponse
    } else if lower.contains("network")
        || lower.contains("connection")
        || lower.contains("econnreset")
        || lower.contains("dns")
        || lower.contains("socket")
    {
        ErrorKind::Network
    } else if lower.contains("validation") || lower.contains("schema") || lower.contains("invalid format") {
        ErrorKind::Validation
    } else {
        ErrorKind::Unknown
    }
}

/// One attempted model's failure, kept for the aggregated cascade report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelFailure {
    /// The model identifier that was attempted.
    pub model_id: String,
    /// How many calls were made against the model.
    pub attempts: u32,
    /// The last failure's classified kind.
    pub kind: ErrorKind,
    /// The last failure's message.
    pub message: String,
}

/// Errors raised by the model cascade.
#[derive(Debug, Error)]
pub enum CascadeError {
    /// Every primary model (and the secondary provider, if configured)
    /// failed. Carries the per-model failure report for operator
    /// diagnostics.
    #[error("all models exhausted: {}", summarize_failures(.failures))]
    Exhausted {
        /// Per-model failure details, in attempt order.
        failures: Vec<ModelFailure>,
        /// Whether a secondary provider was attempted.
        secondary_attempted: bool,
    },

    /// No primary provider credentials were configured.
    #[error("primary provider api key is missing")]
    MissingCredentials,
}

fn summarize_failures(failures: &[ModelFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({}: {})", f.model_id, f.kind.as_str(), f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// The top-level error type for orchestration operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A generative call failed after the cascade was exhausted.
    #[error("{0}")]
    Cascade(#[from] CascadeError),

    /// A provider call failed.
    #[error("provider error: {0}")]
    Provider(String),

    /// Produced data failed to parse as the expected JSON.
    #[error("json parse error: {0}")]
    JsonParse(String),

    /// A step's validation gate rejected its data.
    #[error("validation failed for step {step_id}: {detail}")]
    ValidationRejected {
        /// The step whose gate rejected.
        step_id: u8,
        /// Which checks failed.
        detail: String,
    },

    /// The completion gate refused to mark the step complete.
    #[error("completion rejected for step {step_id}: {detail}")]
    CompletionRejected {
        /// The step whose completion was refused.
        step_id: u8,
        /// Why it was refused.
        detail: String,
    },

    /// A step id was used before `init_step`.
    #[error("unknown step id: {0}")]
    UnknownStep(u8),

    /// The incoming lesson context was unusable.
    #[error("invalid lesson context: {0}")]
    InvalidContext(String),

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Classifies this error through the central heuristic.
    #[must_use]
    pub fn to_error_info(&self) -> ErrorInfo {
        match self {
            // These carry their kind structurally; bypass the heuristics.
            Self::JsonParse(msg) => ErrorInfo {
                message: msg.clone(),
                code: None,
                kind: ErrorKind::JsonParse,
                timestamp: iso_timestamp(),
            },
            Self::ValidationRejected { .. } | Self::CompletionRejected { .. } => ErrorInfo {
                message: self.to_string(),
                code: None,
                kind: ErrorKind::Validation,
                timestamp: iso_timestamp(),
            },
            _ => ErrorInfo::classify(self.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rate_limit() {
        assert_eq!(classify_error("HTTP 429 Too Many Requests"), ErrorKind::RateLimit);
        assert_eq!(classify_error("Rate limit exceeded for project"), ErrorKind::RateLimit);
        assert_eq!(classify_error("quota exceeded"), ErrorKind::RateLimit);
    }

    #[test]
    fn test_classify_auth() {
        assert_eq!(classify_error("401 Unauthorized"), ErrorKind::Auth);
        assert_eq!(classify_error("invalid API key provided"), ErrorKind::Auth);
    }

    #[test]
    fn test_classify_model_not_found() {
        assert_eq!(classify_error("model gemini-9.9 not found (404)"), ErrorKind::ModelNotFound);
        // A plain 404 without a model reference is not a model error.
        assert_ne!(classify_error("page not found"), ErrorKind::ModelNotFound);
    }

    #[test]
    fn test_classify_timeout() {
        assert_eq!(classify_error("request timed out after 30s"), ErrorKind::Timeout);
        assert_eq!(classify_error("deadline exceeded"), ErrorKind::Timeout);
    }

    #[test]
    fn test_classify_json() {
        assert_eq!(classify_error("Unexpected token < in JSON"), ErrorKind::JsonParse);
        assert_eq!(classify_error("failed to parse response"), ErrorKind::JsonParse);
    }

    #[test]
    fn test_classify_empty_and_network() {
        assert_eq!(classify_error("empty response from provider"), ErrorKind::EmptyResponse);
        assert_eq!(classify_error("connection reset by peer"), ErrorKind::Network);
        assert_eq!(classify_error("DNS resolution failed"), ErrorKind::Network);
    }

    #[test]
    fn test_classify_validation_and_unknown() {
        assert_eq!(classify_error("schema validation failed"), ErrorKind::Validation);
        assert_eq!(classify_error("something inexplicable"), ErrorKind::Unknown);
    }

    #[test]
    fn test_rate_limit_wins_over_timeout() {
        // "429 ... timeout" must classify as rate limit, the more
        // actionable signal.
        assert_eq!(classify_error("429: retry timeout budget"), ErrorKind::RateLimit);
    }

    #[test]
    fn test_error_info_classify() {
        let info = ErrorInfo::classify("request timed out").with_code("504");
        assert_eq!(info.kind, ErrorKind::Timeout);
        assert_eq!(info.code.as_deref(), Some("504"));
    }

    #[test]
    fn test_cascade_error_lists_every_model() {
        let err = CascadeError::Exhausted {
            failures: vec![
                ModelFailure {
                    model_id: "model-a".to_string(),
                    attempts: 2,
                    kind: ErrorKind::Timeout,
                    message: "timed out".to_string(),
                },
                ModelFailure {
                    model_id: "model-b".to_string(),
                    attempts: 1,
                    kind: ErrorKind::RateLimit,
                    message: "429".to_string(),
                },
            ],
            secondary_attempted: false,
        };
        let text = err.to_string();
        assert!(text.contains("model-a"));
        assert!(text.contains("model-b"));
    }

    #[test]
    fn test_orchestrator_error_structural_kinds() {
        let err = OrchestratorError::JsonParse("bad payload".to_string());
        assert_eq!(err.to_error_info().kind, ErrorKind::JsonParse);

        let err = OrchestratorError::ValidationRejected {
            step_id: 2,
            detail: "lesson-parsed".to_string(),
        };
        assert_eq!(err.to_error_info().kind, ErrorKind::Validation);
    }
}
