//! Step event type for the per-step append-only event history.

use crate::utils::iso_timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The class of a step event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Informational progress message.
    Info,
    /// A milestone succeeded.
    Success,
    /// Something suspicious but non-fatal.
    Warning,
    /// A failure was recorded.
    Error,
    /// A retry is about to happen.
    Retry,
    /// Low-level diagnostic detail.
    Debug,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Success => write!(f, "success"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Retry => write!(f, "retry"),
            Self::Debug => write!(f, "debug"),
        }
    }
}

/// An event recorded against a step.
///
/// Events are append-only and ordered by insertion; they form the audit
/// trail consumed by the status endpoint and the progress channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepEvent {
    /// When the event occurred (ISO 8601).
    pub timestamp: String,
    /// The event class.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Human-readable message.
    pub message: String,
    /// Optional structured payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl StepEvent {
    /// Creates a new event stamped with the current time.
    #[must_use]
    pub fn new(event_type: EventType, message: impl Into<String>) -> Self {
        Self {
            timestamp: iso_timestamp(),
            event_type,
            message: message.into(),
            data: None,
        }
    }

    /// Attaches a structured payload to the event.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Creates an info event.
    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(EventType::Info, message)
    }

    /// Creates a success event.
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self::new(EventType::Success, message)
    }

    /// Creates an error event.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(EventType::Error, message)
    }

    /// Creates a retry event.
    #[must_use]
    pub fn retry(message: impl Into<String>) -> Self {
        Self::new(EventType::Retry, message)
    }
}
