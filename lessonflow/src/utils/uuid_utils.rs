//! Request identifier helpers.

use uuid::Uuid;

/// Generates a new request id for a pipeline run.
#[must_use]
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Returns true if the string parses as a UUID.
#[must_use]
pub fn is_valid_request_id(id: &str) -> bool {
    Uuid::parse_str(id).is_ok()
}
