//! Small shared utilities: timestamps and identifiers.

mod timestamps;
mod uuid_utils;

pub use timestamps::{iso_timestamp, now_utc, Timestamp};
pub use uuid_utils::{generate_request_id, is_valid_request_id};
