//! Test doubles and fixtures used by the crate's own tests and by
//! downstream consumers exercising the engine without a real provider.

mod fixtures;
mod mocks;

pub use fixtures::{sample_context, sample_lesson_json, sample_suggestions_json, sample_activities_json};
pub use mocks::{ScriptedProvider, ScriptedSecondary, StaticProvider};
