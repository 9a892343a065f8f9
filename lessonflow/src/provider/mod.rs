//! The generative-text capability boundary.
//!
//! The engine never depends on provider-specific request/response shapes
//! beyond these types: a provider is anything that can turn chat messages
//! plus sampling options into text.

use crate::errors::OrchestratorError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[cfg(feature = "http-provider")]
mod http;
#[cfg(feature = "http-provider")]
pub use http::HttpTextProvider;

/// Chat message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// System instruction.
    System,
    /// End-user content.
    User,
    /// Prior model output.
    Assistant,
}

/// One chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The message role.
    pub role: Role,
    /// The message text.
    pub content: String,
}

impl ChatMessage {
    /// Creates a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Creates a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Sampling options for a generative call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateOptions {
    /// Sampling temperature.
    pub temperature: f32,
    /// Output token budget.
    pub max_tokens: u32,
    /// Nucleus sampling parameter.
    pub top_p: f32,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 4096,
            top_p: 0.95,
        }
    }
}

/// Simplified options for the secondary provider's reduced surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleOptions {
    /// Sampling temperature.
    pub temperature: f32,
    /// Output token budget.
    pub max_tokens: u32,
}

impl From<&GenerateOptions> for SimpleOptions {
    fn from(options: &GenerateOptions) -> Self {
        Self {
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        }
    }
}

/// Token accounting reported by a provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: u32,
    /// Tokens produced in the completion.
    pub completion_tokens: u32,
}

/// A provider's answer to a generative call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    /// The generated text.
    pub text: String,
    /// Why generation stopped, if reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    /// Token accounting, if reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
}

/// The primary-provider capability: multi-model chat generation.
#[async_trait]
pub trait TextProvider: Send + Sync {
    /// The provider's identity (used in cascade metadata).
    fn name(&self) -> &str;

    /// Issues one generative call against the named model.
    async fn generate(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
        options: &GenerateOptions,
    ) -> Result<GenerateResponse, OrchestratorError>;
}

/// The secondary-provider capability: a single-shot, plain-text surface.
///
/// Deliberately narrower than [`TextProvider`]: it receives only the
/// concatenated system+user text and simplified options.
#[async_trait]
pub trait SecondaryProvider: Send + Sync {
    /// The provider's identity.
    fn name(&self) -> &str;

    /// Issues one generative call.
    async fn generate_text(
        &self,
        prompt: &str,
        options: &SimpleOptions,
    ) -> Result<GenerateResponse, OrchestratorError>;
}

/// Flattens chat messages into the secondary provider's plain-text shape.
#[must_use]
pub fn concatenate_messages(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
