//! reqwest-backed provider implementations for real deployments.

use super::{
    ChatMessage, GenerateOptions, GenerateResponse, SecondaryProvider, SimpleOptions, TextProvider,
};
use crate::errors::OrchestratorError;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// A generic JSON-over-HTTP text provider.
///
/// Posts `{model, messages, options}` to `{base_url}/generate` with a
/// bearer token and expects `{text, finishReason, tokenUsage}` back —
/// the capability contract, not any vendor's native shape. Adapting a
/// vendor API means fronting it with this shape.
pub struct HttpTextProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    options: &'a GenerateOptions,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SimpleRequest<'a> {
    prompt: &'a str,
    options: &'a SimpleOptions,
}

impl HttpTextProvider {
    /// Creates a provider with a 60s request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, OrchestratorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| OrchestratorError::Internal(format!("http client: {e}")))?;
        Ok(Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            client,
        })
    }

    async fn post_json<B: Serialize>(
        &self,
        body: &B,
    ) -> Result<GenerateResponse, OrchestratorError> {
        let url = format!("{}/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| OrchestratorError::Provider(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::Provider(format!(
                "provider returned {status}: {text}"
            )));
        }

        response
            .json::<GenerateResponse>()
            .await
            .map_err(|e| OrchestratorError::JsonParse(e.to_string()))
    }
}

#[async_trait]
impl TextProvider for HttpTextProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
        options: &GenerateOptions,
    ) -> Result<GenerateResponse, OrchestratorError> {
        let body = GenerateRequest {
            model: model_id,
            messages,
            options,
        };
        let response = self.post_json(&body).await?;
        if response.text.trim().is_empty() {
            return Err(OrchestratorError::Provider(
                "empty response from provider".to_string(),
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl SecondaryProvider for HttpTextProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate_text(
        &self,
        prompt: &str,
        options: &SimpleOptions,
    ) -> Result<GenerateResponse, OrchestratorError> {
        let body = SimpleRequest { prompt, options };
        self.post_json(&body).await
    }
}
