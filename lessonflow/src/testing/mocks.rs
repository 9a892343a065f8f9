//! Mock providers that record calls and replay scripted outcomes.

use crate::errors::OrchestratorError;
use crate::provider::{
    ChatMessage, GenerateOptions, GenerateResponse, SecondaryProvider, SimpleOptions, TextProvider,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// A provider that replays a per-model script of outcomes.
///
/// Each call against a model pops the next scripted outcome for that
/// model; an exhausted (or missing) script fails with a generic error.
pub struct ScriptedProvider {
    name: String,
    scripts: Mutex<Vec<(String, VecDeque<Result<String, String>>)>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    /// Creates an empty scripted provider.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scripts: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Scripts the ordered outcomes for one model. `Ok` entries become
    /// successful responses; `Err` entries become provider errors with
    /// that message.
    pub fn script(&self, model_id: &str, outcomes: Vec<Result<String, String>>) {
        self.scripts
            .lock()
            .push((model_id.to_string(), outcomes.into()));
    }

    /// Returns the model ids of every call made, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Returns the number of calls made against one model.
    #[must_use]
    pub fn call_count(&self, model_id: &str) -> usize {
        self.calls.lock().iter().filter(|m| *m == model_id).count()
    }
}

#[async_trait]
impl TextProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        model_id: &str,
        _messages: &[ChatMessage],
        _options: &GenerateOptions,
    ) -> Result<GenerateResponse, OrchestratorError> {
        self.calls.lock().push(model_id.to_string());
        let mut scripts = self.scripts.lock();
        let outcome = scripts
            .iter_mut()
            .find(|(id, _)| id == model_id)
            .and_then(|(_, queue)| queue.pop_front());
        match outcome {
            Some(Ok(text)) => Ok(GenerateResponse {
                text,
                finish_reason: Some("stop".to_string()),
                token_usage: None,
            }),
            Some(Err(message)) => Err(OrchestratorError::Provider(message)),
            None => Err(OrchestratorError::Provider(format!(
                "no scripted outcome for model {model_id}"
            ))),
        }
    }
}

/// A secondary provider replaying a single script of outcomes.
pub struct ScriptedSecondary {
    name: String,
    outcomes: Mutex<VecDeque<Result<String, String>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedSecondary {
    /// Creates a secondary provider with the given ordered outcomes.
    #[must_use]
    pub fn new(name: impl Into<String>, outcomes: Vec<Result<String, String>>) -> Self {
        Self {
            name: name.into(),
            outcomes: Mutex::new(outcomes.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Returns every prompt received, in order.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl SecondaryProvider for ScriptedSecondary {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate_text(
        &self,
        prompt: &str,
        _options: &SimpleOptions,
    ) -> Result<GenerateResponse, OrchestratorError> {
        self.calls.lock().push(prompt.to_string());
        match self.outcomes.lock().pop_front() {
            Some(Ok(text)) => Ok(GenerateResponse {
                text,
                finish_reason: Some("stop".to_string()),
                token_usage: None,
            }),
            Some(Err(message)) => Err(OrchestratorError::Provider(message)),
            None => Err(OrchestratorError::Provider(
                "secondary script exhausted".to_string(),
            )),
        }
    }
}

/// A provider that answers every call with the same text.
///
/// Useful for end-to-end runs where call content does not matter; pair
/// with a function mapping model calls to fixture payloads when it does.
pub struct StaticProvider {
    name: String,
    responder: Box<dyn Fn(&[ChatMessage]) -> String + Send + Sync>,
}

impl StaticProvider {
    /// Creates a provider returning a fixed string.
    #[must_use]
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            name: name.into(),
            responder: Box::new(move |_| text.clone()),
        }
    }

    /// Creates a provider computing its answer from the messages.
    #[must_use]
    pub fn with_responder<F>(name: impl Into<String>, responder: F) -> Self
    where
        F: Fn(&[ChatMessage]) -> String + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            responder: Box::new(responder),
        }
    }
}

#[async_trait]
impl TextProvider for StaticProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        _model_id: &str,
        messages: &[ChatMessage],
        _options: &GenerateOptions,
    ) -> Result<GenerateResponse, OrchestratorError> {
        Ok(GenerateResponse {
            text: (self.responder)(messages),
            finish_reason: Some("stop".to_string()),
            token_usage: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_provider_replays_in_order() {
        let provider = ScriptedProvider::new("primary");
        provider.script(
            "model-a",
            vec![Err("429 rate limit".to_string()), Ok("hello".to_string())],
        );

        let err = provider
            .generate("model-a", &[], &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("429"));

        let ok = provider
            .generate("model-a", &[], &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(ok.text, "hello");
        assert_eq!(provider.call_count("model-a"), 2);
    }

    #[tokio::test]
    async fn test_unscripted_model_fails() {
        let provider = ScriptedProvider::new("primary");
        let err = provider
            .generate("model-x", &[], &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no scripted outcome"));
    }

    #[tokio::test]
    async fn test_static_provider_responder() {
        let provider = StaticProvider::with_responder("primary", |messages| {
            format!("echo: {}", messages.len())
        });
        let response = provider
            .generate("any", &[ChatMessage::user("hi")], &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(response.text, "echo: 1");
    }
}
