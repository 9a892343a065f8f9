//! Multi-provider cascade fallback for generative calls.
//!
//! Attempts a ranked list of primary-provider models in priority order
//! with bounded per-model retries, skipping immediately on rate-limit or
//! model-not-found conditions, and falls back to the secondary provider
//! exactly once as a whole-cascade last resort. This layer knows nothing
//! about steps or validation; it is a pure request/response strategy.

use crate::errors::{CascadeError, ErrorKind, ModelFailure, OrchestratorError};
use crate::provider::{
    concatenate_messages, ChatMessage, GenerateOptions, GenerateResponse, SecondaryProvider,
    SimpleOptions, TextProvider,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One entry of the statically configured model cascade.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelCascadeEntry {
    /// The provider-side model identifier.
    pub model_id: String,
    /// Human-readable name for diagnostics.
    pub display_name: String,
    /// Ascending attempt order.
    pub priority: u8,
}

/// Cascade configuration, immutable for the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeConfig {
    /// Models to attempt, tried by ascending priority.
    pub models: Vec<ModelCascadeEntry>,
    /// Calls permitted against a single model before advancing.
    pub max_retries_per_model: u32,
    /// Whether the secondary provider may be used as a last resort.
    pub use_secondary_fallback: bool,
    /// Base for the per-model transient backoff (`2^attempt * base`).
    pub transient_backoff_base_ms: u64,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            models: vec![
                ModelCascadeEntry {
                    model_id: "gemini-2.0-flash".to_string(),
                    display_name: "Gemini 2.0 Flash".to_string(),
                    priority: 1,
                },
                ModelCascadeEntry {
                    model_id: "gemini-1.5-flash".to_string(),
                    display_name: "Gemini 1.5 Flash".to_string(),
                    priority: 2,
                },
                ModelCascadeEntry {
                    model_id: "gemini-1.5-pro".to_string(),
                    display_name: "Gemini 1.5 Pro".to_string(),
                    priority: 3,
                },
            ],
            max_retries_per_model: 2,
            use_secondary_fallback: true,
            transient_backoff_base_ms: 1000,
        }
    }
}

/// Metadata describing which model answered and how.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeMetadata {
    /// The model that produced the answer.
    pub model: String,
    /// The provider that produced the answer.
    pub provider: String,
    /// Calls made against the answering model.
    pub attempts: u32,
    /// True iff a non-primary model (or the secondary provider) answered.
    pub used_fallback: bool,
}

/// A cascade result: the response enriched with attempt metadata.
#[derive(Debug, Clone)]
pub struct CascadeResponse {
    /// The provider's answer.
    pub response: GenerateResponse,
    /// Which model/provider answered and how many attempts it took.
    pub metadata: CascadeMetadata,
}

/// The cascading client over a primary and optional secondary provider.
pub struct CascadeClient {
    primary: Arc<dyn TextProvider>,
    secondary: Option<Arc<dyn SecondaryProvider>>,
    config: CascadeConfig,
}

impl CascadeClient {
    /// Creates a client. Models are sorted by ascending priority once,
    /// at construction.
    #[must_use]
    pub fn new(
        primary: Arc<dyn TextProvider>,
        secondary: Option<Arc<dyn SecondaryProvider>>,
        mut config: CascadeConfig,
    ) -> Self {
        config.models.sort_by_key(|m| m.priority);
        Self {
            primary,
            secondary,
            config,
        }
    }

    /// Returns the client's configuration.
    #[must_use]
    pub fn config(&self) -> &CascadeConfig {
        &self.config
    }

    /// Issues a generative call through the cascade.
    ///
    /// # Errors
    ///
    /// Returns [`CascadeError::Exhausted`] when every primary model (and
    /// the secondary provider, if configured) failed; the error lists
    /// every attempted model and its failure reason.
    pub async fn generate_with_cascade(
        &self,
        messages: &[ChatMessage],
        options: &GenerateOptions,
    ) -> Result<CascadeResponse, CascadeError> {
        let primary = self.primary.clone();
        let request = |model_id: String| {
            let primary = primary.clone();
            async move { primary.generate(&model_id, messages, options).await }
        };

        match self.with_multi_model_fallback(request).await {
            Ok(response) => Ok(response),
            Err(mut failures) => {
                if self.config.use_secondary_fallback {
                    if let Some(secondary) = &self.secondary {
                        // Exactly one last-resort call, with the reduced
                        // request shape.
                        let prompt = concatenate_messages(messages);
                        let simple = SimpleOptions::from(options);
                        info!(provider = secondary.name(), "primary cascade exhausted, trying secondary provider");
                        match secondary.generate_text(&prompt, &simple).await {
                            Ok(response) => {
                                return Ok(CascadeResponse {
                                    response,
                                    metadata: CascadeMetadata {
                                        model: secondary.name().to_string(),
                                        provider: "secondary".to_string(),
                                        attempts: 1,
                                        used_fallback: true,
                                    },
                                });
                            }
                            Err(err) => {
                                let info = err.to_error_info();
                                failures.push(ModelFailure {
                                    model_id: secondary.name().to_string(),
                                    attempts: 1,
                                    kind: info.kind,
                                    message: info.message,
                                });
                                return Err(CascadeError::Exhausted {
                                    failures,
                                    secondary_attempted: true,
                                });
                            }
                        }
                    }
                }
                Err(CascadeError::Exhausted {
                    failures,
                    secondary_attempted: false,
                })
            }
        }
    }

    /// Runs the primary-model loop: each model by ascending priority,
    /// bounded retries per model, structural failures skipping the model
    /// outright.
    ///
    /// # Errors
    ///
    /// Returns the per-model failure report when every model failed.
    async fn with_multi_model_fallback<F, Fut>(
        &self,
        request: F,
    ) -> Result<CascadeResponse, Vec<ModelFailure>>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<GenerateResponse, OrchestratorError>>,
    {
        let mut failures: Vec<ModelFailure> = Vec::new();

        for (index, entry) in self.config.models.iter().enumerate() {
            let mut attempts: u32 = 0;
            let mut last: Option<(ErrorKind, String)> = None;

            while attempts < self.config.max_retries_per_model {
                attempts += 1;
                debug!(model = %entry.model_id, attempt = attempts, "cascade attempt");

                match request(entry.model_id.clone()).await {
                    Ok(response) => {
                        return Ok(CascadeResponse {
                            response,
                            metadata: CascadeMetadata {
                                model: entry.model_id.clone(),
                                provider: self.primary.name().to_string(),
                                attempts,
                                used_fallback: index > 0,
                            },
                        });
                    }
                    Err(err) => {
                        let info = err.to_error_info();
                        warn!(
                            model = %entry.model_id,
                            attempt = attempts,
                            kind = info.kind.as_str(),
                            error = %info.message,
                            "cascade attempt failed"
                        );
                        let structural = matches!(
                            info.kind,
                            ErrorKind::RateLimit | ErrorKind::ModelNotFound
                        );
                        last = Some((info.kind, info.message));
                        if structural {
                            // The model is structurally unavailable right
                            // now; retrying it would only burn time.
                            break;
                        }
                        if attempts < self.config.max_retries_per_model {
                            let delay = Duration::from_millis(
                                2u64.saturating_pow(attempts)
                                    .saturating_mul(self.config.transient_backoff_base_ms),
                            );
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }

            if let Some((kind, message)) = last {
                failures.push(ModelFailure {
                    model_id: entry.model_id.clone(),
                    attempts,
                    kind,
                    message,
                });
            }
        }

        Err(failures)
    }
}
