//! HTTP surface: orchestration trigger, status lookup, health, and a
//! server-sent-events progress feed.
//!
//! Handlers hold no run state of their own; everything flows through the
//! [`RunRegistry`], which only contains live runs. A run is registered
//! before its first step and evicted after its terminal notification,
//! so a finished run's status lookup deliberately returns 404.

use crate::cascade::{CascadeClient, CascadeConfig};
use crate::config::ServiceConfig;
use crate::pipeline::{
    ArtifactStore, GenerationDefaults, LessonContext, MemoryArtifactStore, Orchestrator,
};
use crate::provider::HttpTextProvider;
use crate::registry::RunRegistry;
use crate::utils::{generate_request_id, iso_timestamp};
use crate::workflow::{ChannelListener, ProgressEventType};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{error, info};

/// Shared state for all handlers.
pub struct AppState {
    config: ServiceConfig,
    registry: RunRegistry,
    cascade: Option<Arc<CascadeClient>>,
    store: Arc<dyn ArtifactStore>,
}

impl AppState {
    /// Builds the state from configuration, wiring HTTP providers when
    /// credentials are present. The service stays up without them; the
    /// orchestrate endpoint reports the gap per request.
    ///
    /// # Errors
    ///
    /// Returns an error when a configured provider client cannot be
    /// constructed.
    pub fn from_config(config: ServiceConfig) -> Result<Self, crate::errors::OrchestratorError> {
        let primary = match (&config.primary_api_key, &config.primary_api_url) {
            (Some(key), Some(url)) => Some(Arc::new(HttpTextProvider::new(
                "primary", url, key,
            )?)),
            _ => None,
        };
        let secondary = match (&config.secondary_api_key, &config.secondary_api_url) {
            (Some(key), Some(url)) => Some(Arc::new(HttpTextProvider::new(
                "secondary", url, key,
            )?)),
            _ => None,
        };
        let cascade = primary.map(|p| {
            Arc::new(CascadeClient::new(
                p,
                secondary.map(|s| s as Arc<dyn crate::provider::SecondaryProvider>),
                CascadeConfig::default(),
            ))
        });
        Ok(Self {
            config,
            registry: RunRegistry::new(),
            cascade,
            store: Arc::new(MemoryArtifactStore::new()),
        })
    }

    /// Builds a state with explicit collaborators, for embedding and
    /// tests.
    #[must_use]
    pub fn with_parts(
        config: ServiceConfig,
        cascade: Option<Arc<CascadeClient>>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            config,
            registry: RunRegistry::new(),
            cascade,
            store,
        }
    }

    /// Returns the run registry.
    #[must_use]
    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }
}

/// Builds the service router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/orchestrate", post(orchestrate))
        .route("/status/:request_id", get(status))
        .route("/progress/:request_id", get(progress))
        .route("/health", get(health))
        .with_state(state)
}

/// Binds and serves until the listener fails.
///
/// # Errors
///
/// Returns any bind or accept error from the listener.
pub async fn serve(config: ServiceConfig) -> std::io::Result<()> {
    let bind_addr = config.bind_addr.clone();
    let state = AppState::from_config(config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(%bind_addr, "lessonflow server listening");
    axum::serve(listener, router(Arc::new(state))).await
}

fn error_body(message: impl Into<String>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "success": false, "error": message.into() }))
}

/// Per-request generation overrides accepted by the orchestrate body.
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestOptions {
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

async fn orchestrate(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let Some(raw_context) = body.get("lessonContext").cloned() else {
        return (
            StatusCode::BAD_REQUEST,
            error_body("lessonContext é obrigatório"),
        )
            .into_response();
    };
    let context: LessonContext = match serde_json::from_value(raw_context) {
        Ok(context) => context,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                error_body(format!("lessonContext inválido: {e}")),
            )
                .into_response();
        }
    };

    let Some(cascade) = state.cascade.clone() else {
        error!("orchestrate called without primary provider credentials");
        let message = if state.config.is_production() {
            "service is not configured for generation".to_string()
        } else {
            crate::errors::CascadeError::MissingCredentials.to_string()
        };
        return (StatusCode::INTERNAL_SERVER_ERROR, error_body(message)).into_response();
    };

    let request_id = generate_request_id();
    let mut orchestrator = Orchestrator::new(
        request_id.clone(),
        cascade,
        state.store.clone(),
        state.config.recovery.clone(),
    );
    if let Some(options) = body.get("options") {
        match serde_json::from_value::<RequestOptions>(options.clone()) {
            Ok(options) => {
                let mut defaults = GenerationDefaults::default();
                if let Some(max_tokens) = options.max_tokens {
                    defaults.max_tokens = max_tokens;
                }
                if let Some(temperature) = options.temperature {
                    defaults.temperature = temperature;
                }
                orchestrator = orchestrator.with_generation_defaults(defaults);
            }
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    error_body(format!("options inválidas: {e}")),
                )
                    .into_response();
            }
        }
    }
    state.registry.insert(orchestrator.workflow().clone());

    let mut result = orchestrator.run(context).await;
    // Terminal notification has gone out; the run is no longer live.
    state.registry.remove(&request_id);

    if state.config.is_production() && !result.success {
        // Keep the classification, drop raw provider messages.
        for run_error in &mut result.errors {
            run_error.error.message = "internal error".to_string();
            run_error.recovery = None;
        }
    }
    // Handled failures are still a well-formed 200; the body's `success`
    // flag carries the verdict.
    Json(result).into_response()
}

async fn status(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> Response {
    match state.registry.get_state(&request_id) {
        Some(workflow) => Json(serde_json::json!({
            "success": true,
            "workflow": workflow,
        }))
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            error_body("Workflow não encontrado ou já finalizado"),
        )
            .into_response(),
    }
}

async fn progress(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> Response {
    let Some(workflow) = state.registry.get(&request_id) else {
        return (
            StatusCode::NOT_FOUND,
            error_body("Workflow não encontrado ou já finalizado"),
        )
            .into_response();
    };

    let (listener, rx) = ChannelListener::unbounded();
    workflow.subscribe(listener);

    Sse::new(progress_stream(rx))
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// Turns the listener channel into an SSE event stream, ending after
/// the run's terminal notification.
fn progress_stream(
    rx: tokio::sync::mpsc::UnboundedReceiver<crate::workflow::ProgressEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold((rx, false), |(mut rx, done)| async move {
        if done {
            return None;
        }
        let event = rx.recv().await?;
        let terminal = matches!(
            event.event_type,
            ProgressEventType::Complete | ProgressEventType::Failed
        );
        let data = serde_json::to_string(&event).unwrap_or_default();
        let sse = Event::default().event("progress").data(data);
        Some((Ok(sse), (rx, terminal)))
    })
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "lessonflow",
        "timestamp": iso_timestamp(),
        "environment": state.config.environment,
        "credentials": {
            "primary": state.config.has_primary_credentials(),
            "secondary": state.config.has_secondary_credentials(),
        },
        "activeRuns": state.registry.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        sample_activities_json, sample_context, sample_lesson_json, sample_suggestions_json,
        StaticProvider,
    };
    use futures::StreamExt;

    fn fixture_cascade() -> Arc<CascadeClient> {
        let provider = Arc::new(StaticProvider::with_responder("primary", |messages| {
            let prompt = messages
                .last()
                .map(|m| m.content.as_str())
                .unwrap_or_default();
            if prompt.starts_with("Suggest classroom activities") {
                sample_suggestions_json()
            } else if prompt.starts_with("Generate full activities") {
                sample_activities_json()
            } else {
                sample_lesson_json()
            }
        }));
        Arc::new(CascadeClient::new(provider, None, CascadeConfig::default()))
    }

    fn test_state(cascade: Option<Arc<CascadeClient>>) -> Arc<AppState> {
        Arc::new(AppState::with_parts(
            ServiceConfig::default(),
            cascade,
            Arc::new(MemoryArtifactStore::new()),
        ))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_orchestrate_requires_lesson_context() {
        let state = test_state(Some(fixture_cascade()));
        let response = orchestrate(State(state), Json(serde_json::json!({}))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "lessonContext é obrigatório");
    }

    #[tokio::test]
    async fn test_orchestrate_happy_path() {
        let state = test_state(Some(fixture_cascade()));
        let payload = serde_json::json!({
            "lessonContext": serde_json::to_value(sample_context()).unwrap(),
        });
        let response = orchestrate(State(state.clone()), Json(payload)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["lesson"]["title"], "The Water Cycle");
        assert_eq!(body["activities"].as_array().unwrap().len(), 2);
        // The finished run is evicted.
        assert!(state.registry.is_empty());
    }

    #[tokio::test]
    async fn test_orchestrate_rejects_malformed_options() {
        let state = test_state(Some(fixture_cascade()));
        let payload = serde_json::json!({
            "lessonContext": serde_json::to_value(sample_context()).unwrap(),
            "options": { "maxTokens": "lots" },
        });
        let response = orchestrate(State(state), Json(payload)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_orchestrate_without_credentials_is_500() {
        let state = test_state(None);
        let payload = serde_json::json!({
            "lessonContext": serde_json::to_value(sample_context()).unwrap(),
        });
        let response = orchestrate(State(state), Json(payload)).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert!(body["error"]
            .as_str()
            .unwrap()
            .contains("api key is missing"));
    }

    #[tokio::test]
    async fn test_status_unknown_run_is_404() {
        let state = test_state(None);
        let response = status(State(state), Path("missing".to_string())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Workflow não encontrado ou já finalizado");
    }

    #[tokio::test]
    async fn test_status_live_run() {
        let state = test_state(None);
        let wm = Arc::new(crate::workflow::WorkflowManager::new("req-live"));
        state.registry.insert(wm);

        let response = status(State(state), Path("req-live".to_string())).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["workflow"]["requestId"], "req-live");
        assert_eq!(body["workflow"]["progressPercent"], 0);
    }

    #[tokio::test]
    async fn test_progress_stream_ends_after_terminal_event() {
        let (listener, rx) = ChannelListener::unbounded();
        let wm = crate::workflow::WorkflowManager::new("req-sse");
        wm.subscribe(listener);

        wm.start_step(1);
        wm.complete_step(1);
        wm.emit_complete(serde_json::json!({"ok": true}));
        // Events after the terminal one must not be streamed.
        wm.start_step(2);

        let events: Vec<_> = progress_stream(rx).collect().await;
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn test_health_reports_credentials() {
        let state = test_state(None);
        let Json(body) = health(State(state)).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["credentials"]["primary"], false);
        assert_eq!(body["activeRuns"], 0);
    }
}
