//! # Lessonflow
//!
//! An orchestration engine for multi-stage lesson content generation.
//!
//! A run drives seven fixed steps — context intake, lesson content
//! generation, activity suggestion, activity generation, persistence,
//! attachment, finalization — with:
//!
//! - **Gated completion**: a step only completes once its required
//!   sub-phases are marked and its validation checks pass
//! - **Auto recovery**: classified failures retry with exponential
//!   backoff and corrective parameter adjustments
//! - **Model cascade**: ranked primary models with a one-shot secondary
//!   provider fallback
//! - **Live progress**: synchronous listener broadcast, consumable over
//!   server-sent events
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lessonflow::prelude::*;
//!
//! let cascade = Arc::new(CascadeClient::new(provider, None, CascadeConfig::default()));
//! let store = Arc::new(MemoryArtifactStore::new());
//! let orchestrator = Orchestrator::new("req-1", cascade, store, RecoveryConfig::default());
//! let result = orchestrator.run(context).await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cascade;
pub mod config;
pub mod core;
pub mod errors;
pub mod logger;
pub mod pipeline;
pub mod provider;
pub mod recovery;
pub mod registry;
pub mod testing;
pub mod utils;
pub mod validation;
pub mod workflow;

#[cfg(feature = "server")]
pub mod server;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::cascade::{CascadeClient, CascadeConfig, CascadeResponse};
    pub use crate::config::ServiceConfig;
    pub use crate::core::{EventType, PipelineStep, StepEvent, StepStatus, STEP_COUNT};
    pub use crate::errors::{CascadeError, ErrorInfo, ErrorKind, OrchestratorError};
    pub use crate::logger::StepLogger;
    pub use crate::pipeline::{
        Activity, ArtifactStore, GenerationDefaults, Lesson, LessonContext, MemoryArtifactStore,
        Orchestrator, PipelineData, PipelineResult,
    };
    pub use crate::provider::{
        ChatMessage, GenerateOptions, GenerateResponse, SecondaryProvider, TextProvider,
    };
    pub use crate::recovery::{AutoRecoveryEngine, RecoveryConfig, RecoveryContext};
    pub use crate::registry::RunRegistry;
    pub use crate::validation::ValidationGate;
    pub use crate::workflow::{
        ChannelListener, ProgressEvent, ProgressEventType, WorkflowListener, WorkflowManager,
        WorkflowState,
    };
}
