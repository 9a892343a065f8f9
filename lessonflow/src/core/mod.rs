//! Core domain types: step status, events, and the fixed step table.

mod event;
mod status;
mod step;

pub use event::{EventType, StepEvent};
pub use status::StepStatus;
pub use step::{
    required_phases, step_name, CheckResult, PipelineStep, Step, SubPhase, STEP_COUNT,
};
