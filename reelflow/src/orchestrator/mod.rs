//! Workflow orchestration.
//!
//! The [`WorkflowOrchestrator`] validates a request, then drives fetch,
//! generate-script, produce-media and publish in order. Each stage runs
//! under its [`StagePolicy`](crate::stages::StagePolicy); a failure that
//! escapes the policy ends the workflow with that stage's
//! [`FailureRecord`](crate::core::FailureRecord).

mod builder;
mod guard;
mod validation;
mod workflow;


pub use builder::OrchestratorBuilder;
pub use guard::{InFlightPermit, InFlightRegistry};
pub use validation::{RequestValidator, IDENTITY_PATTERN, MAX_IDENTIFIER_CHARS};
pub use workflow::{DependencyHealth, WorkflowOrchestrator};
