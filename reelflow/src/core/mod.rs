//! Core domain model types for reelflow.
//!
//! This module contains the types carried through a workflow:
//! - Workflow, step and stage status enums
//! - Workflow requests and records
//! - Tagged stage failures
//! - Progress events

mod event;
mod failure;
mod record;
mod status;

pub use event::ProgressEvent;
pub use failure::{FailureRecord, StageResult};
pub use record::{StepRecord, WorkflowRecord, WorkflowRequest};
pub use status::{StageKind, StepStatus, WorkflowStatus};
