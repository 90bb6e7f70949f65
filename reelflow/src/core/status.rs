//! Workflow and stage status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The stages of a workflow, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StageKind {
    /// Input validation before any remote call.
    #[serde(rename = "validate")]
    Validate,
    /// Fetch the source document.
    #[serde(rename = "fetch")]
    Fetch,
    /// Generate a narration script from the content.
    #[serde(rename = "generate-script")]
    GenerateScript,
    /// Submit and await the remote render job.
    #[serde(rename = "produce-media")]
    ProduceMedia,
    /// Publish the rendered media.
    #[serde(rename = "publish")]
    Publish,
}

impl StageKind {
    /// The remote stages in execution order.
    pub const PIPELINE: [Self; 4] = [
        Self::Fetch,
        Self::GenerateScript,
        Self::ProduceMedia,
        Self::Publish,
    ];

    /// Returns the stage name used in records and events.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Fetch => "fetch",
            Self::GenerateScript => "generate-script",
            Self::ProduceMedia => "produce-media",
            Self::Publish => "publish",
        }
    }

    /// Returns the collaborator this stage calls, if any.
    #[must_use]
    pub fn dependency(self) -> Option<&'static str> {
        match self {
            Self::Validate => None,
            Self::Fetch => Some("content"),
            Self::GenerateScript => Some("script"),
            Self::ProduceMedia => Some("media"),
            Self::Publish => Some("publisher"),
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The status of a whole workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Created, not started.
    #[default]
    Pending,
    /// Stages are executing.
    Running,
    /// Every stage succeeded.
    Succeeded,
    /// A stage failed or the workflow was cancelled.
    Failed,
}

impl WorkflowStatus {
    /// Returns true if the status is terminal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Returns true if moving to `next` is allowed.
    ///
    /// Pending -> Running -> {Succeeded | Failed}; Pending may also fail
    /// directly on rejected input.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Failed)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
        )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// The status of one step in a workflow record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// The step is executing.
    Running,
    /// The step completed.
    Succeeded,
    /// The step failed.
    Failed,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
