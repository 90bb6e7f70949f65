//! Cooperative cancellation and scoped cleanup.
//!
//! This module provides:
//! - CancellationToken for cooperative cancellation of a workflow
//! - ArtifactScope for LIFO removal of temporary artifacts on every exit path

mod cleanup;
mod token;

pub use cleanup::{ArtifactScope, CleanupFailure};
pub use token::CancellationToken;
