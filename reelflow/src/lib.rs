//! # Reelflow
//!
//! Resilient orchestration of a document-to-video publishing pipeline.
//!
//! A workflow turns a source document identifier into a published video by
//! driving four remote services in sequence: fetch, generate-script,
//! produce-media and publish. Reelflow provides:
//!
//! - **Retry with backoff**: a pure decision function plus an async retry loop
//! - **Circuit breaking**: per-dependency health gates in a shared registry
//! - **Deadlines**: timeout guards per attempt and per polling session
//! - **Job polling**: an explicit state machine for long-running render jobs
//! - **Orchestration**: stage sequencing with tagged failures, a per-identity
//!   in-flight guard, progress events and scoped artifact cleanup
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use reelflow::prelude::*;
//!
//! let orchestrator = OrchestratorBuilder::new(ReelflowConfig::default().with_env_overrides()?)
//!     .fetcher(Arc::new(MyFetcher::new()))
//!     .generator(Arc::new(MyGenerator::new()))
//!     .producer(Arc::new(MyRenderer::new()))
//!     .publisher(Arc::new(MyPublisher::new()))
//!     .event_sink(Arc::new(LoggingEventSink::default()))
//!     .build()?;
//!
//! let record = orchestrator.run(WorkflowRequest::new("user-1", "https://example.com/post")).await?;
//! println!("{}", record.status);
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
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod cancellation;
pub mod collaborators;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod orchestrator;
pub mod resilience;
pub mod stages;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{ArtifactScope, CancellationToken};
    pub use crate::collaborators::{
        Content, ContentFetcher, MediaProducer, MediaRef, PublishedRef, Publisher, Script,
        ScriptGenerator,
    };
    pub use crate::config::ReelflowConfig;
    pub use crate::core::{
        FailureRecord, ProgressEvent, StageKind, StageResult, WorkflowRecord, WorkflowRequest,
        WorkflowStatus,
    };
    pub use crate::errors::{
        BusyError, CollaboratorError, ConfigurationError, ErrorKind, ReelflowError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::{init_logging, LogFormat};
    pub use crate::orchestrator::{OrchestratorBuilder, WorkflowOrchestrator};
    pub use crate::resilience::{
        BreakerConfig, BreakerRegistry, CircuitBreaker, CircuitState, JobHandle, JobStatus,
        PollingConfig, PollingWaiter, RetryConfig, RetryPolicy, TimeoutGuard,
    };
    pub use crate::stages::StagePolicy;
}
