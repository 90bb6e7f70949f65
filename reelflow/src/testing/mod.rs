//! Test doubles for workflow collaborators.
//!
//! The scripted doubles here let tests describe a remote service as a
//! sequence of outcomes (fail twice, then succeed; run forever; fail the
//! first render job) without network access.

mod mocks;

pub use mocks::{PollStep, ScriptedFetcher, ScriptedGenerator, ScriptedProducer, ScriptedPublisher};
