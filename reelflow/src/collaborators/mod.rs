//! Interfaces to the remote services a workflow drives.
//!
//! The orchestrator is the only caller of these traits. Implementations
//! report failures as [`CollaboratorError`] tagged with an error kind; the
//! resilience layer decides what to retry.

use crate::errors::CollaboratorError;
use crate::resilience::{JobHandle, JobStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A fetched source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    /// The identifier the document was fetched by.
    pub identifier: String,
    /// Document title.
    pub title: String,
    /// Plain-text body.
    pub body: String,
    /// When it was fetched.
    pub fetched_at: DateTime<Utc>,
}

impl Content {
    /// Creates content fetched now.
    #[must_use]
    pub fn new(identifier: impl Into<String>, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            title: title.into(),
            body: body.into(),
            fetched_at: Utc::now(),
        }
    }
}

/// A narration script generated from content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    /// Video title.
    pub title: String,
    /// Narration text.
    pub narration: String,
    /// Video description.
    #[serde(default)]
    pub description: String,
    /// Tags for the published video.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Script {
    /// Creates a script with empty description and tags.
    #[must_use]
    pub fn new(title: impl Into<String>, narration: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            narration: narration.into(),
            description: String::new(),
            tags: Vec::new(),
        }
    }
}

/// Reference to rendered media.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    /// Producer-side media id.
    pub id: String,
    /// Where the media can be retrieved.
    pub uri: String,
    /// Local copy, owned by the workflow and removed when it ends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
}

impl MediaRef {
    /// Creates a remote-only media reference.
    #[must_use]
    pub fn new(id: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uri: uri.into(),
            local_path: None,
        }
    }

    /// Attaches a local copy.
    #[must_use]
    pub fn with_local_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_path = Some(path.into());
        self
    }
}

/// Reference to a published video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedRef {
    /// Platform video id.
    pub id: String,
    /// Public URL.
    pub url: String,
    /// When it was published.
    pub published_at: DateTime<Utc>,
}

impl PublishedRef {
    /// Creates a reference published now.
    #[must_use]
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            published_at: Utc::now(),
        }
    }
}

/// Fetches source documents.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Fetches the document named by `identifier`.
    ///
    /// Fails with NotFound, RateLimited or Transient.
    async fn fetch(&self, identifier: &str) -> Result<Content, CollaboratorError>;

    /// Checks that the service is reachable.
    async fn health_check(&self) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

/// Generates narration scripts.
#[async_trait]
pub trait ScriptGenerator: Send + Sync {
    /// Generates a script from `content`, steered by an optional hint.
    ///
    /// Fails with Generation or Transient.
    async fn generate(&self, content: &Content, hint: Option<&str>) -> Result<Script, CollaboratorError>;

    /// Checks that the service is reachable.
    async fn health_check(&self) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

/// Renders media through a remote asynchronous job.
#[async_trait]
pub trait MediaProducer: Send + Sync {
    /// Submits a render job for `script`.
    async fn submit(&self, script: &Script) -> Result<JobHandle, CollaboratorError>;

    /// Queries the status of a submitted job.
    async fn poll(&self, handle: &JobHandle) -> Result<JobStatus<MediaRef>, CollaboratorError>;

    /// Checks that the service is reachable.
    async fn health_check(&self) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

/// Publishes rendered media.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes `media` using the script's metadata.
    ///
    /// Fails with Publish or QuotaExceeded.
    async fn publish(&self, media: &MediaRef, script: &Script) -> Result<PublishedRef, CollaboratorError>;

    /// Checks that the service is reachable.
    async fn health_check(&self) -> Result<(), CollaboratorError> {
        Ok(())
    }
}
