//! Scripted collaborator doubles.
//!
//! Each double answers from a queue of scripted failures first, then falls
//! back to a fixed response. All of them count their calls.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::collaborators::{
    Content, ContentFetcher, MediaProducer, MediaRef, PublishedRef, Publisher, Script,
    ScriptGenerator,
};
use crate::errors::{CollaboratorError, ErrorKind};
use crate::resilience::{JobHandle, JobStatus};

/// Queued failures, a fallback mode and call counting shared by the doubles.
#[derive(Debug)]
struct Responses {
    failures: Mutex<VecDeque<ErrorKind>>,
    always_fail: Option<ErrorKind>,
    calls: AtomicU32,
    healthy: AtomicBool,
}

impl Responses {
    fn new(always_fail: Option<ErrorKind>) -> Self {
        Self {
            failures: Mutex::new(VecDeque::new()),
            always_fail,
            calls: AtomicU32::new(0),
            healthy: AtomicBool::new(true),
        }
    }

    fn queue(&self, kind: ErrorKind, times: u32) {
        let mut failures = self.failures.lock();
        failures.extend(std::iter::repeat(kind).take(times as usize));
    }

    /// Counts a call and returns the scripted failure for it, if any.
    fn next_failure(&self, what: &str) -> Option<CollaboratorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let kind = self.failures.lock().pop_front().or(self.always_fail)?;
        Some(CollaboratorError::new(kind, format!("scripted {what} failure on call {call}")))
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn health(&self, what: &str) -> Result<(), CollaboratorError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CollaboratorError::transient(format!("{what} unreachable")))
        }
    }
}

/// A [`ContentFetcher`] that returns canned content.
#[derive(Debug)]
pub struct ScriptedFetcher {
    responses: Responses,
}

impl ScriptedFetcher {
    /// Creates a fetcher that always succeeds.
    #[must_use]
    pub fn succeeding() -> Self {
        Self {
            responses: Responses::new(None),
        }
    }

    /// Creates a fetcher that always fails with `kind`.
    #[must_use]
    pub fn failing(kind: ErrorKind) -> Self {
        Self {
            responses: Responses::new(Some(kind)),
        }
    }

    /// Fails the next `times` calls with `kind` before the fallback applies.
    #[must_use]
    pub fn fail_first(self, kind: ErrorKind, times: u32) -> Self {
        self.responses.queue(kind, times);
        self
    }

    /// Makes health checks fail.
    pub fn set_healthy(&self, healthy: bool) {
        self.responses.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Returns the number of fetch calls.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.responses.calls()
    }
}

#[async_trait]
impl ContentFetcher for ScriptedFetcher {
    async fn fetch(&self, identifier: &str) -> Result<Content, CollaboratorError> {
        if let Some(error) = self.responses.next_failure("fetch") {
            return Err(error);
        }
        Ok(Content::new(
            identifier,
            format!("Title of {identifier}"),
            "Body text of the document.",
        ))
    }

    async fn health_check(&self) -> Result<(), CollaboratorError> {
        self.responses.health("content")
    }
}

/// A [`ScriptGenerator`] that narrates the content title.
#[derive(Debug)]
pub struct ScriptedGenerator {
    responses: Responses,
    hints: Mutex<Vec<Option<String>>>,
}

impl ScriptedGenerator {
    /// Creates a generator that always succeeds.
    #[must_use]
    pub fn succeeding() -> Self {
        Self {
            responses: Responses::new(None),
            hints: Mutex::new(Vec::new()),
        }
    }

    /// Creates a generator that always fails with `kind`.
    #[must_use]
    pub fn failing(kind: ErrorKind) -> Self {
        Self {
            responses: Responses::new(Some(kind)),
            hints: Mutex::new(Vec::new()),
        }
    }

    /// Fails the next `times` calls with `kind` before the fallback applies.
    #[must_use]
    pub fn fail_first(self, kind: ErrorKind, times: u32) -> Self {
        self.responses.queue(kind, times);
        self
    }

    /// Returns the number of generate calls.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.responses.calls()
    }

    /// Returns the hints received, in call order.
    #[must_use]
    pub fn hints(&self) -> Vec<Option<String>> {
        self.hints.lock().clone()
    }
}

#[async_trait]
impl ScriptGenerator for ScriptedGenerator {
    async fn generate(&self, content: &Content, hint: Option<&str>) -> Result<Script, CollaboratorError> {
        self.hints.lock().push(hint.map(str::to_string));
        if let Some(error) = self.responses.next_failure("generate") {
            return Err(error);
        }
        let mut script = Script::new(&content.title, format!("Today we look at {}.", content.title));
        script.tags = vec!["reelflow".to_string()];
        Ok(script)
    }

    async fn health_check(&self) -> Result<(), CollaboratorError> {
        self.responses.health("script")
    }
}

/// One scripted answer to a render status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStep {
    /// The job is still rendering.
    Running,
    /// The job finished with the producer's media.
    Succeeded,
    /// The job failed with a message.
    Failed(String),
    /// The status query itself failed.
    Error(ErrorKind),
}

/// A [`MediaProducer`] whose jobs follow scripted poll sequences.
///
/// Job `n` follows the `n`th queued sequence, or the default one once the
/// queue is empty. The last step of a sequence repeats forever.
#[derive(Debug)]
pub struct ScriptedProducer {
    media_id: String,
    local_path: Option<PathBuf>,
    submissions: Responses,
    queued_jobs: Mutex<VecDeque<Vec<PollStep>>>,
    default_job: Vec<PollStep>,
    jobs: Mutex<HashMap<String, (Vec<PollStep>, usize)>>,
    polls: AtomicU32,
}

impl ScriptedProducer {
    /// Creates a producer whose jobs render `media_id` after one running poll.
    #[must_use]
    pub fn rendering(media_id: impl Into<String>) -> Self {
        Self::with_job(media_id, vec![PollStep::Running, PollStep::Succeeded])
    }

    /// Creates a producer whose jobs never leave the running phase.
    #[must_use]
    pub fn never_finishing() -> Self {
        Self::with_job("never", vec![PollStep::Running])
    }

    /// Creates a producer whose jobs follow `steps`.
    #[must_use]
    pub fn with_job(media_id: impl Into<String>, steps: Vec<PollStep>) -> Self {
        Self {
            media_id: media_id.into(),
            local_path: None,
            submissions: Responses::new(None),
            queued_jobs: Mutex::new(VecDeque::new()),
            default_job: steps,
            jobs: Mutex::new(HashMap::new()),
            polls: AtomicU32::new(0),
        }
    }

    /// Queues a sequence for the next submitted job.
    #[must_use]
    pub fn then_job(self, steps: Vec<PollStep>) -> Self {
        self.queued_jobs.lock().push_back(steps);
        self
    }

    /// Fails the next `times` submissions with `kind`.
    #[must_use]
    pub fn fail_submissions(self, kind: ErrorKind, times: u32) -> Self {
        self.submissions.queue(kind, times);
        self
    }

    /// Reports `path` as the local copy of rendered media.
    #[must_use]
    pub fn with_local_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_path = Some(path.into());
        self
    }

    /// Returns the number of submit calls.
    #[must_use]
    pub fn submissions(&self) -> u32 {
        self.submissions.calls()
    }

    /// Returns the number of status queries.
    #[must_use]
    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }

    fn media(&self) -> MediaRef {
        let media = MediaRef::new(&self.media_id, format!("https://media.example/{}", self.media_id));
        match &self.local_path {
            Some(path) => media.with_local_path(path),
            None => media,
        }
    }
}

#[async_trait]
impl MediaProducer for ScriptedProducer {
    async fn submit(&self, _script: &Script) -> Result<JobHandle, CollaboratorError> {
        if let Some(error) = self.submissions.next_failure("submit") {
            return Err(error);
        }
        let job_id = format!("job-{}", self.submissions.calls());
        let steps = self
            .queued_jobs
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_job.clone());
        self.jobs.lock().insert(job_id.clone(), (steps, 0));
        Ok(JobHandle::new(job_id))
    }

    async fn poll(&self, handle: &JobHandle) -> Result<JobStatus<MediaRef>, CollaboratorError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let step = {
            let mut jobs = self.jobs.lock();
            let Some((steps, cursor)) = jobs.get_mut(handle.id()) else {
                return Err(CollaboratorError::not_found(format!("unknown job {}", handle.id())));
            };
            let step = steps
                .get(*cursor)
                .or_else(|| steps.last())
                .cloned()
                .unwrap_or(PollStep::Running);
            *cursor += 1;
            step
        };

        match step {
            PollStep::Running => Ok(JobStatus::Running),
            PollStep::Succeeded => Ok(JobStatus::Succeeded(self.media())),
            PollStep::Failed(message) => Ok(JobStatus::Failed(message)),
            PollStep::Error(kind) => Err(CollaboratorError::new(kind, "scripted status query failure")),
        }
    }
}

/// A [`Publisher`] that returns a fixed video id.
#[derive(Debug)]
pub struct ScriptedPublisher {
    video_id: String,
    responses: Responses,
    published: Mutex<Vec<String>>,
}

impl ScriptedPublisher {
    /// Creates a publisher that always publishes as `video_id`.
    #[must_use]
    pub fn succeeding(video_id: impl Into<String>) -> Self {
        Self {
            video_id: video_id.into(),
            responses: Responses::new(None),
            published: Mutex::new(Vec::new()),
        }
    }

    /// Creates a publisher that always fails with `kind`.
    #[must_use]
    pub fn failing(kind: ErrorKind) -> Self {
        Self {
            video_id: String::new(),
            responses: Responses::new(Some(kind)),
            published: Mutex::new(Vec::new()),
        }
    }

    /// Fails the next `times` calls with `kind` before the fallback applies.
    #[must_use]
    pub fn fail_first(self, kind: ErrorKind, times: u32) -> Self {
        self.responses.queue(kind, times);
        self
    }

    /// Returns the number of publish calls.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.responses.calls()
    }

    /// Returns the ids of media published so far.
    #[must_use]
    pub fn published_media(&self) -> Vec<String> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl Publisher for ScriptedPublisher {
    async fn publish(&self, media: &MediaRef, _script: &Script) -> Result<PublishedRef, CollaboratorError> {
        if let Some(error) = self.responses.next_failure("publish") {
            return Err(error);
        }
        self.published.lock().push(media.id.clone());
        Ok(PublishedRef::new(
            &self.video_id,
            format!("https://video.example/watch?v={}", self.video_id),
        ))
    }

    async fn health_check(&self) -> Result<(), CollaboratorError> {
        self.responses.health("publisher")
    }
}
