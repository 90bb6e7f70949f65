//! The workflow orchestrator.

use super::guard::InFlightRegistry;
use super::validation::RequestValidator;
use crate::cancellation::{ArtifactScope, CancellationToken};
use crate::collaborators::{
    ContentFetcher, MediaProducer, MediaRef, Publisher, Script, ScriptGenerator,
};
use crate::config::ReelflowConfig;
use crate::core::{
    FailureRecord, ProgressEvent, StageKind, StageResult, WorkflowRecord, WorkflowRequest,
    WorkflowStatus,
};
use crate::errors::{BusyError, CollaboratorError, ErrorKind, ReelflowError};
use crate::events::EventSink;
use crate::observability::{stage_span, workflow_span, workflow_summary, SpanTimer};
use crate::resilience::{
    BreakerRegistry, BreakerSnapshot, CircuitState, JobHandle, JobStatus, PollingWaiter,
    RetryNotice, StatusQuery, TimeoutGuard,
};
use crate::stages::StageRunner;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Instrument};

/// Slack added to the polling deadline for the outer session guard.
const SESSION_GRACE: Duration = Duration::from_secs(5);

/// How far a run goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    /// Fetch through publish.
    Full,
    /// Fetch and generate-script only.
    ScriptOnly,
}

/// Health of one collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyHealth {
    /// Dependency name ("content", "script", "media", "publisher").
    pub dependency: String,
    /// Whether the health check passed in time.
    pub healthy: bool,
    /// Why the check failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Current breaker state for the dependency.
    pub circuit: CircuitState,
}

/// One runner per remote stage.
#[derive(Debug, Clone)]
pub(super) struct StageRunners {
    pub(super) fetch: StageRunner,
    pub(super) script: StageRunner,
    pub(super) media: StageRunner,
    pub(super) publish: StageRunner,
}

impl StageRunners {
    pub(super) fn new(config: &ReelflowConfig, breakers: &BreakerRegistry) -> Self {
        let runner = |stage| StageRunner::new(stage, config.policy(stage), breakers);
        Self {
            fetch: runner(StageKind::Fetch),
            script: runner(StageKind::GenerateScript),
            media: runner(StageKind::ProduceMedia),
            publish: runner(StageKind::Publish),
        }
    }

    fn all(&self) -> [&StageRunner; 4] {
        [&self.fetch, &self.script, &self.media, &self.publish]
    }
}

/// Sequences fetch, generate-script, produce-media and publish for one
/// request at a time per identity.
///
/// The orchestrator is the only component that calls into collaborators.
/// Every run returns a terminal [`WorkflowRecord`]; the only error surfaced
/// to the caller is [`BusyError`].
pub struct WorkflowOrchestrator {
    pub(super) config: ReelflowConfig,
    pub(super) fetcher: Arc<dyn ContentFetcher>,
    pub(super) generator: Arc<dyn ScriptGenerator>,
    pub(super) producer: Arc<dyn MediaProducer>,
    pub(super) publisher: Arc<dyn Publisher>,
    pub(super) events: Arc<dyn EventSink>,
    pub(super) breakers: Arc<BreakerRegistry>,
    pub(super) in_flight: Arc<InFlightRegistry>,
    pub(super) validator: RequestValidator,
    pub(super) runners: StageRunners,
    pub(super) waiter: PollingWaiter,
}

impl WorkflowOrchestrator {
    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ReelflowConfig {
        &self.config
    }

    /// Returns the breaker registry this orchestrator reports to.
    #[must_use]
    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    /// Runs the full workflow for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`BusyError`] immediately if the identity already has a
    /// workflow in flight. Every other outcome is a terminal record.
    pub async fn run(&self, request: WorkflowRequest) -> Result<WorkflowRecord, BusyError> {
        self.start(request, RunMode::Full).await
    }

    /// Runs fetch and generate-script only, for previewing a script.
    ///
    /// # Errors
    ///
    /// Returns [`BusyError`] if the identity already has a workflow in flight.
    pub async fn run_script_only(&self, request: WorkflowRequest) -> Result<WorkflowRecord, BusyError> {
        self.start(request, RunMode::ScriptOnly).await
    }

    /// Cancels the workflow in flight for `identity`.
    ///
    /// Returns false if nothing is running for it.
    pub fn cancel(&self, identity: &str) -> bool {
        self.in_flight.cancel(identity, "cancelled by caller")
    }

    /// Returns true if `identity` has a workflow in flight.
    #[must_use]
    pub fn is_running(&self, identity: &str) -> bool {
        self.in_flight.is_running(identity)
    }

    /// Snapshots the breakers guarding this orchestrator's dependencies.
    #[must_use]
    pub fn breaker_states(&self) -> Vec<BreakerSnapshot> {
        self.runners.all().iter().map(|r| r.breaker().snapshot()).collect()
    }

    /// Health-checks every collaborator concurrently.
    pub async fn verify_dependencies(&self) -> Vec<DependencyHealth> {
        let guard = TimeoutGuard::fast();
        let guard = &guard;
        let checks = [
            (&self.runners.fetch, self.fetcher.health_check()),
            (&self.runners.script, self.generator.health_check()),
            (&self.runners.media, self.producer.health_check()),
            (&self.runners.publish, self.publisher.health_check()),
        ];

        futures::future::join_all(checks.into_iter().map(|(runner, check)| async move {
            let dependency = runner.breaker().name().to_string();
            let error = match guard.wrap(&dependency, check).await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(e) => Some(e.to_string()),
            };
            if let Some(error) = &error {
                warn!(dependency = %dependency, error = %error, "Dependency unhealthy");
            }
            DependencyHealth {
                dependency,
                healthy: error.is_none(),
                error,
                circuit: runner.breaker().state(),
            }
        }))
        .await
    }

    async fn start(&self, request: WorkflowRequest, mode: RunMode) -> Result<WorkflowRecord, BusyError> {
        let permit = self.in_flight.acquire(&request.identity)?;
        let record = WorkflowRecord::new(&request);
        let span = workflow_span(record.workflow_id, &record.identity);
        Ok(self
            .execute(record, &request, permit.token(), mode)
            .instrument(span)
            .await)
    }

    async fn execute(
        &self,
        mut record: WorkflowRecord,
        request: &WorkflowRequest,
        cancel: &CancellationToken,
        mode: RunMode,
    ) -> WorkflowRecord {
        let workflow_id = record.workflow_id;
        info!(identifier = %record.identifier, ?mode, "Workflow started");
        self.events
            .emit(&ProgressEvent::workflow_started(workflow_id, &record.identity, &record.identifier))
            .await;

        let result = match self.validate(&mut record, request).await {
            Ok(()) => {
                record.transition(WorkflowStatus::Running);
                let scope = if self.config.keep_local_artifacts {
                    ArtifactScope::keeping_artifacts()
                } else {
                    ArtifactScope::new()
                };
                let scratch = self.scratch_dir(&scope, &record).await;
                let result = self
                    .drive(&mut record, &scope, scratch.as_deref(), cancel, mode)
                    .await;
                for failure in scope.release() {
                    warn!(path = %failure.path.display(), error = %failure.message, "Artifact cleanup failed");
                }
                result
            }
            Err(failure) => Err(failure),
        };

        match result {
            Ok(()) => {
                record.transition(WorkflowStatus::Succeeded);
                let url = record.published.as_ref().map(|p| p.url.as_str());
                self.events
                    .emit(&ProgressEvent::workflow_completed(workflow_id, url, record.duration_ms()))
                    .await;
            }
            Err(failure) => {
                if failure.is_cancellation() {
                    info!(stage = failure.stage.name(), "Workflow cancelled");
                }
                let event = ProgressEvent::workflow_failed(workflow_id, &failure);
                record.fail(failure);
                self.events.emit(&event).await;
            }
        }

        info!(summary = %workflow_summary(&record), status = %record.status, "Workflow finished");
        record
    }

    async fn validate(&self, record: &mut WorkflowRecord, request: &WorkflowRequest) -> StageResult<()> {
        let stage = StageKind::Validate;
        record.begin_step(stage);
        self.events
            .emit(&ProgressEvent::stage_entered(record.workflow_id, stage))
            .await;
        let result = self
            .validator
            .validate(request)
            .map_err(|e| FailureRecord::from_error(stage, &e.into(), 1));
        self.settle(record, stage, result, 1, 0.0).await
    }

    async fn drive(
        &self,
        record: &mut WorkflowRecord,
        scope: &ArtifactScope,
        scratch: Option<&Path>,
        cancel: &CancellationToken,
        mode: RunMode,
    ) -> StageResult<()> {
        let fetcher = &self.fetcher;
        let identifier = record.identifier.clone();
        let identifier = identifier.as_str();
        let content = self
            .run_stage(record, &self.runners.fetch, cancel, move |_| async move {
                fetcher
                    .fetch(identifier)
                    .await
                    .map_err(|e| tagged(e, StageKind::Fetch))
            })
            .await?;
        record.content = Some(content.clone());

        let generator = &self.generator;
        let hint = record.hint.clone();
        let hint = hint.as_deref();
        let content_ref = &content;
        let script = self
            .run_stage(record, &self.runners.script, cancel, move |_| async move {
                generator
                    .generate(content_ref, hint)
                    .await
                    .map_err(|e| tagged(e, StageKind::GenerateScript))
            })
            .await?;
        record.script = Some(script.clone());
        if let Some(dir) = scratch {
            save_script(dir, &script).await;
        }
        if mode == RunMode::ScriptOnly {
            return Ok(());
        }

        let media = self.produce_media(record, &script, scope, cancel).await?;
        record.media = Some(media.clone());

        let publisher = &self.publisher;
        let media_ref = &media;
        let script_ref = &script;
        let published = self
            .run_stage(record, &self.runners.publish, cancel, move |_| async move {
                publisher
                    .publish(media_ref, script_ref)
                    .await
                    .map_err(|e| tagged(e, StageKind::Publish))
            })
            .await?;

        record.published = Some(published);
        Ok(())
    }

    /// Runs a single-call stage and records its step.
    async fn run_stage<T, F, Fut>(
        &self,
        record: &mut WorkflowRecord,
        runner: &StageRunner,
        cancel: &CancellationToken,
        operation: F,
    ) -> StageResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ReelflowError>>,
    {
        let stage = runner.stage();
        record.begin_step(stage);
        self.events
            .emit(&ProgressEvent::stage_entered(record.workflow_id, stage))
            .await;

        let outcome = runner
            .run(cancel, self.retry_notifier(record.workflow_id, stage), operation)
            .await;
        self.settle(record, stage, outcome.result, outcome.attempts, outcome.duration_ms)
            .await
    }

    /// Submits a render job and waits for it, all under one breaker permit.
    async fn produce_media(
        &self,
        record: &mut WorkflowRecord,
        script: &Script,
        scope: &ArtifactScope,
        cancel: &CancellationToken,
    ) -> StageResult<MediaRef> {
        let runner = &self.runners.media;
        let stage = runner.stage();
        let workflow_id = record.workflow_id;
        record.begin_step(stage);
        self.events
            .emit(&ProgressEvent::stage_entered(workflow_id, stage))
            .await;

        let timer = SpanTimer::start(stage.name());
        let (result, attempts) = async {
            let permit = match runner.admit() {
                Ok(permit) => permit,
                Err(error) => return (Err(error), 0),
            };
            let (result, attempts) = self.render(workflow_id, runner, script, cancel).await;
            permit.record(&result);
            (result, attempts)
        }
        .instrument(stage_span(stage.name(), stage.dependency()))
        .await;

        let result = result
            .map(|media| {
                if let Some(path) = &media.local_path {
                    scope.register(path);
                }
                media
            })
            .map_err(|e| runner.failure(&e, attempts));
        self.settle(record, stage, result, attempts, timer.finish())
            .await
    }

    /// Submission retries and polling sessions, resubmitting failed jobs
    /// while submissions remain. Returns the result and attempts made.
    async fn render(
        &self,
        workflow_id: uuid::Uuid,
        runner: &StageRunner,
        script: &Script,
        cancel: &CancellationToken,
    ) -> (Result<MediaRef, ReelflowError>, u32) {
        let stage = runner.stage();
        let max_submissions = self.config.media.max_job_submissions.max(1);
        let polling = self.waiter.config();
        let session = TimeoutGuard::new(polling.deadline() + polling.query_timeout() + SESSION_GRACE);
        let status = ProducerStatus {
            producer: self.producer.as_ref(),
        };
        let producer = &self.producer;
        let events = &self.events;
        let mut attempts = 0;
        let mut submission = 1;

        loop {
            let submitted = runner
                .attempts(cancel, self.retry_notifier(workflow_id, stage), move |_| async move {
                    producer
                        .submit(script)
                        .await
                        .map_err(|e| tagged(e, StageKind::ProduceMedia))
                })
                .await;
            attempts += submitted.attempt_count();
            let handle = match submitted.result {
                Ok(handle) => handle,
                Err(error) => return (Err(error), attempts),
            };

            let job_id = handle.id().to_string();
            info!(job_id = %job_id, submission, "Render job submitted");
            events
                .emit(&ProgressEvent::job_submitted(workflow_id, &job_id, submission))
                .await;

            let result = session
                .run_session(&format!("render job {job_id}"), async {
                    let report = self
                        .waiter
                        .wait(handle, &status, cancel, |tick| {
                            events.try_emit(&ProgressEvent::job_poll_tick(
                                workflow_id,
                                tick.job_id,
                                tick.attempt,
                                tick.elapsed,
                                tick.phase,
                            ));
                        })
                        .await;
                    report.result
                })
                .await;

            match result {
                Err(error) if error.kind() == ErrorKind::JobFailed && submission < max_submissions => {
                    submission += 1;
                    warn!(job_id = %job_id, submission, error = %error, "Render job failed, resubmitting");
                    events
                        .emit(&ProgressEvent::job_resubmitted(workflow_id, &job_id, submission))
                        .await;
                }
                other => return (other, attempts),
            }
        }
    }

    /// Records a stage's outcome on the step and emits its event.
    async fn settle<T>(
        &self,
        record: &mut WorkflowRecord,
        stage: StageKind,
        result: StageResult<T>,
        attempts: u32,
        duration_ms: f64,
    ) -> StageResult<T> {
        match result {
            Ok(value) => {
                record.complete_step(stage, attempts);
                debug!(stage = stage.name(), attempts, duration_ms, "Stage succeeded");
                self.events
                    .emit(&ProgressEvent::stage_succeeded(record.workflow_id, stage, attempts, duration_ms))
                    .await;
                Ok(value)
            }
            Err(failure) => {
                warn!(
                    stage = stage.name(),
                    kind = %failure.kind,
                    attempts = failure.attempts,
                    error = %failure.message,
                    "Stage failed"
                );
                self.events
                    .emit(&ProgressEvent::stage_failed(record.workflow_id, &failure))
                    .await;
                Err(failure)
            }
        }
    }

    fn retry_notifier(
        &self,
        workflow_id: uuid::Uuid,
        stage: StageKind,
    ) -> impl FnMut(RetryNotice<'_>) + '_ {
        move |notice| {
            self.events.try_emit(&ProgressEvent::stage_retried(
                workflow_id,
                stage,
                notice.failed_attempt,
                notice.delay,
                &notice.error.to_string(),
            ));
        }
    }

    async fn scratch_dir(&self, scope: &ArtifactScope, record: &WorkflowRecord) -> Option<PathBuf> {
        let path = self.config.temp_dir.join(record.workflow_id.to_string());
        match scope.create_dir(&path).await {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not create scratch directory");
                None
            }
        }
    }
}

impl std::fmt::Debug for WorkflowOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowOrchestrator")
            .field("in_flight", &self.in_flight.len())
            .field("runners", &self.runners)
            .finish_non_exhaustive()
    }
}

/// Adapts a [`MediaProducer`] to the polling waiter.
struct ProducerStatus<'a> {
    producer: &'a dyn MediaProducer,
}

#[async_trait]
impl StatusQuery<MediaRef> for ProducerStatus<'_> {
    async fn query(&self, handle: &JobHandle) -> Result<JobStatus<MediaRef>, ReelflowError> {
        self.producer
            .poll(handle)
            .await
            .map_err(|e| tagged(e, StageKind::ProduceMedia))
    }
}

/// Attributes an untagged collaborator error to the stage's dependency.
fn tagged(error: CollaboratorError, stage: StageKind) -> ReelflowError {
    match stage.dependency() {
        Some(dependency) if error.dependency.is_none() => error.with_dependency(dependency).into(),
        _ => error.into(),
    }
}

async fn save_script(dir: &Path, script: &Script) {
    let path = dir.join("script.json");
    let written = match serde_json::to_vec_pretty(script) {
        Ok(bytes) => tokio::fs::write(&path, bytes).await,
        Err(e) => Err(std::io::Error::from(e)),
    };
    if let Err(e) = written {
        warn!(path = %path.display(), error = %e, "Could not save script");
    }
}
