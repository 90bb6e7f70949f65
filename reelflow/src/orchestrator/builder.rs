//! Builder that wires collaborators into a [`WorkflowOrchestrator`].

use super::guard::InFlightRegistry;
use super::validation::RequestValidator;
use super::workflow::{StageRunners, WorkflowOrchestrator};
use crate::collaborators::{ContentFetcher, MediaProducer, Publisher, ScriptGenerator};
use crate::config::ReelflowConfig;
use crate::errors::{ConfigurationError, ReelflowError};
use crate::events::{EventSink, NoOpEventSink};
use crate::resilience::{BreakerRegistry, PollingWaiter};
use std::sync::Arc;
use tracing::info;

/// Builder for a validated [`WorkflowOrchestrator`].
///
/// All four collaborators are required. The event sink defaults to a
/// [`NoOpEventSink`] and breakers default to the process-wide registry.
#[derive(Default)]
pub struct OrchestratorBuilder {
    config: ReelflowConfig,
    fetcher: Option<Arc<dyn ContentFetcher>>,
    generator: Option<Arc<dyn ScriptGenerator>>,
    producer: Option<Arc<dyn MediaProducer>>,
    publisher: Option<Arc<dyn Publisher>>,
    events: Option<Arc<dyn EventSink>>,
    breakers: Option<Arc<BreakerRegistry>>,
}

impl OrchestratorBuilder {
    /// Creates a builder with the given configuration.
    #[must_use]
    pub fn new(config: ReelflowConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Sets the content fetcher.
    #[must_use]
    pub fn fetcher(mut self, fetcher: Arc<dyn ContentFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Sets the script generator.
    #[must_use]
    pub fn generator(mut self, generator: Arc<dyn ScriptGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Sets the media producer.
    #[must_use]
    pub fn producer(mut self, producer: Arc<dyn MediaProducer>) -> Self {
        self.producer = Some(producer);
        self
    }

    /// Sets the publisher.
    #[must_use]
    pub fn publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Sets the sink that receives progress events.
    #[must_use]
    pub fn event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// Uses `breakers` instead of the process-wide registry.
    #[must_use]
    pub fn breaker_registry(mut self, breakers: Arc<BreakerRegistry>) -> Self {
        self.breakers = Some(breakers);
        self
    }

    /// Validates the configuration and builds the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a setting is invalid or a
    /// collaborator is missing.
    pub fn build(self) -> Result<WorkflowOrchestrator, ReelflowError> {
        self.config.validate()?;

        let fetcher = required(self.fetcher, "fetcher")?;
        let generator = required(self.generator, "generator")?;
        let producer = required(self.producer, "producer")?;
        let publisher = required(self.publisher, "publisher")?;
        let events = self.events.unwrap_or_else(|| Arc::new(NoOpEventSink));
        let breakers = self.breakers.unwrap_or_else(BreakerRegistry::global);

        let runners = StageRunners::new(&self.config, &breakers);
        info!(
            poll_deadline_secs = self.config.polling.deadline_secs,
            max_job_submissions = self.config.media.max_job_submissions,
            "Orchestrator ready"
        );

        Ok(WorkflowOrchestrator {
            validator: RequestValidator::new(self.config.max_hint_chars)?,
            waiter: PollingWaiter::new(self.config.polling.clone()),
            config: self.config,
            fetcher,
            generator,
            producer,
            publisher,
            events,
            breakers,
            in_flight: Arc::new(InFlightRegistry::new()),
            runners,
        })
    }
}

impl std::fmt::Debug for OrchestratorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorBuilder")
            .field("config", &self.config)
            .field("fetcher", &self.fetcher.is_some())
            .field("generator", &self.generator.is_some())
            .field("producer", &self.producer.is_some())
            .field("publisher", &self.publisher.is_some())
            .finish_non_exhaustive()
    }
}

fn required<T: ?Sized>(value: Option<Arc<T>>, field: &str) -> Result<Arc<T>, ConfigurationError> {
    value.ok_or_else(|| ConfigurationError::new(field, "collaborator not configured"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedFetcher, ScriptedGenerator, ScriptedProducer, ScriptedPublisher};

    fn complete(config: ReelflowConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
            .fetcher(Arc::new(ScriptedFetcher::succeeding()))
            .generator(Arc::new(ScriptedGenerator::succeeding()))
            .producer(Arc::new(ScriptedProducer::rendering("m1")))
            .publisher(Arc::new(ScriptedPublisher::succeeding("yt1")))
            .breaker_registry(Arc::new(BreakerRegistry::new()))
    }

    #[test]
    fn test_builds_with_all_collaborators() {
        let orchestrator = complete(ReelflowConfig::default()).build().unwrap();
        assert_eq!(orchestrator.breaker_states().len(), 4);
        assert!(!orchestrator.is_running("anyone"));
    }

    #[test]
    fn test_missing_collaborator_is_configuration_error() {
        let err = OrchestratorBuilder::new(ReelflowConfig::default())
            .fetcher(Arc::new(ScriptedFetcher::succeeding()))
            .build()
            .unwrap_err();
        match err {
            ReelflowError::Configuration(e) => assert_eq!(e.field, "generator"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = ReelflowConfig::default();
        config.polling.deadline_secs = 0;
        let err = complete(config).build().unwrap_err();
        assert!(matches!(err, ReelflowError::Configuration(_)));
    }

    #[test]
    fn test_defaults_to_global_registry() {
        let orchestrator = OrchestratorBuilder::new(ReelflowConfig::default())
            .fetcher(Arc::new(ScriptedFetcher::succeeding()))
            .generator(Arc::new(ScriptedGenerator::succeeding()))
            .producer(Arc::new(ScriptedProducer::rendering("m1")))
            .publisher(Arc::new(ScriptedPublisher::succeeding("yt1")))
            .build()
            .unwrap();
        assert!(Arc::ptr_eq(orchestrator.breakers(), &BreakerRegistry::global()));
    }
}
