//! Event sinks for workflow progress.
//!
//! The orchestrator reports progress through an [`EventSink`] handed to its
//! builder; when none is given it uses a [`NoOpEventSink`].

mod channel;
mod sink;

pub use channel::{ChannelEventSink, DEFAULT_SEND_TIMEOUT};
pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
