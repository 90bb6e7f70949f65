//! Observability utilities.

mod logging;
mod summary;
mod timer;

pub use logging::{build_filter, init_logging, LogFormat};
pub use summary::workflow_summary;
pub use timer::{stage_span, workflow_span, SpanTimer};
