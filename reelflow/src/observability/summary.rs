//! Wide summary payload for a finished workflow.

use crate::core::WorkflowRecord;
use std::collections::BTreeMap;

/// Builds one JSON payload describing a whole workflow run.
///
/// Intended for a single log line or analytics event per workflow.
#[must_use]
pub fn workflow_summary(record: &WorkflowRecord) -> serde_json::Value {
    let mut step_counts: BTreeMap<String, u32> = BTreeMap::new();
    for step in &record.steps {
        *step_counts.entry(step.status.to_string()).or_insert(0) += 1;
    }

    let steps: Vec<serde_json::Value> = record
        .steps
        .iter()
        .map(|step| {
            serde_json::json!({
                "stage": step.stage.name(),
                "status": step.status.to_string(),
                "attempts": step.attempts,
                "retries": step.retries,
                "duration_ms": step
                    .completed_at
                    .map(|done| (done - step.started_at).num_milliseconds()),
            })
        })
        .collect();

    let mut payload = serde_json::json!({
        "workflow_id": record.workflow_id.to_string(),
        "identity": record.identity,
        "identifier": record.identifier,
        "status": record.status.to_string(),
        "duration_ms": record.duration_ms(),
        "total_retries": record.steps.iter().map(|s| s.retries).sum::<u32>(),
        "step_counts": step_counts,
        "steps": steps,
    });

    if let Some(failure) = &record.failure {
        payload["failure"] = serde_json::json!({
            "stage": failure.stage.name(),
            "kind": failure.kind,
            "message": failure.message,
            "dependency": failure.dependency,
        });
    }
    if let Some(published) = &record.published {
        payload["published_url"] = serde_json::json!(published.url);
    }

    payload
}
