//! Routing rules for the branching steps. Each is a pure function of state.

use crate::graph::{EdgeLabel, WorkflowState};

/// How many times the ingestion-retry edge may be taken in one run.
pub const MAX_INGEST_RETRIES: u32 = 2;

/// After `ingest` or `retry_ingest`. A missing verdict counts as failed.
pub fn after_ingest(state: &WorkflowState) -> EdgeLabel {
    let passed = state.ingest_verdict.as_ref().is_some_and(|v| v.passed);
    if passed {
        EdgeLabel::Continue
    } else if state.retry_count < MAX_INGEST_RETRIES {
        EdgeLabel::Retry
    } else {
        EdgeLabel::Skip
    }
}

/// After `compute_metrics`: nothing created means fall back to existing KPIs.
/// Warnings alone never divert.
pub fn after_metrics(state: &WorkflowState) -> EdgeLabel {
    if state.metrics.created.is_empty() {
        EdgeLabel::Fallback
    } else {
        EdgeLabel::Continue
    }
}

/// After `generate_content`.
pub fn after_content(state: &WorkflowState) -> EdgeLabel {
    if state.content.thesis.is_empty() || state.content.risks.is_empty() {
        EdgeLabel::FallbackContent
    } else {
        EdgeLabel::Continue
    }
}
