use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tracing::{debug, error, info, info_span, warn, Instrument};

use onepager_core::config::AppConfig;
use onepager_core::error::{OnePagerError, Result};
use onepager_core::traits::ToolConnector;
use onepager_core::types::WorkflowSummary;

use super::edge::{EdgeLabel, Topology, Transition};
use super::node::StepId;
use super::state::WorkflowState;
use crate::generator::TextGenerator;
use crate::steps::{self, StepContext};

/// A step may run at most this many times in one run.
const MAX_VISITS: usize = 5;

/// One executed step.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub step: StepId,
    /// Edge taken out of a branching step.
    pub label: Option<EdgeLabel>,
    pub elapsed_ms: u64,
}

/// Outcome of a completed run.
#[derive(Debug)]
pub struct RunResult {
    pub state: WorkflowState,
    pub summary: WorkflowSummary,
    /// Per-step records in execution order.
    pub steps: Vec<StepRecord>,
    pub total_elapsed_ms: u64,
}

/// Drives a [`WorkflowState`] through a [`Topology`].
///
/// Starting from the entry step, each step's patch is merged into the state,
/// then the step's transition picks the successor. Branching steps ask their
/// routing rule for a label and follow the edge carrying it. The run ends
/// after the terminal step is merged.
pub struct GraphRunner {
    topology: Topology,
    ctx: StepContext,
}

impl GraphRunner {
    pub fn new(config: AppConfig, connector: Arc<dyn ToolConnector>) -> Self {
        Self {
            topology: Topology::pipeline(),
            ctx: StepContext::new(config, connector, None),
        }
    }

    /// Attach the generative helper. `None` keeps every agent deterministic.
    pub fn with_generator(mut self, generator: Option<TextGenerator>) -> Self {
        self.ctx.generator = generator;
        self
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    /// Execute one run for the configured deal.
    pub async fn run(&self) -> Result<RunResult> {
        let start = Instant::now();
        let mut state = WorkflowState::new(&self.ctx.config.deal);
        let mut records = Vec::new();
        let mut visits: HashMap<StepId, usize> = HashMap::new();
        let mut current = self.topology.entry();

        info!(
            deal_id = %state.deal_id,
            company = %state.company_name,
            period_end = %state.period_end,
            "Starting one-pager run"
        );

        loop {
            let count = visits.entry(current).or_insert(0);
            *count += 1;
            if *count > MAX_VISITS {
                warn!(step = %current, "Step visited more than {} times, terminating run", MAX_VISITS);
                return Err(OnePagerError::Config(format!(
                    "step '{}' exceeded {} visits",
                    current, MAX_VISITS
                )));
            }

            state.path.push(current.to_string());
            info!(step = %current, "Executing step");
            self.trace(&state, current, "step_started", json!({})).await;

            let step_start = Instant::now();
            let patch = match steps::run_step(current, &state, &self.ctx)
                .instrument(info_span!("step", step = %current))
                .await
            {
                Ok(patch) => patch,
                Err(e) => {
                    error!(step = %current, error = %e, "Step aborted the run");
                    self.trace(&state, current, "run_aborted", json!({"error": e.to_string()}))
                        .await;
                    return Err(e);
                }
            };

            let errors_added = patch.errors.len();
            state.apply(current, patch)?;
            let elapsed_ms = step_start.elapsed().as_millis() as u64;

            debug!(step = %current, elapsed_ms, errors_added, "Step complete");
            self.trace(
                &state,
                current,
                "step_finished",
                json!({"elapsed_ms": elapsed_ms, "errors_added": errors_added}),
            )
            .await;

            let transition = self.topology.transition(current).ok_or_else(|| {
                OnePagerError::Config(format!("step '{}' has no outgoing transition", current))
            })?;

            let (next, label) = match transition {
                Transition::End => {
                    records.push(StepRecord {
                        step: current,
                        label: None,
                        elapsed_ms,
                    });
                    break;
                }
                Transition::Always(next) => (*next, None),
                Transition::Conditional { rule, .. } => {
                    let label = rule(&state);
                    let next = transition.target(label).ok_or_else(|| {
                        OnePagerError::Config(format!(
                            "step '{}' routed to '{}' which has no target",
                            current, label
                        ))
                    })?;
                    if let Some(last) = state.path.last_mut() {
                        last.push(':');
                        last.push_str(label.as_str());
                    }
                    info!(step = %current, label = %label, next = %next, "Routing");
                    self.trace(
                        &state,
                        current,
                        "route",
                        json!({"label": label.as_str(), "next": next.as_str()}),
                    )
                    .await;
                    (next, Some(label))
                }
            };

            records.push(StepRecord {
                step: current,
                label,
                elapsed_ms,
            });
            current = next;
        }

        let summary = state.summary.clone().unwrap_or_else(|| state.summarize());
        let total_elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            success = summary.success,
            errors = summary.errors.len(),
            total_elapsed_ms,
            "Run finished"
        );

        Ok(RunResult {
            state,
            summary,
            steps: records,
            total_elapsed_ms,
        })
    }

    async fn trace(&self, state: &WorkflowState, step: StepId, event: &str, fields: serde_json::Value) {
        self.ctx
            .trace
            .record(state.run_id.as_deref(), step.as_str(), event, fields)
            .await;
    }
}
