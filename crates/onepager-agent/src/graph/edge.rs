use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::node::StepId;
use super::state::WorkflowState;
use crate::routing;

/// Label on an outgoing edge of a branching step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeLabel {
    Continue,
    Retry,
    Skip,
    Fallback,
    FallbackContent,
}

impl EdgeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Retry => "retry",
            Self::Skip => "skip",
            Self::Fallback => "fallback",
            Self::FallbackContent => "fallback_content",
        }
    }
}

impl std::fmt::Display for EdgeLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pure routing decision over the current state.
pub type RouteFn = fn(&WorkflowState) -> EdgeLabel;

/// What happens after a step.
#[derive(Clone)]
pub enum Transition {
    /// Single unconditional successor.
    Always(StepId),
    /// Ask `rule` for a label, then follow the matching edge.
    Conditional {
        rule: RouteFn,
        targets: Vec<(EdgeLabel, StepId)>,
    },
    /// Terminal step.
    End,
}

impl std::fmt::Debug for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Always(to) => f.debug_tuple("Always").field(to).finish(),
            Self::Conditional { targets, .. } => f
                .debug_struct("Conditional")
                .field("targets", targets)
                .finish_non_exhaustive(),
            Self::End => f.write_str("End"),
        }
    }
}

impl Transition {
    pub fn target(&self, label: EdgeLabel) -> Option<StepId> {
        match self {
            Self::Conditional { targets, .. } => targets
                .iter()
                .find(|(l, _)| *l == label)
                .map(|(_, step)| *step),
            _ => None,
        }
    }
}

/// A fixed, edge-labeled step graph.
#[derive(Debug, Clone)]
pub struct Topology {
    entry: StepId,
    transitions: HashMap<StepId, Transition>,
}

impl Topology {
    pub fn new(entry: StepId) -> Self {
        Self {
            entry,
            transitions: HashMap::new(),
        }
    }

    pub fn always(mut self, from: StepId, to: StepId) -> Self {
        self.transitions.insert(from, Transition::Always(to));
        self
    }

    pub fn conditional(
        mut self,
        from: StepId,
        rule: RouteFn,
        targets: &[(EdgeLabel, StepId)],
    ) -> Self {
        self.transitions.insert(
            from,
            Transition::Conditional {
                rule,
                targets: targets.to_vec(),
            },
        );
        self
    }

    pub fn end(mut self, at: StepId) -> Self {
        self.transitions.insert(at, Transition::End);
        self
    }

    pub fn entry(&self) -> StepId {
        self.entry
    }

    pub fn transition(&self, from: StepId) -> Option<&Transition> {
        self.transitions.get(&from)
    }

    /// The one-pager pipeline.
    ///
    /// ```text
    /// initialize → ingest ─┬─ continue/skip ─→ compute_metrics
    ///                      └─ retry → retry_ingest (loops on retry)
    /// compute_metrics ─┬─ continue → fetch_snapshot
    ///                  └─ fallback → use_existing_metrics → fetch_snapshot
    /// fetch_snapshot → generate_content ─┬─ continue → render
    ///                                    └─ fallback_content → fallback_content → render
    /// render → persist_output → register_output → finalize → END
    /// ```
    pub fn pipeline() -> Self {
        use EdgeLabel::*;
        use StepId as S;

        let after_ingest = [
            (Continue, S::ComputeMetrics),
            (Retry, S::RetryIngest),
            (Skip, S::ComputeMetrics),
        ];

        Self::new(S::Initialize)
            .always(S::Initialize, S::Ingest)
            .conditional(S::Ingest, routing::after_ingest, &after_ingest)
            .conditional(S::RetryIngest, routing::after_ingest, &after_ingest)
            .conditional(
                S::ComputeMetrics,
                routing::after_metrics,
                &[(Continue, S::FetchSnapshot), (Fallback, S::UseExistingMetrics)],
            )
            .always(S::UseExistingMetrics, S::FetchSnapshot)
            .always(S::FetchSnapshot, S::GenerateContent)
            .conditional(
                S::GenerateContent,
                routing::after_content,
                &[(Continue, S::Render), (FallbackContent, S::FallbackContent)],
            )
            .always(S::FallbackContent, S::Render)
            .always(S::Render, S::PersistOutput)
            .always(S::PersistOutput, S::RegisterOutput)
            .always(S::RegisterOutput, S::Finalize)
            .end(S::Finalize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_step_has_a_transition() {
        let t = Topology::pipeline();
        for step in StepId::ALL {
            assert!(t.transition(step).is_some(), "{} has no transition", step);
        }
        assert_eq!(t.entry(), StepId::Initialize);
    }

    #[test]
    fn test_only_finalize_ends() {
        let t = Topology::pipeline();
        let ends: Vec<StepId> = StepId::ALL
            .into_iter()
            .filter(|s| matches!(t.transition(*s), Some(Transition::End)))
            .collect();
        assert_eq!(ends, vec![StepId::Finalize]);
    }

    #[test]
    fn test_skip_and_continue_share_destination() {
        let t = Topology::pipeline();
        let after = t.transition(StepId::Ingest).unwrap();
        assert_eq!(after.target(EdgeLabel::Continue), after.target(EdgeLabel::Skip));
        assert_eq!(after.target(EdgeLabel::Retry), Some(StepId::RetryIngest));
        assert_eq!(after.target(EdgeLabel::Fallback), None);
    }

    #[test]
    fn test_only_retry_edge_is_a_cycle() {
        let t = Topology::pipeline();
        let retry = t.transition(StepId::RetryIngest).unwrap();
        assert_eq!(retry.target(EdgeLabel::Retry), Some(StepId::RetryIngest));
        assert_eq!(
            t.transition(StepId::ComputeMetrics).unwrap().target(EdgeLabel::Fallback),
            Some(StepId::UseExistingMetrics)
        );
    }
}
