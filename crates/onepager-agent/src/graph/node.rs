use serde::{Deserialize, Serialize};

use super::state::StateField;

/// A named step in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    Initialize,
    Ingest,
    RetryIngest,
    ComputeMetrics,
    UseExistingMetrics,
    FetchSnapshot,
    GenerateContent,
    FallbackContent,
    Render,
    PersistOutput,
    RegisterOutput,
    Finalize,
}

impl StepId {
    pub const ALL: [StepId; 12] = [
        Self::Initialize,
        Self::Ingest,
        Self::RetryIngest,
        Self::ComputeMetrics,
        Self::UseExistingMetrics,
        Self::FetchSnapshot,
        Self::GenerateContent,
        Self::FallbackContent,
        Self::Render,
        Self::PersistOutput,
        Self::RegisterOutput,
        Self::Finalize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Ingest => "ingest",
            Self::RetryIngest => "retry_ingest",
            Self::ComputeMetrics => "compute_metrics",
            Self::UseExistingMetrics => "use_existing_metrics",
            Self::FetchSnapshot => "fetch_snapshot",
            Self::GenerateContent => "generate_content",
            Self::FallbackContent => "fallback_content",
            Self::Render => "render",
            Self::PersistOutput => "persist_output",
            Self::RegisterOutput => "register_output",
            Self::Finalize => "finalize",
        }
    }

    /// State fields this step may write. `errors` is always writable
    /// (append-only) and is not listed.
    pub fn writes(&self) -> &'static [StateField] {
        use StateField::*;
        match self {
            Self::Initialize => &[SessionId, Tools, RetryCount],
            Self::Ingest => &[DiscoveredFiles, IngestResults, IngestVerdict],
            Self::RetryIngest => &[DiscoveredFiles, IngestResults, IngestVerdict, RetryCount],
            Self::ComputeMetrics => &[Metrics, MetricsVerdict],
            Self::UseExistingMetrics => &[MetricsVerdict],
            Self::FetchSnapshot => &[Snapshot],
            Self::GenerateContent | Self::FallbackContent => &[Content, ContentVerdict],
            Self::Render => &[Markdown],
            Self::PersistOutput => &[OutputFile],
            Self::RegisterOutput => &[RunId],
            Self::Finalize => &[Success, Summary],
        }
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_unique() {
        let mut names: Vec<&str> = StepId::ALL.iter().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), StepId::ALL.len());
    }

    #[test]
    fn test_serde_matches_display() {
        for step in StepId::ALL {
            let json = serde_json::to_value(step).unwrap();
            assert_eq!(json, serde_json::json!(step.as_str()));
        }
    }

    #[test]
    fn test_only_initialize_writes_session() {
        for step in StepId::ALL {
            let writes_session = step.writes().contains(&StateField::Tools)
                || step.writes().contains(&StateField::SessionId);
            assert_eq!(writes_session, step == StepId::Initialize, "{}", step);
        }
    }

    #[test]
    fn test_retry_count_writers() {
        let writers: Vec<StepId> = StepId::ALL
            .into_iter()
            .filter(|s| s.writes().contains(&StateField::RetryCount))
            .collect();
        assert_eq!(writers, vec![StepId::Initialize, StepId::RetryIngest]);
    }
}
