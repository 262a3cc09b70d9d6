use std::path::PathBuf;
use std::sync::Arc;

use onepager_core::config::DealConfig;
use onepager_core::error::{OnePagerError, Result};
use onepager_core::traits::ToolCaller;
use onepager_core::types::*;

use super::node::StepId;

/// A writable field of [`WorkflowState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateField {
    SessionId,
    Tools,
    DiscoveredFiles,
    IngestResults,
    IngestVerdict,
    Metrics,
    MetricsVerdict,
    Snapshot,
    Content,
    ContentVerdict,
    Markdown,
    OutputFile,
    RunId,
    RetryCount,
    Success,
    Summary,
}

impl StateField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionId => "session_id",
            Self::Tools => "tools",
            Self::DiscoveredFiles => "discovered_files",
            Self::IngestResults => "ingest_results",
            Self::IngestVerdict => "ingest_verdict",
            Self::Metrics => "metrics",
            Self::MetricsVerdict => "metrics_verdict",
            Self::Snapshot => "snapshot",
            Self::Content => "content",
            Self::ContentVerdict => "content_verdict",
            Self::Markdown => "markdown",
            Self::OutputFile => "output_file",
            Self::RunId => "run_id",
            Self::RetryCount => "retry_count",
            Self::Success => "success",
            Self::Summary => "summary",
        }
    }
}

impl std::fmt::Display for StateField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything one run knows. Owned by the runner; steps only read it and
/// hand back a [`StatePatch`].
pub struct WorkflowState {
    pub deal_id: String,
    pub company_name: String,
    pub period_end: String,
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub run_id: Option<String>,
    pub session_id: Option<String>,
    pub tools: Option<Arc<dyn ToolCaller>>,

    pub discovered_files: DiscoveredFiles,
    pub ingest_results: IngestResults,
    pub ingest_verdict: Option<Verdict>,
    pub metrics: MetricsResult,
    pub metrics_verdict: Option<Verdict>,
    pub snapshot: Vec<SnapshotEntry>,
    pub content: ContentBullets,
    pub content_verdict: Option<Verdict>,
    pub markdown: String,
    pub output_file: Option<PathBuf>,

    pub errors: Vec<String>,
    pub retry_count: u32,
    pub success: bool,
    pub summary: Option<WorkflowSummary>,
    /// Steps executed so far; branching steps carry `:<label>`.
    pub path: Vec<String>,
}

impl WorkflowState {
    pub fn new(deal: &DealConfig) -> Self {
        Self {
            deal_id: deal.deal_id.clone(),
            company_name: deal.company_name.clone(),
            period_end: deal.period_end.clone(),
            data_dir: PathBuf::from(&deal.data_dir),
            output_dir: deal.output_dir(),
            run_id: None,
            session_id: None,
            tools: None,
            discovered_files: DiscoveredFiles::new(),
            ingest_results: IngestResults::default(),
            ingest_verdict: None,
            metrics: MetricsResult::default(),
            metrics_verdict: None,
            snapshot: Vec::new(),
            content: ContentBullets::default(),
            content_verdict: None,
            markdown: String::new(),
            output_file: None,
            errors: Vec::new(),
            retry_count: 0,
            success: false,
            summary: None,
            path: Vec::new(),
        }
    }

    /// The session opened by `initialize`.
    pub fn tools(&self) -> Result<Arc<dyn ToolCaller>> {
        self.tools
            .clone()
            .ok_or_else(|| OnePagerError::Session("tool session not initialized".into()))
    }

    /// Merge a step's patch. Present fields overwrite; `errors` is appended.
    /// A patch touching a field the step did not declare is rejected whole.
    pub fn apply(&mut self, step: StepId, patch: StatePatch) -> Result<()> {
        let allowed = step.writes();
        if let Some(field) = patch.touched().into_iter().find(|f| !allowed.contains(f)) {
            return Err(OnePagerError::contract(
                step.as_str(),
                format!("step may not write '{}'", field),
            ));
        }

        let StatePatch {
            session_id,
            tools,
            discovered_files,
            ingest_results,
            ingest_verdict,
            metrics,
            metrics_verdict,
            snapshot,
            content,
            content_verdict,
            markdown,
            output_file,
            run_id,
            retry_count,
            success,
            summary,
            errors,
        } = patch;

        if let Some(v) = session_id {
            self.session_id = Some(v);
        }
        if let Some(v) = tools {
            self.tools = Some(v);
        }
        if let Some(v) = discovered_files {
            self.discovered_files = v;
        }
        if let Some(v) = ingest_results {
            self.ingest_results = v;
        }
        if let Some(v) = ingest_verdict {
            self.ingest_verdict = Some(v);
        }
        if let Some(v) = metrics {
            self.metrics = v;
        }
        if let Some(v) = metrics_verdict {
            self.metrics_verdict = Some(v);
        }
        if let Some(v) = snapshot {
            self.snapshot = v;
        }
        if let Some(v) = content {
            self.content = v;
        }
        if let Some(v) = content_verdict {
            self.content_verdict = Some(v);
        }
        if let Some(v) = markdown {
            self.markdown = v;
        }
        if let Some(v) = output_file {
            self.output_file = Some(v);
        }
        if let Some(v) = run_id {
            self.run_id = Some(v);
        }
        if let Some(v) = retry_count {
            self.retry_count = v;
        }
        if let Some(v) = success {
            self.success = v;
        }
        if let Some(v) = summary {
            self.summary = Some(v);
        }
        self.errors.extend(errors);
        Ok(())
    }

    /// Summary of the run as it stands.
    pub fn summarize(&self) -> WorkflowSummary {
        WorkflowSummary {
            success: self.errors.is_empty(),
            files_ingested: self.ingest_results.ingested.len(),
            kpis_computed: self.metrics.created.len(),
            snapshot_size: self.snapshot.len(),
            bullets_generated: self.content.total(),
            output_file: self.output_file.clone(),
            retry_count: self.retry_count,
            run_id: self.run_id.clone(),
            path_taken: self.path.clone(),
            errors: self.errors.clone(),
        }
    }
}

impl std::fmt::Debug for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowState")
            .field("deal_id", &self.deal_id)
            .field("company_name", &self.company_name)
            .field("period_end", &self.period_end)
            .field("run_id", &self.run_id)
            .field("session_id", &self.session_id)
            .field("files_ingested", &self.ingest_results.ingested.len())
            .field("kpis_computed", &self.metrics.created.len())
            .field("snapshot", &self.snapshot.len())
            .field("markdown_len", &self.markdown.len())
            .field("output_file", &self.output_file)
            .field("retry_count", &self.retry_count)
            .field("errors", &self.errors)
            .finish_non_exhaustive()
    }
}

/// Partial state returned by a step.
#[derive(Default)]
pub struct StatePatch {
    pub session_id: Option<String>,
    pub tools: Option<Arc<dyn ToolCaller>>,
    pub discovered_files: Option<DiscoveredFiles>,
    pub ingest_results: Option<IngestResults>,
    pub ingest_verdict: Option<Verdict>,
    pub metrics: Option<MetricsResult>,
    pub metrics_verdict: Option<Verdict>,
    pub snapshot: Option<Vec<SnapshotEntry>>,
    pub content: Option<ContentBullets>,
    pub content_verdict: Option<Verdict>,
    pub markdown: Option<String>,
    pub output_file: Option<PathBuf>,
    pub run_id: Option<String>,
    pub retry_count: Option<u32>,
    pub success: Option<bool>,
    pub summary: Option<WorkflowSummary>,
    pub errors: Vec<String>,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// A patch that only appends errors.
    pub fn errors(errors: Vec<String>) -> Self {
        Self {
            errors,
            ..Self::default()
        }
    }

    /// Fields this patch would overwrite.
    pub fn touched(&self) -> Vec<StateField> {
        let mut fields = Vec::new();
        let mut mark = |present: bool, field: StateField| {
            if present {
                fields.push(field);
            }
        };
        mark(self.session_id.is_some(), StateField::SessionId);
        mark(self.tools.is_some(), StateField::Tools);
        mark(self.discovered_files.is_some(), StateField::DiscoveredFiles);
        mark(self.ingest_results.is_some(), StateField::IngestResults);
        mark(self.ingest_verdict.is_some(), StateField::IngestVerdict);
        mark(self.metrics.is_some(), StateField::Metrics);
        mark(self.metrics_verdict.is_some(), StateField::MetricsVerdict);
        mark(self.snapshot.is_some(), StateField::Snapshot);
        mark(self.content.is_some(), StateField::Content);
        mark(self.content_verdict.is_some(), StateField::ContentVerdict);
        mark(self.markdown.is_some(), StateField::Markdown);
        mark(self.output_file.is_some(), StateField::OutputFile);
        mark(self.run_id.is_some(), StateField::RunId);
        mark(self.retry_count.is_some(), StateField::RetryCount);
        mark(self.success.is_some(), StateField::Success);
        mark(self.summary.is_some(), StateField::Summary);
        fields
    }
}

impl std::fmt::Debug for StatePatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatePatch")
            .field("touched", &self.touched())
            .field("errors", &self.errors)
            .finish()
    }
}
