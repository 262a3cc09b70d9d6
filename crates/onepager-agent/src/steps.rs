//! One function per pipeline step.
//!
//! Steps read the state and return a [`StatePatch`]; they never mutate the
//! state themselves. Remote failures are folded into `errors`. Only
//! contract violations (and a failed session handshake, after which no
//! step could run) come back as `Err`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{info, warn};

use onepager_core::config::AppConfig;
use onepager_core::error::{OnePagerError, Result};
use onepager_core::traits::ToolConnector;
use onepager_core::types::*;

use crate::content::{self, fallback_bullets, ContentAgent};
use crate::generator::TextGenerator;
use crate::golden_facts::GoldenFactsStore;
use crate::graph::{StatePatch, StepId, WorkflowState};
use crate::ingestion::{self, IngestionAgent};
use crate::metrics::{self, MetricsAgent, SNAPSHOT_TOOL};
use crate::trace::TraceLog;

pub const RENDER_TOOL: &str = "render_onepager_markdown";
pub const REGISTER_TOOL: &str = "register_output";

/// Rendered text shorter than this is treated as a protocol mismatch.
pub const MIN_MARKDOWN_CHARS: usize = 50;

/// Collaborators shared by every step of a run.
pub struct StepContext {
    pub config: AppConfig,
    pub connector: Arc<dyn ToolConnector>,
    pub generator: Option<TextGenerator>,
    pub golden_facts: Option<GoldenFactsStore>,
    pub trace: TraceLog,
}

impl StepContext {
    pub fn new(
        config: AppConfig,
        connector: Arc<dyn ToolConnector>,
        generator: Option<TextGenerator>,
    ) -> Self {
        let golden_facts = config
            .golden_facts
            .enabled
            .then(|| GoldenFactsStore::new(&config.golden_facts.dir));
        let trace = TraceLog::from_config(&config.trace);
        Self {
            config,
            connector,
            generator,
            golden_facts,
            trace,
        }
    }
}

/// Run one step against the current state.
pub async fn run_step(step: StepId, state: &WorkflowState, ctx: &StepContext) -> Result<StatePatch> {
    match step {
        StepId::Initialize => initialize(ctx).await,
        StepId::Ingest => ingest(state, ctx).await,
        StepId::RetryIngest => retry_ingest(state, ctx).await,
        StepId::ComputeMetrics => compute_metrics(state, ctx).await,
        StepId::UseExistingMetrics => Ok(use_existing_metrics()),
        StepId::FetchSnapshot => fetch_snapshot(state, ctx).await,
        StepId::GenerateContent => generate_content(state, ctx).await,
        StepId::FallbackContent => Ok(use_fallback_content()),
        StepId::Render => render(state).await,
        StepId::PersistOutput => Ok(persist_output(state).await),
        StepId::RegisterOutput => register_output(state, ctx).await,
        StepId::Finalize => Ok(finalize(state)),
    }
}

async fn initialize(ctx: &StepContext) -> Result<StatePatch> {
    let tools = ctx.connector.connect(&ctx.config.tools.client_label).await?;
    let session_id = tools.session_id().to_string();
    info!(session = %session_id, "Session initialized");
    Ok(StatePatch {
        session_id: Some(session_id),
        tools: Some(tools),
        retry_count: Some(0),
        ..Default::default()
    })
}

async fn ingest(state: &WorkflowState, ctx: &StepContext) -> Result<StatePatch> {
    let tools = state.tools()?;
    let agent = IngestionAgent::new(tools.as_ref())
        .with_generator(ctx.generator.as_ref())
        .with_tool_discovery(ctx.config.workflow.tool_discovery);

    let (files, results) = agent.ingest_all(&state.deal_id, &state.data_dir, true).await;
    let verdict = ingestion::validate(&results);
    info!(
        ingested = results.ingested.len(),
        failed = results.errors.len(),
        passed = verdict.passed,
        "Ingestion finished"
    );

    Ok(StatePatch {
        discovered_files: Some(files),
        ingest_results: Some(results),
        errors: verdict.errors(),
        ingest_verdict: Some(verdict),
        ..Default::default()
    })
}

/// Re-run ingestion with the rule-based plan. The failure that led here is
/// already in `errors`, so nothing is appended.
async fn retry_ingest(state: &WorkflowState, ctx: &StepContext) -> Result<StatePatch> {
    let tools = state.tools()?;
    let attempt = state.retry_count + 1;
    info!(attempt, "Retrying ingestion with rule-based strategy");

    let agent = IngestionAgent::new(tools.as_ref())
        .with_tool_discovery(ctx.config.workflow.tool_discovery);
    let (files, results) = agent.ingest_all(&state.deal_id, &state.data_dir, false).await;
    let verdict = ingestion::validate(&results);

    Ok(StatePatch {
        discovered_files: Some(files),
        ingest_results: Some(results),
        ingest_verdict: Some(verdict),
        retry_count: Some(attempt),
        ..Default::default()
    })
}

async fn compute_metrics(state: &WorkflowState, ctx: &StepContext) -> Result<StatePatch> {
    let tools = state.tools()?;
    let agent = MetricsAgent::new(tools.as_ref())
        .with_generator(ctx.generator.as_ref())
        .with_tool_discovery(ctx.config.workflow.tool_discovery);

    let mut errors = Vec::new();
    let result = match agent
        .compute(&state.deal_id, ctx.config.workflow.metrics.as_ref())
        .await
    {
        Ok(result) => result,
        Err(e) if e.is_contract_violation() => return Err(e),
        Err(e) => {
            warn!(error = %e, "KPI computation failed");
            errors.push(e.to_string());
            MetricsResult::default()
        }
    };

    let verdict = metrics::validate(&result);
    errors.extend(verdict.errors());
    Ok(StatePatch {
        metrics: Some(result),
        metrics_verdict: Some(verdict),
        errors,
        ..Default::default()
    })
}

/// Placeholder for falling back to previously approved KPIs. The snapshot
/// fetched next is whatever the service already holds.
fn use_existing_metrics() -> StatePatch {
    info!("Using existing KPIs");
    StatePatch {
        metrics_verdict: Some(Verdict::pass_with_warning("Using existing KPIs")),
        ..Default::default()
    }
}

async fn fetch_snapshot(state: &WorkflowState, ctx: &StepContext) -> Result<StatePatch> {
    let tools = state.tools()?;
    let result = match tools
        .call_tool(SNAPSHOT_TOOL, json!({"deal_id": state.deal_id}))
        .await
    {
        Ok(result) => result,
        Err(e) => {
            warn!(error = %e, "Snapshot retrieval failed");
            return Ok(StatePatch {
                snapshot: Some(Vec::new()),
                errors: vec![e.to_string()],
                ..Default::default()
            });
        }
    };

    let list = result.get("snapshot").ok_or_else(|| {
        OnePagerError::contract(StepId::FetchSnapshot.as_str(), "result has no 'snapshot' member")
    })?;
    let snapshot = parse_snapshot(StepId::FetchSnapshot.as_str(), list)?;
    info!(entries = snapshot.len(), "Snapshot retrieved");

    if let Some(store) = &ctx.golden_facts {
        if let Err(e) = store.save(&state.company_name, &state.period_end, &snapshot).await {
            warn!(error = %e, "Failed to save golden facts");
        }
    }

    Ok(StatePatch {
        snapshot: Some(snapshot),
        ..Default::default()
    })
}

async fn generate_content(state: &WorkflowState, ctx: &StepContext) -> Result<StatePatch> {
    let persisted = match &ctx.golden_facts {
        Some(store) => match store.load(&state.company_name, &state.period_end).await {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "Failed to read golden facts, using in-memory snapshot");
                None
            }
        },
        None => None,
    };
    let snapshot = persisted.as_deref().unwrap_or(&state.snapshot);

    let bullets = ContentAgent::new(ctx.generator.as_ref())
        .generate(&state.deal_id, snapshot)
        .await;
    let verdict = content::validate(&bullets);

    Ok(StatePatch {
        content: Some(bullets),
        errors: verdict.errors(),
        content_verdict: Some(verdict),
        ..Default::default()
    })
}

fn use_fallback_content() -> StatePatch {
    info!("Using fallback content");
    StatePatch {
        content: Some(fallback_bullets()),
        content_verdict: Some(Verdict::pass_with_warning("Using fallback content")),
        ..Default::default()
    }
}

/// Undo the literal escapes the renderer leaves in its text.
pub fn unescape_markdown(text: &str) -> String {
    text.replace("\\n", "\n")
        .replace("\\u2014", "\u{2014}")
        .replace("\\\"", "\"")
}

async fn render(state: &WorkflowState) -> Result<StatePatch> {
    let tools = state.tools()?;
    let args = json!({
        "company": state.company_name,
        "period_end": state.period_end,
        "snapshot": state.snapshot,
        "bullets": state.content,
        "deal_id": state.deal_id,
    });

    let outcome = match tools.call_tool(RENDER_TOOL, args).await {
        Ok(result) => check_rendered(&result),
        Err(e) => Err(e),
    };

    Ok(match outcome {
        Ok(markdown) => {
            info!(chars = markdown.chars().count(), "Rendered one-pager");
            StatePatch {
                markdown: Some(markdown),
                ..Default::default()
            }
        }
        Err(e) => {
            warn!(error = %e, "Render failed");
            StatePatch {
                markdown: Some(String::new()),
                errors: vec![e.to_string()],
                ..Default::default()
            }
        }
    })
}

/// The rendered text, or a contract violation when it is missing or too
/// short to be a document.
fn check_rendered(result: &Value) -> Result<String> {
    let raw = result
        .get("markdown")
        .or_else(|| result.get("raw"))
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    let markdown = unescape_markdown(raw);
    let chars = markdown.trim().chars().count();
    if chars < MIN_MARKDOWN_CHARS {
        return Err(OnePagerError::contract(
            StepId::Render.as_str(),
            format!(
                "rendered text implausibly short ({} chars, minimum {})",
                chars, MIN_MARKDOWN_CHARS
            ),
        ));
    }
    Ok(markdown)
}

/// `LP_OnePager_<company>_<period>.md` under `dir`.
pub fn output_path(dir: &Path, company: &str, period_end: &str) -> PathBuf {
    let safe = company.replace(' ', "_").replace([',', '.'], "");
    dir.join(format!(
        "LP_OnePager_{}_{}.md",
        safe,
        period_end.replace('-', "_")
    ))
}

async fn persist_output(state: &WorkflowState) -> StatePatch {
    if state.markdown.is_empty() {
        return StatePatch::errors(vec!["No markdown to save".into()]);
    }

    let path = output_path(&state.output_dir, &state.company_name, &state.period_end);
    match write_output(&state.output_dir, &path, &state.markdown).await {
        Ok(()) => {
            info!(path = %path.display(), "Saved one-pager");
            StatePatch {
                output_file: Some(path),
                ..Default::default()
            }
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to save one-pager");
            StatePatch::errors(vec![format!("Failed to write {}: {}", path.display(), e)])
        }
    }
}

async fn write_output(dir: &Path, path: &Path, markdown: &str) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(path, markdown).await
}

async fn file_uri(path: &Path) -> String {
    let absolute = match tokio::fs::canonicalize(path).await {
        Ok(p) => p,
        Err(_) => std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf()),
    };
    format!("file://{}", absolute.display())
}

/// Register the written file. Failure is only a warning.
async fn register_output(state: &WorkflowState, ctx: &StepContext) -> Result<StatePatch> {
    let Some(output_file) = &state.output_file else {
        return Ok(StatePatch::new());
    };
    let tools = state.tools()?;

    let args = json!({
        "deal_id": state.deal_id,
        "recipe": ctx.config.workflow.recipe,
        "kind": "markdown",
        "uri": file_uri(output_file).await,
    });

    match tools.call_tool(REGISTER_TOOL, args).await {
        Ok(result) => {
            let run_id = match result.get("run_id") {
                Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            };
            info!(run_id = run_id.as_deref().unwrap_or("-"), "Output registered");
            Ok(StatePatch {
                run_id,
                ..Default::default()
            })
        }
        Err(e) => {
            warn!(error = %e, "Failed to register output");
            Ok(StatePatch::new())
        }
    }
}

fn finalize(state: &WorkflowState) -> StatePatch {
    let summary = state.summarize();
    StatePatch {
        success: Some(summary.success),
        summary: Some(summary),
        ..Default::default()
    }
}
