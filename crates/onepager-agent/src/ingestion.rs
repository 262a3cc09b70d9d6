//! Data discovery and ingestion.
//!
//! The deterministic file-to-tool rule is authoritative: a model-proposed
//! plan may reorder nothing and choose nothing the rule would not. It can
//! only drop paths it never saw, and even those are re-added at the end.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use onepager_core::traits::ToolCaller;
use onepager_core::types::*;

use crate::generator::TextGenerator;

const MEMO_CHUNK_SIZE: u32 = 1000;
const MEMO_ACCESS_TAG: &str = "lp-safe";
const SHEET_HINTS: [&str; 2] = ["P&L", "Balance Sheet"];
const INGEST_VERSION: &str = "v1";

const PLAN_SYSTEM_PROMPT: &str = "You are a data ingestion specialist. \
Analyze the available files and determine the optimal ingestion order. \
Return a JSON array with file paths, tool names, and priority (1=highest).";

/// Scan `data_dir` (non-recursively) and group files by category.
///
/// Entries are visited in file-name order. A missing directory yields
/// empty groups rather than an error.
pub async fn discover(data_dir: &Path) -> DiscoveredFiles {
    let mut files = DiscoveredFiles::new();
    for category in [FileCategory::Memo, FileCategory::Spreadsheet, FileCategory::Tabular] {
        files.insert(category, Vec::new());
    }

    let mut entries = match tokio::fs::read_dir(data_dir).await {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %data_dir.display(), error = %e, "Data directory not readable");
            return files;
        }
    };

    let mut found: Vec<(String, PathBuf)> = Vec::new();
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
                if is_file {
                    found.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(dir = %data_dir.display(), error = %e, "Error while scanning data directory");
                break;
            }
        }
    }
    found.sort_by(|a, b| a.0.cmp(&b.0));

    for (name, path) in found {
        if let Some(category) = FileCategory::from_file_name(&name) {
            files.entry(category).or_default().push(path);
        }
    }
    files
}

/// The deterministic tool for a file.
pub fn rule_for(category: FileCategory, path: &Path) -> IngestTool {
    match category {
        FileCategory::Memo => IngestTool::Memo,
        FileCategory::Spreadsheet => IngestTool::Spreadsheet,
        FileCategory::Tabular => {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if name.contains("edgar") || name.contains("xbrl") {
                IngestTool::RegulatoryFiling
            } else {
                IngestTool::Tabular
            }
        }
    }
}

fn item(path: PathBuf, tool: IngestTool) -> StrategyItem {
    StrategyItem {
        source_path: path,
        priority: tool.priority(),
        tool,
    }
}

/// Rule-based plan: one item per file, stable-sorted by priority.
pub fn plan_strategy(files: &DiscoveredFiles) -> Vec<StrategyItem> {
    let order = [
        FileCategory::Memo,
        FileCategory::Spreadsheet,
        FileCategory::Tabular,
    ];
    let mut plan: Vec<StrategyItem> = order
        .into_iter()
        .flat_map(|category| {
            files
                .get(&category)
                .into_iter()
                .flatten()
                .map(move |path| item(path.clone(), rule_for(category, path)))
        })
        .collect();
    plan.sort_by_key(|i| i.priority);
    plan
}

/// Re-validate a model-proposed plan against the rule.
///
/// - paths not in `files` are dropped, as are duplicates
/// - a tool outside `available` (when given) falls back to the rule
/// - any tool that disagrees with the rule is corrected to it
/// - files the proposal omitted are appended with their rule assignment
pub fn reconcile_plan(
    files: &DiscoveredFiles,
    proposal: &Value,
    available: Option<&HashSet<String>>,
) -> Vec<StrategyItem> {
    let known: Vec<(FileCategory, &PathBuf)> = files
        .iter()
        .flat_map(|(category, paths)| paths.iter().map(move |p| (*category, p)))
        .collect();

    let lookup = |raw: &str| -> Option<(FileCategory, &PathBuf)> {
        let raw_path = Path::new(raw);
        known.iter().copied().find(|(_, p)| {
            p.as_path() == raw_path || (raw_path.components().count() == 1 && p.file_name() == raw_path.file_name())
        })
    };

    let mut plan: Vec<StrategyItem> = Vec::new();
    let mut seen: HashSet<&PathBuf> = HashSet::new();

    for proposed in proposal.as_array().into_iter().flatten() {
        let Some(raw) = proposed
            .get("file")
            .or_else(|| proposed.get("source_path"))
            .and_then(|f| f.as_str())
        else {
            continue;
        };
        let Some((category, path)) = lookup(raw) else {
            debug!(file = raw, "Dropping unknown path from proposed plan");
            continue;
        };
        if !seen.insert(path) {
            continue;
        }

        let expected = rule_for(category, path);
        let suggested = proposed.get("tool").and_then(|t| t.as_str()).unwrap_or_default();
        let outside_discovered = available.is_some_and(|set| !set.contains(suggested));
        if outside_discovered {
            debug!(file = %path.display(), tool = suggested, "Proposed tool not advertised, using rule");
        } else if suggested != expected.as_str() {
            debug!(file = %path.display(), suggested, corrected = %expected, "Correcting proposed tool");
        }
        plan.push(item(path.clone(), expected));
    }

    for (category, path) in known {
        if seen.insert(path) {
            plan.push(item(path.clone(), rule_for(category, path)));
        }
    }

    plan.sort_by_key(|i| i.priority);
    plan
}

/// Tool arguments for one strategy item.
pub fn tool_arguments(deal_id: &str, item: &StrategyItem) -> Value {
    let mut args = json!({
        "deal_id": deal_id,
        "file_path": item.source_path.display().to_string(),
    });
    let extra = match item.tool {
        IngestTool::Memo => json!({"chunk_size": MEMO_CHUNK_SIZE, "access_tag": MEMO_ACCESS_TAG}),
        IngestTool::Spreadsheet => json!({"sheet_hints": SHEET_HINTS, "version": INGEST_VERSION}),
        IngestTool::Tabular | IngestTool::RegulatoryFiling => json!({"version": INGEST_VERSION}),
    };
    if let (Some(args), Value::Object(extra)) = (args.as_object_mut(), extra) {
        args.extend(extra);
    }
    args
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Judge an ingestion outcome.
pub fn validate(results: &IngestResults) -> Verdict {
    let mut verdict = Verdict::pass();

    if results.ingested.is_empty() {
        verdict.fail("No files were successfully ingested");
    }
    if !results.errors.is_empty() {
        verdict.warn(format!("{} files failed to ingest", results.errors.len()));
    }

    if !results.has_tool(IngestTool::Memo) {
        verdict.warn("No narrative memo was ingested");
        verdict.recommend("Consider ingesting memo files for narrative content");
    }
    let has_financials = results.has_tool(IngestTool::Spreadsheet)
        || results.has_tool(IngestTool::Tabular)
        || results.has_tool(IngestTool::RegulatoryFiling);
    if !has_financials {
        verdict.warn("No spreadsheet or tabular data was ingested");
        verdict.recommend("Consider ingesting financial data (Excel/CSV) for KPIs");
    }

    verdict
}

/// Ingestion helper bound to one session.
pub struct IngestionAgent<'a> {
    tools: &'a dyn ToolCaller,
    generator: Option<&'a TextGenerator>,
    tool_discovery: bool,
}

impl<'a> IngestionAgent<'a> {
    pub fn new(tools: &'a dyn ToolCaller) -> Self {
        Self {
            tools,
            generator: None,
            tool_discovery: false,
        }
    }

    pub fn with_generator(mut self, generator: Option<&'a TextGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_tool_discovery(mut self, enabled: bool) -> Self {
        self.tool_discovery = enabled;
        self
    }

    /// Plan with the generative helper when present; the rule otherwise or
    /// on any model failure.
    pub async fn plan(&self, files: &DiscoveredFiles) -> Vec<StrategyItem> {
        let Some(generator) = self.generator else {
            return plan_strategy(files);
        };

        let available = if self.tool_discovery {
            self.discover_ingest_tools().await
        } else {
            None
        };

        match self.plan_strategy_assisted(generator, files, available.as_ref()).await {
            Ok(plan) => plan,
            Err(e) => {
                warn!(error = %e, "Model-assisted plan failed, using rule-based plan");
                plan_strategy(files)
            }
        }
    }

    async fn discover_ingest_tools(&self) -> Option<HashSet<String>> {
        match self.tools.list_tools().await {
            Ok(tools) => Some(
                tools
                    .into_iter()
                    .map(|t| t.name)
                    .filter(|n| n.starts_with("ingest_"))
                    .collect(),
            ),
            Err(e) => {
                warn!(error = %e, "Tool discovery failed, not constraining plan");
                None
            }
        }
    }

    pub async fn plan_strategy_assisted(
        &self,
        generator: &TextGenerator,
        files: &DiscoveredFiles,
        available: Option<&HashSet<String>>,
    ) -> onepager_core::Result<Vec<StrategyItem>> {
        let listing: Vec<String> = files
            .iter()
            .flat_map(|(category, paths)| {
                paths.iter().map(move |p| format!("{}: {}", category, p.display()))
            })
            .collect();

        let tool_names = match available {
            Some(set) => {
                let mut names: Vec<&str> = set.iter().map(String::as_str).collect();
                names.sort_unstable();
                names.join("|")
            }
            None => IngestTool::ALL.map(|t| t.as_str()).join("|"),
        };

        let user = format!(
            "Files available:\n{}\n\nReturn JSON array:\n[\n  {{\"file\": \"path/to/file\", \"tool\": \"{}\", \"priority\": 1}}\n]",
            listing.join("\n"),
            tool_names
        );

        let proposal = generator.complete_json(PLAN_SYSTEM_PROMPT, &user).await?;
        Ok(reconcile_plan(files, &proposal, available))
    }

    /// Call the ingestion tool for every item, in order.
    pub async fn execute(&self, deal_id: &str, strategy: &[StrategyItem]) -> IngestResults {
        let mut results = IngestResults::default();

        for item in strategy {
            let name = display_name(&item.source_path);
            let mut args = tool_arguments(deal_id, item);

            match self.tools.call_tool(item.tool.as_str(), args.clone()).await {
                Ok(result) => {
                    info!(tool = %item.tool, file = %name, "Ingested");
                    results.ingested.push(IngestedItem {
                        tool: item.tool,
                        source_path: item.source_path.clone(),
                        result,
                    });
                }
                Err(e) => {
                    let message = e.to_string();
                    warn!(tool = %item.tool, file = %name, error = %message, "Ingestion failed");
                    results.errors.push(IngestFailure {
                        source: item.source_path.display().to_string(),
                        tool: Some(item.tool),
                        error: message.clone(),
                    });

                    if item.tool == IngestTool::Spreadsheet && message.to_lowercase().contains("sheet") {
                        args["sheet_hints"] = json!([]);
                        if let Ok(result) = self.tools.call_tool(item.tool.as_str(), args).await {
                            info!(file = %name, "Retried without sheet hints");
                            results.ingested.push(IngestedItem {
                                tool: item.tool,
                                source_path: item.source_path.clone(),
                                result,
                            });
                            results.errors.pop();
                        }
                    }
                }
            }
        }

        results
    }

    /// Discover, plan, and execute. `assisted` enables the generative
    /// helper (when one is configured) for planning.
    pub async fn ingest_all(
        &self,
        deal_id: &str,
        data_dir: &Path,
        assisted: bool,
    ) -> (DiscoveredFiles, IngestResults) {
        let files = discover(data_dir).await;

        if files.values().all(Vec::is_empty) {
            let results = IngestResults {
                ingested: vec![],
                errors: vec![IngestFailure {
                    source: data_dir.display().to_string(),
                    tool: None,
                    error: format!("No files found in {}", data_dir.display()),
                }],
            };
            return (files, results);
        }

        let strategy = if assisted {
            self.plan(&files).await
        } else {
            plan_strategy(&files)
        };
        debug!(items = strategy.len(), "Ingestion strategy planned");

        let results = self.execute(deal_id, &strategy).await;
        (files, results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onepager_test_utils::{fixtures, MockLlm, MockToolCaller};

    fn files(memo: &[&str], sheets: &[&str], tabular: &[&str]) -> DiscoveredFiles {
        let mut f = DiscoveredFiles::new();
        f.insert(FileCategory::Memo, memo.iter().map(PathBuf::from).collect());
        f.insert(FileCategory::Spreadsheet, sheets.iter().map(PathBuf::from).collect());
        f.insert(FileCategory::Tabular, tabular.iter().map(PathBuf::from).collect());
        f
    }

    fn generator(reply: &str) -> TextGenerator {
        TextGenerator::new(
            Box::new(MockLlm::reply(reply)),
            serde_json::from_value(json!({})).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_discover_groups_and_sorts() {
        let dir = fixtures::data_dir(&["b.csv", "memo.txt", "a.csv", "model.xlsx", "deck.pdf", "notes.md"]);
        let found = discover(dir.path()).await;
        let names = |c: FileCategory| -> Vec<String> {
            found[&c].iter().map(|p| display_name(p)).collect()
        };
        assert_eq!(names(FileCategory::Tabular), vec!["a.csv", "b.csv"]);
        assert_eq!(names(FileCategory::Memo), vec!["memo.txt", "notes.md"]);
        assert_eq!(names(FileCategory::Spreadsheet), vec!["model.xlsx"]);
    }

    #[tokio::test]
    async fn test_discover_missing_dir() {
        let found = discover(Path::new("/definitely/not/here")).await;
        assert!(found.values().all(Vec::is_empty));
        assert_eq!(found.len(), 3);
    }

    #[test]
    fn test_rule_priorities_and_order() {
        let f = files(&["d/memo.txt"], &["d/model.xlsx"], &["d/financials_edgar.csv", "d/erp.csv"]);
        let plan = plan_strategy(&f);
        let tools: Vec<IngestTool> = plan.iter().map(|i| i.tool).collect();
        assert_eq!(
            tools,
            vec![
                IngestTool::Memo,
                IngestTool::Spreadsheet,
                IngestTool::RegulatoryFiling,
                IngestTool::Tabular
            ]
        );
        assert_eq!(plan.iter().map(|i| i.priority).collect::<Vec<_>>(), vec![1, 2, 3, 3]);
    }

    #[test]
    fn test_xbrl_marker_is_case_insensitive() {
        assert_eq!(
            rule_for(FileCategory::Tabular, Path::new("SEC_XBRL_export.csv")),
            IngestTool::RegulatoryFiling
        );
    }

    #[test]
    fn test_plan_is_idempotent() {
        let f = files(&["m.md", "a.txt"], &["x.xlsx"], &["edgar.csv", "z.csv", "b.csv"]);
        assert_eq!(plan_strategy(&f), plan_strategy(&f));
    }

    #[test]
    fn test_reconcile_corrects_drops_and_appends() {
        let f = files(&["d/memo.txt"], &["d/model.xlsx"], &["d/fin_edgar.csv"]);
        let proposal = json!([
            {"file": "d/fin_edgar.csv", "tool": "ingest_csv", "priority": 1},
            {"file": "d/ghost.csv", "tool": "ingest_csv", "priority": 1},
            {"file": "model.xlsx", "tool": "ingest_excel", "priority": 2}
        ]);
        let plan = reconcile_plan(&f, &proposal, None);
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].tool, IngestTool::Memo);
        assert_eq!(plan[1].source_path, PathBuf::from("d/model.xlsx"));
        assert_eq!(plan[2].tool, IngestTool::RegulatoryFiling);
        assert_eq!(plan[2].priority, 3);
    }

    #[test]
    fn test_reconcile_outside_discovered_set_uses_rule() {
        let f = files(&[], &[], &["d/erp.csv"]);
        let available: HashSet<String> = ["ingest_csv".to_string()].into();
        let proposal = json!([{"file": "d/erp.csv", "tool": "ingest_snowflake"}]);
        let plan = reconcile_plan(&f, &proposal, Some(&available));
        assert_eq!(plan[0].tool, IngestTool::Tabular);
    }

    #[test]
    fn test_tool_arguments() {
        let memo = tool_arguments("d1", &item("m.txt".into(), IngestTool::Memo));
        assert_eq!(memo["chunk_size"], 1000);
        assert_eq!(memo["access_tag"], "lp-safe");

        let sheet = tool_arguments("d1", &item("x.xlsx".into(), IngestTool::Spreadsheet));
        assert_eq!(sheet["sheet_hints"], json!(["P&L", "Balance Sheet"]));
        assert_eq!(sheet["version"], "v1");
        assert_eq!(sheet["deal_id"], "d1");

        let edgar = tool_arguments("d1", &item("e.csv".into(), IngestTool::RegulatoryFiling));
        assert_eq!(edgar["version"], "v1");
        assert!(edgar.get("sheet_hints").is_none());
    }

    #[tokio::test]
    async fn test_sheet_failure_retried_without_hints() {
        let tools = MockToolCaller::new()
            .fail_once("ingest_excel", "sheet 'P&L' not found")
            .respond("ingest_excel", json!({"cells": 120}));
        let agent = IngestionAgent::new(&tools);
        let plan = vec![item("d/model.xlsx".into(), IngestTool::Spreadsheet)];

        let results = agent.execute("d1", &plan).await;
        assert_eq!(results.ingested.len(), 1);
        assert!(results.errors.is_empty());

        let calls = tools.calls_to("ingest_excel");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1]["sheet_hints"], json!([]));
    }

    #[tokio::test]
    async fn test_non_sheet_failure_is_recorded() {
        let tools = MockToolCaller::new()
            .fail("ingest_excel", "HTTP 500: boom")
            .respond("ingest_memo", json!({"chunks": 4}));
        let agent = IngestionAgent::new(&tools);
        let plan = vec![
            item("d/memo.txt".into(), IngestTool::Memo),
            item("d/model.xlsx".into(), IngestTool::Spreadsheet),
        ];

        let results = agent.execute("d1", &plan).await;
        assert_eq!(results.ingested.len(), 1);
        assert_eq!(results.errors.len(), 1);
        assert_eq!(results.errors[0].tool, Some(IngestTool::Spreadsheet));
        assert_eq!(tools.calls_to("ingest_excel").len(), 1);
    }

    #[tokio::test]
    async fn test_ingest_all_empty_dir() {
        let dir = fixtures::data_dir(&[]);
        let tools = MockToolCaller::new();
        let agent = IngestionAgent::new(&tools);
        let (_, results) = agent.ingest_all("d1", dir.path(), true).await;
        assert!(results.ingested.is_empty());
        assert!(results.errors[0].error.starts_with("No files found in"));
        assert!(tools.calls().is_empty());
    }

    #[tokio::test]
    async fn test_assisted_plan_falls_back_on_garbage() {
        let tools = MockToolCaller::new();
        let gen = generator("I would ingest the memo first.");
        let agent = IngestionAgent::new(&tools).with_generator(Some(&gen));
        let f = files(&["m.txt"], &["x.xlsx"], &[]);
        assert_eq!(agent.plan(&f).await, plan_strategy(&f));
    }

    #[tokio::test]
    async fn test_assisted_plan_with_discovery() {
        let tools = MockToolCaller::new().with_tools(&["ingest_csv", "ingest_memo", "compute_kpis"]);
        let gen = generator(r#"[{"file": "d/erp.csv", "tool": "ingest_excel", "priority": 1}]"#);
        let agent = IngestionAgent::new(&tools)
            .with_generator(Some(&gen))
            .with_tool_discovery(true);
        let f = files(&["d/m.txt"], &[], &["d/erp.csv"]);
        let plan = agent.plan(&f).await;
        assert_eq!(plan[0].tool, IngestTool::Memo);
        assert_eq!(plan[1].tool, IngestTool::Tabular);
        assert_eq!(tools.listings(), 1);
    }

    #[tokio::test]
    async fn test_discovery_ignored_without_generator() {
        let tools = MockToolCaller::new().with_tools(&["ingest_csv", "ingest_memo"]);
        let agent = IngestionAgent::new(&tools).with_tool_discovery(true);
        let f = files(&["d/m.txt"], &["d/x.xlsx"], &["d/erp.csv"]);
        assert_eq!(agent.plan(&f).await, plan_strategy(&f));
        assert_eq!(tools.listings(), 0);
    }

    #[test]
    fn test_validate_verdicts() {
        let empty = validate(&IngestResults::default());
        assert!(!empty.passed);
        assert!(empty.warnings.contains(&"No files were successfully ingested".to_string()));

        let partial = IngestResults {
            ingested: vec![IngestedItem {
                tool: IngestTool::Memo,
                source_path: "m.txt".into(),
                result: json!({}),
            }],
            errors: vec![
                IngestFailure { source: "a.csv".into(), tool: Some(IngestTool::Tabular), error: "x".into() },
                IngestFailure { source: "b.csv".into(), tool: Some(IngestTool::Tabular), error: "y".into() },
            ],
        };
        let v = validate(&partial);
        assert!(v.passed);
        assert!(v.warnings.contains(&"2 files failed to ingest".to_string()));
        assert_eq!(v.recommendations.len(), 1);
        assert!(v.errors().is_empty());
    }
}
