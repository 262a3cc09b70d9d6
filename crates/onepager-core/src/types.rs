use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{OnePagerError, Result};

// ---------------------------------------------------------------------------
// Generative helper messages
// ---------------------------------------------------------------------------

/// Role in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A chat message sent to the generative helper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
            timestamp: Some(Utc::now()),
        }
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    EndTurn,
    MaxTokens,
}

/// A streaming delta from the generative helper.
#[derive(Debug, Clone)]
pub enum StreamDelta {
    TextDelta(String),
    Stop(StopReason),
    Usage { input_tokens: u64, output_tokens: u64 },
}

// ---------------------------------------------------------------------------
// Remote tool service
// ---------------------------------------------------------------------------

/// A tool advertised by the remote service via `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "inputSchema", alias = "input_schema")]
    pub input_schema: serde_json::Value,
}

impl ToolDescriptor {
    /// Property names declared by the tool's JSON schema.
    pub fn parameter_names(&self) -> Vec<String> {
        self.input_schema
            .get("properties")
            .and_then(|p| p.as_object())
            .map(|props| props.keys().cloned().collect())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Ingestion
// ---------------------------------------------------------------------------

/// Category a discovered data file falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCategory {
    Spreadsheet,
    Tabular,
    Memo,
}

impl FileCategory {
    /// Classify a file name by extension.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        if lower.ends_with(".xlsx") {
            Some(Self::Spreadsheet)
        } else if lower.ends_with(".csv") {
            Some(Self::Tabular)
        } else if lower.ends_with(".txt") || lower.ends_with(".md") {
            Some(Self::Memo)
        } else {
            None
        }
    }
}

impl std::fmt::Display for FileCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spreadsheet => write!(f, "spreadsheet"),
            Self::Tabular => write!(f, "tabular"),
            Self::Memo => write!(f, "memo"),
        }
    }
}

/// Discovered data files grouped by category, each list in discovery order.
pub type DiscoveredFiles = BTreeMap<FileCategory, Vec<PathBuf>>;

/// Remote ingestion tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IngestTool {
    #[serde(rename = "ingest_excel")]
    Spreadsheet,
    #[serde(rename = "ingest_csv")]
    Tabular,
    #[serde(rename = "ingest_memo")]
    Memo,
    #[serde(rename = "ingest_edgar_xbrl")]
    RegulatoryFiling,
}

impl IngestTool {
    pub const ALL: [IngestTool; 4] = [
        Self::Spreadsheet,
        Self::Tabular,
        Self::Memo,
        Self::RegulatoryFiling,
    ];

    /// Wire name of the tool.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spreadsheet => "ingest_excel",
            Self::Tabular => "ingest_csv",
            Self::Memo => "ingest_memo",
            Self::RegulatoryFiling => "ingest_edgar_xbrl",
        }
    }

    /// Scheduling priority; lower runs first.
    pub fn priority(&self) -> u8 {
        match self {
            Self::Memo => 1,
            Self::Spreadsheet => 2,
            Self::Tabular | Self::RegulatoryFiling => 3,
        }
    }
}

impl std::fmt::Display for IngestTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A planned (file, tool, priority) assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyItem {
    pub source_path: PathBuf,
    pub tool: IngestTool,
    pub priority: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestedItem {
    pub tool: IngestTool,
    pub source_path: PathBuf,
    pub result: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestFailure {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<IngestTool>,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestResults {
    pub ingested: Vec<IngestedItem>,
    pub errors: Vec<IngestFailure>,
}

impl IngestResults {
    pub fn has_tool(&self, tool: IngestTool) -> bool {
        self.ingested.iter().any(|i| i.tool == tool)
    }
}

// ---------------------------------------------------------------------------
// Verdicts
// ---------------------------------------------------------------------------

/// A step's self-reported pass/fail outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub passed: bool,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl Verdict {
    pub fn pass() -> Self {
        Self {
            passed: true,
            warnings: vec![],
            recommendations: vec![],
        }
    }

    /// Passed, but carrying a single warning.
    pub fn pass_with_warning(warning: impl Into<String>) -> Self {
        Self {
            passed: true,
            warnings: vec![warning.into()],
            recommendations: vec![],
        }
    }

    pub fn fail(&mut self, warning: impl Into<String>) {
        self.passed = false;
        self.warnings.push(warning.into());
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn recommend(&mut self, recommendation: impl Into<String>) {
        self.recommendations.push(recommendation.into());
    }

    /// Warnings to fold into the run's error list: only those of a failed verdict.
    pub fn errors(&self) -> Vec<String> {
        if self.passed {
            vec![]
        } else {
            self.warnings.clone()
        }
    }
}

impl Default for Verdict {
    fn default() -> Self {
        Self::pass()
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Result of the remote KPI computation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsResult {
    pub created: Vec<serde_json::Value>,
}

impl MetricsResult {
    /// Parse a decoded tool result. A missing or non-list `created` is an
    /// interop mismatch, not an empty result.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let created = value
            .get("created")
            .and_then(|c| c.as_array())
            .cloned()
            .ok_or_else(|| {
                OnePagerError::contract(
                    "compute_metrics",
                    format!("metrics result has no 'created' list: {}", preview(&value)),
                )
            })?;
        Ok(Self { created })
    }

    /// Names of the created metrics.
    pub fn created_names(&self) -> Vec<String> {
        self.created
            .iter()
            .filter_map(|m| m.get("kpi").and_then(|k| k.as_str()))
            .map(str::to_string)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// A metric value as received from the tool service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
    Other(serde_json::Value),
}

impl MetricValue {
    /// Convert textual numbers to numbers in place; unparseable text is kept.
    pub fn normalize(&mut self) {
        if let Self::Text(text) = self {
            if let Ok(n) = text.trim().parse::<f64>() {
                if n.is_finite() {
                    *self = Self::Number(n);
                }
            }
        }
    }
}

impl Default for MetricValue {
    fn default() -> Self {
        Self::Other(serde_json::Value::Null)
    }
}

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => f.write_str(s),
            Self::Other(v) => write!(f, "{}", v),
        }
    }
}

/// One approved metric in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    #[serde(rename = "kpi", alias = "name")]
    pub name: String,
    #[serde(default)]
    pub value: MetricValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Fields the renderer may need that this crate does not interpret.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SnapshotEntry {
    pub fn new(name: impl Into<String>, value: MetricValue, unit: Option<&str>) -> Self {
        Self {
            name: name.into(),
            value,
            unit: unit.map(str::to_string),
            extra: serde_json::Map::new(),
        }
    }
}

/// Parse a `snapshot` list, normalizing textual values.
pub fn parse_snapshot(step: &str, value: &serde_json::Value) -> Result<Vec<SnapshotEntry>> {
    let items = value
        .as_array()
        .ok_or_else(|| OnePagerError::contract(step, format!("snapshot is not a list: {}", preview(value))))?;

    let mut entries = Vec::with_capacity(items.len());
    for item in items {
        let mut entry: SnapshotEntry = serde_json::from_value(item.clone()).map_err(|e| {
            OnePagerError::contract(step, format!("malformed snapshot entry {}: {}", preview(item), e))
        })?;
        entry.value.normalize();
        entries.push(entry);
    }
    Ok(entries)
}

// ---------------------------------------------------------------------------
// Content
// ---------------------------------------------------------------------------

/// Narrative bullets for the one-pager.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentBullets {
    #[serde(default)]
    pub thesis: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
}

impl ContentBullets {
    pub fn total(&self) -> usize {
        self.thesis.len() + self.risks.len()
    }
}

// ---------------------------------------------------------------------------
// Run summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub success: bool,
    pub files_ingested: usize,
    pub kpis_computed: usize,
    pub snapshot_size: usize,
    pub bullets_generated: usize,
    pub output_file: Option<PathBuf>,
    pub retry_count: u32,
    pub run_id: Option<String>,
    pub path_taken: Vec<String>,
    pub errors: Vec<String>,
}

/// Truncate a JSON value for error messages.
fn preview(value: &serde_json::Value) -> String {
    let s = value.to_string();
    if s.len() <= 200 {
        s
    } else {
        let mut end = 200;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_file_category_by_extension() {
        assert_eq!(FileCategory::from_file_name("model.xlsx"), Some(FileCategory::Spreadsheet));
        assert_eq!(FileCategory::from_file_name("FIN.CSV"), Some(FileCategory::Tabular));
        assert_eq!(FileCategory::from_file_name("memo.txt"), Some(FileCategory::Memo));
        assert_eq!(FileCategory::from_file_name("notes.md"), Some(FileCategory::Memo));
        assert_eq!(FileCategory::from_file_name("deck.pdf"), None);
    }

    #[test]
    fn test_ingest_tool_names_and_priorities() {
        for tool in IngestTool::ALL {
            assert_eq!(serde_json::to_value(tool).unwrap(), json!(tool.as_str()));
        }
        assert_eq!(IngestTool::Memo.priority(), 1);
        assert_eq!(IngestTool::Spreadsheet.priority(), 2);
        assert_eq!(IngestTool::Tabular.priority(), 3);
        assert_eq!(IngestTool::RegulatoryFiling.priority(), 3);
    }

    #[test]
    fn test_verdict_errors_only_when_failed() {
        let mut v = Verdict::pass();
        v.warn("2 files failed to ingest");
        assert!(v.errors().is_empty());

        v.fail("No files were successfully ingested");
        assert_eq!(v.errors().len(), 2);
    }

    #[test]
    fn test_metric_value_normalization() {
        let mut v = MetricValue::Text("42.5".into());
        v.normalize();
        assert_eq!(v, MetricValue::Number(42.5));

        let mut v = MetricValue::Text("n/a".into());
        v.normalize();
        assert_eq!(v, MetricValue::Text("n/a".into()));

        let mut v = MetricValue::Text("NaN".into());
        v.normalize();
        assert_eq!(v, MetricValue::Text("NaN".into()));
    }

    #[test]
    fn test_parse_snapshot_normalizes_and_keeps_text() {
        let raw = json!([
            {"kpi": "Revenue_LTM", "value": "42.5", "unit": "USD_m", "period_end": "2025-09-30"},
            {"kpi": "Gross_Margin", "value": "approx. 70%", "unit": "pct"},
            {"name": "EBITDA_Margin", "value": 0.21}
        ]);
        let snapshot = parse_snapshot("fetch_snapshot", &raw).unwrap();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0].value, MetricValue::Number(42.5));
        assert_eq!(snapshot[0].extra.get("period_end"), Some(&json!("2025-09-30")));
        assert_eq!(snapshot[1].value, MetricValue::Text("approx. 70%".into()));
        assert_eq!(snapshot[2].name, "EBITDA_Margin");

        // Entries go back out with the wire key.
        let out = serde_json::to_value(&snapshot[0]).unwrap();
        assert_eq!(out["kpi"], "Revenue_LTM");
        assert_eq!(out["value"], 42.5);
    }

    #[test]
    fn test_parse_snapshot_rejects_non_list() {
        let err = parse_snapshot("fetch_snapshot", &json!({"kpi": "x"})).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_metrics_result_requires_created() {
        let ok = MetricsResult::from_value(json!({"created": [{"kpi": "Revenue_LTM"}]})).unwrap();
        assert_eq!(ok.created_names(), vec!["Revenue_LTM"]);

        let err = MetricsResult::from_value(json!({"raw": "oops"})).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_tool_descriptor_parameters() {
        let d: ToolDescriptor = serde_json::from_value(json!({
            "name": "compute_kpis",
            "description": "Compute KPIs",
            "inputSchema": {"type": "object", "properties": {"deal_id": {}, "ttl_days": {}}}
        }))
        .unwrap();
        let mut params = d.parameter_names();
        params.sort();
        assert_eq!(params, vec!["deal_id", "ttl_days"]);
    }
}
