use std::path::PathBuf;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use onepager_core::config::TraceConfig;

use crate::golden_facts::slug;

/// Append-only JSONL trace, one file per run id.
///
/// Each line is `{ts, run_id, node, event, ...fields}`. Until a run id is
/// known every call is a no-op, so early steps leave no trace file behind.
#[derive(Debug, Clone)]
pub struct TraceLog {
    dir: PathBuf,
    enabled: bool,
}

impl TraceLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            enabled: true,
        }
    }

    pub fn from_config(config: &TraceConfig) -> Self {
        Self {
            enabled: config.enabled,
            ..Self::new(&config.dir)
        }
    }

    /// Trace file for a run. The run id comes from the tool service, so
    /// path separators are flattened to keep the file inside the trace dir.
    pub fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", slug(run_id)))
    }

    /// Append one event. Write failures are logged, never returned.
    pub async fn record(&self, run_id: Option<&str>, node: &str, event: &str, fields: Value) {
        let Some(run_id) = run_id.filter(|id| !id.is_empty()) else {
            return;
        };
        if !self.enabled {
            return;
        }

        let line = match serde_json::to_string(&entry(run_id, node, event, fields)) {
            Ok(json) => format!("{}\n", json),
            Err(e) => {
                warn!(error = %e, "Failed to serialize trace entry");
                return;
            }
        };

        if let Err(e) = self.append(run_id, line.as_bytes()).await {
            warn!(error = %e, run_id, "Failed to write trace entry");
        }
    }

    async fn append(&self, run_id: &str, bytes: &[u8]) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(run_id);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        debug!(path = %path.display(), "Trace entry written");
        Ok(())
    }
}

fn entry(run_id: &str, node: &str, event: &str, fields: Value) -> Map<String, Value> {
    let mut record = Map::new();
    record.insert("ts".into(), Value::String(Utc::now().to_rfc3339()));
    record.insert("run_id".into(), Value::String(run_id.to_string()));
    record.insert("node".into(), Value::String(node.to_string()));
    record.insert("event".into(), Value::String(event.to_string()));
    if let Value::Object(extra) = fields {
        for (k, v) in extra {
            record.entry(k).or_insert(v);
        }
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_shape() {
        let e = entry("run-7", "finalize", "step_finished", json!({"elapsed_ms": 3, "node": "ignored"}));
        assert_eq!(e["run_id"], "run-7");
        assert_eq!(e["node"], "finalize");
        assert_eq!(e["event"], "step_finished");
        assert_eq!(e["elapsed_ms"], 3);
        assert!(e.contains_key("ts"));
    }

    #[tokio::test]
    async fn test_noop_without_run_id() {
        let dir = tempfile::tempdir().unwrap();
        let log = TraceLog::new(dir.path().join("logs"));
        log.record(None, "ingest", "step_finished", json!({})).await;
        log.record(Some(""), "ingest", "step_finished", json!({})).await;
        assert!(!dir.path().join("logs").exists());
    }

    #[tokio::test]
    async fn test_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = TraceLog::new(dir.path());
        log.record(Some("r1"), "register_output", "step_finished", json!({"errors": 0})).await;
        log.record(Some("r1"), "finalize", "run_complete", json!({"success": true})).await;

        let text = std::fs::read_to_string(log.path_for("r1")).unwrap();
        let lines: Vec<Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["node"], "register_output");
        assert_eq!(lines[1]["success"], true);
    }

    #[tokio::test]
    async fn test_run_id_cannot_escape_trace_dir() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");
        let log = TraceLog::new(&logs);

        assert_eq!(log.path_for("../x").parent(), Some(logs.as_path()));
        assert_eq!(log.path_for("a/b\\c").parent(), Some(logs.as_path()));

        log.record(Some("../x"), "register_output", "step_finished", json!({})).await;
        assert!(logs.join(".._x.jsonl").exists());
        assert!(!dir.path().join("x.jsonl").exists());
    }

    #[tokio::test]
    async fn test_disabled_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let log = TraceLog::from_config(&TraceConfig {
            enabled: false,
            dir: dir.path().join("logs").display().to_string(),
        });
        log.record(Some("r1"), "finalize", "run_complete", json!({})).await;
        assert!(!dir.path().join("logs").exists());
    }
}
