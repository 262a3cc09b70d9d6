use std::path::PathBuf;

use serde_json::json;
use tracing::debug;

use onepager_core::error::Result;
use onepager_core::types::{parse_snapshot, SnapshotEntry};

/// On-disk copy of the approved snapshot for a (company, period).
#[derive(Debug, Clone)]
pub struct GoldenFactsStore {
    dir: PathBuf,
}

impl GoldenFactsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, company: &str, period_end: &str) -> PathBuf {
        self.dir
            .join(format!("{}_{}.json", slug(company), slug(period_end)))
    }

    /// Write the snapshot as `{"snapshot": [...]}` and return the path.
    pub async fn save(
        &self,
        company: &str,
        period_end: &str,
        snapshot: &[SnapshotEntry],
    ) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path(company, period_end);
        let body = serde_json::to_string_pretty(&json!({ "snapshot": snapshot }))?;
        tokio::fs::write(&path, body).await?;
        debug!(path = %path.display(), entries = snapshot.len(), "Golden facts saved");
        Ok(path)
    }

    /// Read a previously saved snapshot. `Ok(None)` when no file exists.
    pub async fn load(&self, company: &str, period_end: &str) -> Result<Option<Vec<SnapshotEntry>>> {
        let path = self.path(company, period_end);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let doc: serde_json::Value = serde_json::from_str(&text)?;
        let list = doc.get("snapshot").cloned().unwrap_or(doc);
        parse_snapshot("golden_facts", &list).map(Some)
    }
}

/// Filesystem-safe slug: spaces and path separators become `_`.
pub fn slug(value: &str) -> String {
    if value.is_empty() {
        return "unknown".to_string();
    }
    value.replace([' ', '/', '\\'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use onepager_core::types::MetricValue;

    #[test]
    fn test_slug() {
        assert_eq!(slug("Acme Software, Inc."), "Acme_Software,_Inc.");
        assert_eq!(slug("2025/09\\30"), "2025_09_30");
        assert_eq!(slug(""), "unknown");
    }

    #[test]
    fn test_path_layout() {
        let store = GoldenFactsStore::new("golden_facts");
        assert_eq!(
            store.path("Acme Co", "2025-09-30"),
            PathBuf::from("golden_facts/Acme_Co_2025-09-30.json")
        );
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = GoldenFactsStore::new(dir.path().join("gf"));
        let snapshot = vec![
            SnapshotEntry::new("Revenue_LTM", MetricValue::Number(42.5), Some("USD_m")),
            SnapshotEntry::new("Gross_Margin", MetricValue::Text("n/a".into()), None),
        ];

        let path = store.save("Acme Co", "2025-09-30", &snapshot).await.unwrap();
        assert!(path.exists());

        let loaded = store.load("Acme Co", "2025-09-30").await.unwrap().unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = GoldenFactsStore::new(dir.path());
        assert!(store.load("Nobody", "2020-01-01").await.unwrap().is_none());
    }
}
