use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use onepager_core::error::{OnePagerError, Result};
use onepager_core::types::{ContentBullets, MetricValue, SnapshotEntry, Verdict};

use crate::generator::TextGenerator;

const MAX_BULLETS: usize = 5;
const MIN_BULLETS: usize = 3;
const PROMPT_SNAPSHOT_LIMIT: usize = 10;

pub const FALLBACK_THESIS: [&str; 3] = [
    "Strong revenue growth trajectory with expanding market share",
    "Market leadership position maintained with strong competitive moat",
    "Operational efficiency improvements driving margin expansion",
];

pub const FALLBACK_RISKS: [&str; 3] = [
    "Customer concentration risk (mitigated by diversification efforts)",
    "Competitive pressure in core markets (stable landscape, strong moat)",
    "Macroeconomic uncertainty (strong retention metrics provide stability)",
];

const THESIS_SYSTEM_PROMPT: &str = "You are a financial analyst generating investment thesis \
bullets for LP one-pagers. Focus on strengths, opportunities, and competitive advantages. \
Be specific and data-driven.";

const RISKS_SYSTEM_PROMPT: &str = "You are a financial analyst identifying key risks with \
mitigants for LP one-pagers. Focus on realistic risks and how they are being addressed. \
Be specific and balanced.";

/// The fixed bullets used whenever generation is unavailable or fails.
pub fn fallback_bullets() -> ContentBullets {
    ContentBullets {
        thesis: FALLBACK_THESIS.iter().map(|s| s.to_string()).collect(),
        risks: FALLBACK_RISKS.iter().map(|s| s.to_string()).collect(),
    }
}

/// Headline figures pulled from a snapshot to steer generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Trends {
    pub revenue: Option<MetricValue>,
    pub growth: Option<MetricValue>,
    pub margins: Vec<(String, MetricValue)>,
}

pub fn analyze_trends(snapshot: &[SnapshotEntry]) -> Trends {
    let mut trends = Trends::default();
    for entry in snapshot {
        let name = entry.name.to_lowercase();
        if name.contains("revenue") {
            trends.revenue = Some(entry.value.clone());
        }
        if name.contains("growth") {
            trends.growth = Some(entry.value.clone());
        }
        if name.contains("margin") {
            trends.margins.push((entry.name.clone(), entry.value.clone()));
        }
    }
    trends
}

fn snapshot_lines(snapshot: &[SnapshotEntry]) -> String {
    snapshot
        .iter()
        .take(PROMPT_SNAPSHOT_LIMIT)
        .map(|e| {
            let unit = e.unit.as_deref().unwrap_or("");
            format!("- {}: {} {}", e.name, e.value, unit)
                .trim_end()
                .to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Accept `["..."]` or `{"<key>": ["..."]}`; keep non-empty strings, at most five.
fn bullet_list(value: &Value, key: &str) -> Result<Vec<String>> {
    let items = value
        .as_array()
        .or_else(|| value.get(key).and_then(|v| v.as_array()))
        .ok_or_else(|| OnePagerError::LlmParse(format!("expected a list of {} bullets", key)))?;

    Ok(items
        .iter()
        .filter_map(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .take(MAX_BULLETS)
        .map(str::to_string)
        .collect())
}

/// Narrative helper.
pub struct ContentAgent<'a> {
    generator: Option<&'a TextGenerator>,
}

impl<'a> ContentAgent<'a> {
    pub fn new(generator: Option<&'a TextGenerator>) -> Self {
        Self { generator }
    }

    /// Thesis and risk bullets for the snapshot. Never fails: without a
    /// helper, or on any generation error, the fixed fallback is returned.
    pub async fn generate(&self, deal_id: &str, snapshot: &[SnapshotEntry]) -> ContentBullets {
        let Some(generator) = self.generator else {
            info!(deal_id, "No generative helper configured, using fallback content");
            return fallback_bullets();
        };

        match self.generate_with(generator, snapshot).await {
            Ok(bullets) => {
                info!(
                    thesis = bullets.thesis.len(),
                    risks = bullets.risks.len(),
                    "Generated content"
                );
                bullets
            }
            Err(e) => {
                warn!(error = %e, "Content generation failed, using fallback content");
                fallback_bullets()
            }
        }
    }

    async fn generate_with(
        &self,
        generator: &TextGenerator,
        snapshot: &[SnapshotEntry],
    ) -> Result<ContentBullets> {
        let lines = snapshot_lines(snapshot);
        let trends = serde_json::to_string(&analyze_trends(snapshot))?;

        let thesis_prompt = format!(
            "Financial Snapshot:\n{}\n\nTrends:\n{}\n\n\
             Generate 3-5 investment thesis bullets highlighting strengths and opportunities.\n\
             Return JSON array: [\"bullet 1\", \"bullet 2\", ...]",
            lines, trends
        );
        let risks_prompt = format!(
            "Financial Snapshot:\n{}\n\nTrends:\n{}\n\n\
             Generate 3-5 key risks with mitigants.\n\
             Return JSON array: [\"risk 1 (mitigant: ...)\", \"risk 2 (mitigant: ...)\", ...]",
            lines, trends
        );

        let thesis = generator.complete_json(THESIS_SYSTEM_PROMPT, &thesis_prompt).await?;
        let risks = generator.complete_json(RISKS_SYSTEM_PROMPT, &risks_prompt).await?;

        Ok(ContentBullets {
            thesis: bullet_list(&thesis, "thesis")?,
            risks: bullet_list(&risks, "risks")?,
        })
    }
}

/// Judge generated content.
pub fn validate(bullets: &ContentBullets) -> Verdict {
    let mut verdict = Verdict::pass();
    let (thesis, risks) = (bullets.thesis.len(), bullets.risks.len());

    if thesis < MIN_BULLETS {
        verdict.warn(format!("Only {} thesis bullets generated (recommended: 3-5)", thesis));
    }
    if risks < MIN_BULLETS {
        verdict.warn(format!("Only {} risk bullets generated (recommended: 3-5)", risks));
    }
    if thesis == 0 || risks == 0 {
        verdict.passed = false;
    }
    verdict
}
