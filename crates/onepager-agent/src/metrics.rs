use std::collections::HashSet;

use serde_json::{json, Map, Value};
use tracing::{info, warn};

use onepager_core::config::MetricsParams;
use onepager_core::error::Result;
use onepager_core::traits::ToolCaller;
use onepager_core::types::{MetricsResult, Verdict};

use crate::generator::TextGenerator;

pub const COMPUTE_TOOL: &str = "compute_kpis";
pub const SNAPSHOT_TOOL: &str = "get_golden_facts";

/// Metrics every one-pager is expected to carry.
pub const REQUIRED_KPIS: [&str; 4] = ["Revenue_LTM", "YoY_Growth", "Gross_Margin", "EBITDA_Margin"];

const PARAMS_SYSTEM_PROMPT: &str = "You are a financial analyst. \
Determine optimal KPI computation parameters based on data quality.";

/// Outcome of the pre-computation data check.
#[derive(Debug, Clone, PartialEq)]
pub struct DataQuality {
    pub has_data: bool,
    pub note: String,
}

/// KPI computation helper bound to one session.
pub struct MetricsAgent<'a> {
    tools: &'a dyn ToolCaller,
    generator: Option<&'a TextGenerator>,
    tool_discovery: bool,
}

impl<'a> MetricsAgent<'a> {
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

    /// Compute KPIs for a deal.
    ///
    /// Explicit `params` win. Otherwise the generative helper (if any) picks
    /// them, falling back to `{4, true, 90}`. A result without a `created`
    /// list is a contract violation.
    pub async fn compute(&self, deal_id: &str, params: Option<&MetricsParams>) -> Result<MetricsResult> {
        let mut args = match params {
            Some(p) => to_map(p),
            None => self.determine_parameters(deal_id).await,
        };
        args.insert("deal_id".into(), json!(deal_id));

        let result = self.tools.call_tool(COMPUTE_TOOL, Value::Object(args)).await?;
        let metrics = MetricsResult::from_value(result)?;
        info!(created = metrics.created.len(), "KPIs computed");
        Ok(metrics)
    }

    /// Ask the tool service whether a snapshot already has entries.
    pub async fn assess_data_quality(&self, deal_id: &str) -> DataQuality {
        match self.tools.call_tool(SNAPSHOT_TOOL, json!({"deal_id": deal_id})).await {
            Ok(result) => {
                let has_data = result
                    .get("snapshot")
                    .and_then(|s| s.as_array())
                    .is_some_and(|s| !s.is_empty());
                DataQuality {
                    has_data,
                    note: if has_data { "good" } else { "poor" }.to_string(),
                }
            }
            Err(e) => DataQuality {
                has_data: false,
                note: format!("unknown ({})", e),
            },
        }
    }

    async fn determine_parameters(&self, deal_id: &str) -> Map<String, Value> {
        let defaults = to_map(&MetricsParams::default());
        let Some(generator) = self.generator else {
            return defaults;
        };

        let quality = self.assess_data_quality(deal_id).await;
        if !quality.has_data {
            warn!(quality = %quality.note, "Limited data available for KPI computation");
        }

        let allowed = if self.tool_discovery {
            self.compute_tool_parameters().await
        } else {
            None
        };

        let user = format!(
            "Data quality: {} (existing approved KPIs: {})\n\n\
             Determine parameters:\n\
             - periods_to_sum: How many periods to sum for LTM (typically 4 for quarterly)\n\
             - approve: Whether to auto-approve KPIs (true/false)\n\
             - ttl_days: Time-to-live for KPI values (typically 90)\n\n\
             Return JSON:\n{{\"periods_to_sum\": 4, \"approve\": true, \"ttl_days\": 90}}",
            quality.note, quality.has_data
        );

        let proposed = match generator.complete_json(PARAMS_SYSTEM_PROMPT, &user).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Parameter selection failed, using defaults");
                return defaults;
            }
        };
        let params: MetricsParams = match serde_json::from_value(proposed) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Model proposed unusable parameters, using defaults");
                return defaults;
            }
        };

        let mut args = to_map(&params);
        if let Some(allowed) = allowed {
            args.retain(|k, _| allowed.contains(k));
        }
        args
    }

    /// Property names of the advertised `compute_kpis` schema.
    async fn compute_tool_parameters(&self) -> Option<HashSet<String>> {
        let tools = match self.tools.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                warn!(error = %e, "Tool discovery failed");
                return None;
            }
        };
        match tools.into_iter().find(|t| t.name == COMPUTE_TOOL) {
            Some(tool) => Some(tool.parameter_names().into_iter().collect()),
            None => {
                warn!(tool = COMPUTE_TOOL, "Metrics tool not advertised by the service");
                None
            }
        }
    }
}

fn to_map(params: &MetricsParams) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("periods_to_sum".into(), json!(params.periods_to_sum));
    map.insert("approve".into(), json!(params.approve));
    map.insert("ttl_days".into(), json!(params.ttl_days));
    map
}

/// Judge a KPI computation.
pub fn validate(metrics: &MetricsResult) -> Verdict {
    let mut verdict = Verdict::pass();
    let count = metrics.created.len();

    if count == 0 {
        verdict.fail("No KPIs were computed");
    } else if count < REQUIRED_KPIS.len() {
        verdict.warn(format!("Only {} KPIs computed (expected 4+)", count));
    }

    let created = metrics.created_names();
    let missing: Vec<&str> = REQUIRED_KPIS
        .iter()
        .copied()
        .filter(|k| !created.iter().any(|c| c == k))
        .collect();
    if !missing.is_empty() {
        verdict.warn(format!("Missing KPIs: {}", missing.join(", ")));
    }

    verdict
}

#[cfg(test)]
mod tests {
    use super::*;
    use onepager_test_utils::{MockLlm, MockToolCaller};

    fn generator(reply: &str) -> TextGenerator {
        TextGenerator::new(
            Box::new(MockLlm::reply(reply)),
            serde_json::from_value(json!({})).unwrap(),
        )
    }

    fn created(names: &[&str]) -> MetricsResult {
        MetricsResult::from_value(json!({
            "created": names.iter().map(|n| json!({"kpi": n})).collect::<Vec<_>>()
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_default_parameters() {
        let tools = MockToolCaller::new().respond("compute_kpis", json!({"created": []}));
        let agent = MetricsAgent::new(&tools);
        agent.compute("d1", None).await.unwrap();

        let args = &tools.calls_to("compute_kpis")[0];
        assert_eq!(args["deal_id"], "d1");
        assert_eq!(args["periods_to_sum"], 4);
        assert_eq!(args["approve"], true);
        assert_eq!(args["ttl_days"], 90);
        // No helper, so no data-quality probe.
        assert!(tools.calls_to("get_golden_facts").is_empty());
    }

    #[tokio::test]
    async fn test_explicit_parameters_win() {
        let tools = MockToolCaller::new().respond("compute_kpis", json!({"created": []}));
        let gen = generator(r#"{"periods_to_sum": 12}"#);
        let agent = MetricsAgent::new(&tools).with_generator(Some(&gen));
        let params = MetricsParams {
            periods_to_sum: 8,
            approve: false,
            ttl_days: 30,
        };
        agent.compute("d1", Some(&params)).await.unwrap();

        let args = &tools.calls_to("compute_kpis")[0];
        assert_eq!(args["periods_to_sum"], 8);
        assert_eq!(args["approve"], false);
        assert!(tools.calls_to("get_golden_facts").is_empty());
    }

    #[tokio::test]
    async fn test_model_parameters_with_schema_filter() {
        let tools = MockToolCaller::new()
            .respond("get_golden_facts", json!({"snapshot": [{"kpi": "Revenue_LTM", "value": 1}]}))
            .respond("compute_kpis", json!({"created": []}))
            .with_tool_schema("compute_kpis", &["deal_id", "periods_to_sum", "approve"]);
        let gen = generator(r#"{"periods_to_sum": 8, "approve": true, "ttl_days": 30}"#);
        let agent = MetricsAgent::new(&tools)
            .with_generator(Some(&gen))
            .with_tool_discovery(true);
        agent.compute("d1", None).await.unwrap();

        let args = &tools.calls_to("compute_kpis")[0];
        assert_eq!(args["periods_to_sum"], 8);
        assert!(args.get("ttl_days").is_none());
        assert_eq!(tools.calls_to("get_golden_facts").len(), 1);
    }

    #[tokio::test]
    async fn test_model_failure_uses_defaults() {
        let tools = MockToolCaller::new()
            .fail("get_golden_facts", "HTTP 503")
            .respond("compute_kpis", json!({"created": []}));
        let gen = TextGenerator::new(
            Box::new(MockLlm::failing("HTTP 500: down")),
            serde_json::from_value(json!({})).unwrap(),
        );
        let agent = MetricsAgent::new(&tools).with_generator(Some(&gen));
        agent.compute("d1", None).await.unwrap();
        assert_eq!(tools.calls_to("compute_kpis")[0]["periods_to_sum"], 4);
    }

    #[tokio::test]
    async fn test_missing_created_is_contract_violation() {
        let tools = MockToolCaller::new().respond("compute_kpis", json!({"raw": "done"}));
        let err = MetricsAgent::new(&tools).compute("d1", None).await.unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[tokio::test]
    async fn test_remote_failure_is_not_contract_violation() {
        let tools = MockToolCaller::new().fail("compute_kpis", "HTTP 500");
        let err = MetricsAgent::new(&tools).compute("d1", None).await.unwrap_err();
        assert!(!err.is_contract_violation());
    }

    #[test]
    fn test_validate_none_created() {
        let v = validate(&created(&[]));
        assert!(!v.passed);
        assert_eq!(v.warnings[0], "No KPIs were computed");
        assert_eq!(
            v.warnings[1],
            "Missing KPIs: Revenue_LTM, YoY_Growth, Gross_Margin, EBITDA_Margin"
        );
    }

    #[test]
    fn test_validate_partial() {
        let v = validate(&created(&["Revenue_LTM", "Gross_Margin"]));
        assert!(v.passed);
        assert_eq!(
            v.warnings,
            vec![
                "Only 2 KPIs computed (expected 4+)".to_string(),
                "Missing KPIs: YoY_Growth, EBITDA_Margin".to_string(),
            ]
        );
    }

    #[test]
    fn test_validate_complete() {
        let v = validate(&created(&REQUIRED_KPIS));
        assert!(v.passed);
        assert!(v.warnings.is_empty());
    }
}
