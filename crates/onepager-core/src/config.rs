use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{OnePagerError, Result};

/// Top-level onepager configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub deal: DealConfig,
    #[serde(default)]
    pub tools: ToolServiceConfig,
    /// Generative helper. Absent = deterministic agents only.
    #[serde(default)]
    pub model: Option<ModelConfig>,
    #[serde(default)]
    pub fallback_models: Vec<ModelConfig>,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub trace: TraceConfig,
    #[serde(default)]
    pub golden_facts: GoldenFactsConfig,
}

/// The subject of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DealConfig {
    #[serde(default = "default_deal_id")]
    pub deal_id: String,
    #[serde(default = "default_company_name")]
    pub company_name: String,
    #[serde(default = "default_period_end")]
    pub period_end: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Directory for the rendered one-pager. Default: `data_dir`.
    #[serde(default)]
    pub output_dir: Option<String>,
}

impl Default for DealConfig {
    fn default() -> Self {
        Self {
            deal_id: default_deal_id(),
            company_name: default_company_name(),
            period_end: default_period_end(),
            data_dir: default_data_dir(),
            output_dir: None,
        }
    }
}

impl DealConfig {
    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(self.output_dir.as_deref().unwrap_or(&self.data_dir))
    }
}

fn default_deal_id() -> String { "00000000-0000-0000-0000-000000000001".to_string() }
fn default_company_name() -> String { "Acme Software, Inc.".to_string() }
fn default_period_end() -> String { "2025-09-30".to_string() }
fn default_data_dir() -> String { "./data".to_string() }

/// Remote tool-execution service (MCP over streamable HTTP).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolServiceConfig {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_client_label")]
    pub client_label: String,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    /// Per-call deadline for `tools/call` and `tools/list`.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    /// Deadline for the `initialize` handshake.
    #[serde(default = "default_init_timeout")]
    pub init_timeout_secs: u64,
}

impl Default for ToolServiceConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            client_label: default_client_label(),
            protocol_version: default_protocol_version(),
            call_timeout_secs: default_call_timeout(),
            init_timeout_secs: default_init_timeout(),
        }
    }
}

fn default_server_url() -> String { "http://localhost:3333/mcp".to_string() }
fn default_client_label() -> String { "onepager-orchestrator".to_string() }
fn default_protocol_version() -> String { "2024-11-05".to_string() }
fn default_call_timeout() -> u64 { 60 }
fn default_init_timeout() -> u64 { 10 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

fn default_provider() -> String { "openai".to_string() }
fn default_model_id() -> String { "gpt-3.5-turbo".to_string() }
fn default_max_tokens() -> u32 { 1024 }
fn default_temperature() -> f32 { 0.0 }

/// Retry configuration for LLM requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// Parameters for the remote metrics computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsParams {
    #[serde(default = "default_periods_to_sum")]
    pub periods_to_sum: u32,
    #[serde(default = "default_approve")]
    pub approve: bool,
    #[serde(default = "default_ttl_days")]
    pub ttl_days: u32,
}

impl Default for MetricsParams {
    fn default() -> Self {
        Self {
            periods_to_sum: default_periods_to_sum(),
            approve: default_approve(),
            ttl_days: default_ttl_days(),
        }
    }
}

fn default_periods_to_sum() -> u32 { 4 }
fn default_approve() -> bool { true }
fn default_ttl_days() -> u32 { 90 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Ask the tool service for its tool list before model-assisted selection.
    /// Only affects runs with a generator; rule-based planning never lists tools.
    #[serde(default)]
    pub tool_discovery: bool,
    /// Recipe name sent with `register_output`.
    #[serde(default = "default_recipe")]
    pub recipe: String,
    /// Explicit metrics parameters. Absent = agent decides (defaults or model).
    #[serde(default)]
    pub metrics: Option<MetricsParams>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            tool_discovery: false,
            recipe: default_recipe(),
            metrics: None,
        }
    }
}

fn default_recipe() -> String { "LP_OnePager_v1".to_string() }

/// JSONL trace log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_trace_dir")]
    pub dir: String,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_trace_dir(),
        }
    }
}

fn default_trace_dir() -> String { "logs".to_string() }

/// Persisted snapshot ("golden facts") configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldenFactsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_golden_facts_dir")]
    pub dir: String,
}

impl Default for GoldenFactsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_golden_facts_dir(),
        }
    }
}

fn default_golden_facts_dir() -> String { "golden_facts".to_string() }
fn default_true() -> bool { true }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| OnePagerError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| OnePagerError::Config(e.to_string()))
    }

    /// Load the file if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}
