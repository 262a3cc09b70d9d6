pub mod providers;
pub mod retry;
pub mod streaming;

use onepager_core::config::{AppConfig, ModelConfig};
use onepager_core::traits::LlmClient;
use tracing::debug;

pub use providers::openai::OpenAiClient;
pub use retry::RetryingClient;

/// Create an LLM client based on the provider name.
///
/// Ollama, vLLM, Groq, OpenRouter etc. all speak the OpenAI wire format,
/// so every provider maps onto [`OpenAiClient`] with its own `base_url`.
pub fn create_client(config: &ModelConfig) -> Box<dyn LlmClient> {
    if config.provider != "openai" {
        debug!(provider = %config.provider, "Using OpenAI-compatible client");
    }
    Box::new(OpenAiClient::new())
}

/// Build the configured generative helper client, wrapped with retries and
/// fallback models. Returns `None` when no model is configured.
pub fn client_from_config(config: &AppConfig) -> Option<(Box<dyn LlmClient>, ModelConfig)> {
    let model = config.model.clone()?;
    let fallbacks = config
        .fallback_models
        .iter()
        .map(|fb| (fb.clone(), create_client(fb)))
        .collect();
    let retry = model.retry.clone().unwrap_or_default();
    let client = RetryingClient::new(create_client(&model), fallbacks, retry);
    Some((Box::new(client), model))
}
