use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tracing::{info, warn};

use onepager_core::config::{ModelConfig, RetryConfig};
use onepager_core::error::{OnePagerError, Result};
use onepager_core::traits::LlmClient;
use onepager_core::types::*;

/// An LLM client that retries failed requests and falls back to alternative models.
///
/// Only the generative helper retries; tool calls never do.
pub struct RetryingClient {
    primary: Box<dyn LlmClient>,
    fallbacks: Vec<(ModelConfig, Box<dyn LlmClient>)>,
    retry_config: RetryConfig,
}

impl RetryingClient {
    pub fn new(
        primary: Box<dyn LlmClient>,
        fallbacks: Vec<(ModelConfig, Box<dyn LlmClient>)>,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            primary,
            fallbacks,
            retry_config,
        }
    }
}

fn is_retryable(e: &OnePagerError) -> bool {
    match e {
        OnePagerError::LlmRequest(msg) => {
            ["429", "500", "502", "503", "timeout", "connection"]
                .iter()
                .any(|needle| msg.contains(needle))
        }
        OnePagerError::LlmStream(_) => true,
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl LlmClient for RetryingClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();

        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;

            let mut last_err = None;
            for attempt in 0..=max_retries {
                match self.primary.chat_stream(&config, messages.clone()).await {
                    Ok(stream) => return Ok(stream),
                    Err(e) if is_retryable(&e) && attempt < max_retries => {
                        let backoff = calculate_backoff(attempt, &self.retry_config);
                        warn!(
                            attempt = attempt + 1,
                            max_retries,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Retrying LLM request"
                        );
                        tokio::time::sleep(backoff).await;
                        last_err = Some(e);
                    }
                    Err(e) => {
                        last_err = Some(e);
                        break;
                    }
                }
            }

            if !self.fallbacks.is_empty() {
                info!("Primary LLM exhausted, trying fallback models");
            }
            for (fb_config, fb_client) in &self.fallbacks {
                match fb_client.chat_stream(fb_config, messages.clone()).await {
                    Ok(stream) => {
                        info!(model = %fb_config.model_id, "Fell back to alternative model");
                        return Ok(stream);
                    }
                    Err(e) => {
                        warn!(model = %fb_config.model_id, error = %e, "Fallback model also failed");
                    }
                }
            }

            Err(last_err.unwrap_or_else(|| OnePagerError::LlmRequest("All providers failed".into())))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FailingClient {
        calls: Arc<AtomicUsize>,
        message: &'static str,
    }

    impl LlmClient for FailingClient {
        fn chat_stream(
            &self,
            _config: &ModelConfig,
            _messages: Vec<ChatMessage>,
        ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let message = self.message;
            Box::pin(async move { Err(OnePagerError::LlmRequest(message.to_string())) })
        }
    }

    fn model() -> ModelConfig {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable(&OnePagerError::LlmRequest("HTTP 429: slow down".into())));
        assert!(is_retryable(&OnePagerError::LlmStream("eof".into())));
        assert!(!is_retryable(&OnePagerError::LlmRequest("HTTP 401: bad key".into())));
        assert!(!is_retryable(&OnePagerError::Config("x".into())));
    }

    #[test]
    fn test_backoff_is_capped() {
        let cfg = RetryConfig {
            max_retries: 10,
            initial_backoff_ms: 1000,
            max_backoff_ms: 4000,
        };
        let d = calculate_backoff(8, &cfg);
        assert!(d.as_millis() <= 4800);
    }

    #[tokio::test]
    async fn test_retries_transient_then_gives_up() {
        let calls = Arc::new(AtomicUsize::new(0));
        let client = RetryingClient::new(
            Box::new(FailingClient {
                calls: calls.clone(),
                message: "HTTP 503: unavailable",
            }),
            vec![],
            fast_retry(2),
        );
        let result = client.chat_stream(&model(), vec![ChatMessage::user("hi")]).await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let client = RetryingClient::new(
            Box::new(FailingClient {
                calls: calls.clone(),
                message: "HTTP 401: bad key",
            }),
            vec![],
            fast_retry(3),
        );
        assert!(client.chat_stream(&model(), vec![]).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
