use futures::StreamExt;
use serde_json::Value;
use tracing::debug;

use onepager_core::config::ModelConfig;
use onepager_core::error::{OnePagerError, Result};
use onepager_core::traits::LlmClient;
use onepager_core::types::{ChatMessage, StreamDelta};

/// The optional generative helper the step agents consult.
///
/// Collects a streamed completion into a single reply. Agents treat any
/// error from here as "no suggestion" and fall back to their rules.
pub struct TextGenerator {
    client: Box<dyn LlmClient>,
    config: ModelConfig,
}

impl TextGenerator {
    pub fn new(client: Box<dyn LlmClient>, config: ModelConfig) -> Self {
        Self { client, config }
    }

    pub fn model_id(&self) -> &str {
        &self.config.model_id
    }

    /// Run one system + user exchange and return the full text.
    pub async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let messages = vec![ChatMessage::system(system), ChatMessage::user(user)];
        let mut stream = self.client.chat_stream(&self.config, messages).await?;

        let mut text = String::new();
        while let Some(delta) = stream.next().await {
            match delta? {
                StreamDelta::TextDelta(chunk) => text.push_str(&chunk),
                StreamDelta::Usage {
                    input_tokens,
                    output_tokens,
                } => debug!(input_tokens, output_tokens, "Generator usage"),
                StreamDelta::Stop(_) => {}
            }
        }
        Ok(text)
    }

    /// Like [`complete`](Self::complete), but the reply must contain JSON.
    pub async fn complete_json(&self, system: &str, user: &str) -> Result<Value> {
        let text = self.complete(system, user).await?;
        extract_json(&text).ok_or_else(|| {
            OnePagerError::LlmParse(format!("no JSON in model reply: {}", truncate(&text, 120)))
        })
    }
}

/// Pull the first JSON array or object out of a model reply.
///
/// Handles bare JSON, fenced code blocks, and prose around the payload.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        if v.is_array() || v.is_object() {
            return Some(v);
        }
    }

    let start = trimmed.find(['[', '{'])?;
    let open = trimmed[start..].chars().next()?;
    let close = if open == '[' { ']' } else { '}' };
    let end = trimmed.rfind(close)?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
