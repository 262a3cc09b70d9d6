use std::collections::VecDeque;
use std::sync::Mutex;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};

use onepager_core::config::ModelConfig;
use onepager_core::error::{OnePagerError, Result};
use onepager_core::traits::LlmClient;
use onepager_core::types::{ChatMessage, StopReason, StreamDelta};

enum Behavior {
    Replies(Mutex<VecDeque<Vec<String>>>),
    Fail(String),
}

/// Scripted generative helper.
pub struct MockLlm {
    behavior: Behavior,
}

impl MockLlm {
    /// Always answer with `text` in one chunk.
    pub fn reply(text: &str) -> Self {
        Self::chunked(&[text])
    }

    /// Always answer with `chunks`, streamed one delta each.
    pub fn chunked(chunks: &[&str]) -> Self {
        let chunks = chunks.iter().map(|c| c.to_string()).collect();
        Self {
            behavior: Behavior::Replies(Mutex::new(VecDeque::from(vec![chunks]))),
        }
    }

    /// Answer successive requests with `texts` in order; the last repeats.
    pub fn replies(texts: &[&str]) -> Self {
        let queue = texts.iter().map(|t| vec![t.to_string()]).collect();
        Self {
            behavior: Behavior::Replies(Mutex::new(queue)),
        }
    }

    /// Fail every request with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            behavior: Behavior::Fail(message.to_string()),
        }
    }

    fn next_reply(&self, queue: &Mutex<VecDeque<Vec<String>>>) -> Vec<String> {
        let mut queue = queue.lock().unwrap_or_else(|e| e.into_inner());
        if queue.len() > 1 {
            queue.pop_front().unwrap_or_default()
        } else {
            queue.front().cloned().unwrap_or_default()
        }
    }
}

impl LlmClient for MockLlm {
    fn chat_stream(
        &self,
        _config: &ModelConfig,
        _messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let result = match &self.behavior {
            Behavior::Fail(message) => Err(OnePagerError::LlmRequest(message.clone())),
            Behavior::Replies(queue) => {
                let mut deltas: Vec<Result<StreamDelta>> = self
                    .next_reply(queue)
                    .into_iter()
                    .map(|c| Ok(StreamDelta::TextDelta(c)))
                    .collect();
                deltas.push(Ok(StreamDelta::Usage {
                    input_tokens: 10,
                    output_tokens: 5,
                }));
                deltas.push(Ok(StreamDelta::Stop(StopReason::EndTurn)));
                Ok(stream::iter(deltas).boxed())
            }
        };
        Box::pin(async move { result })
    }
}
