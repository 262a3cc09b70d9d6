use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::types::*;

/// Streaming chat completion used by the generative helper.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a chat request and receive a stream of deltas.
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>>;
}

/// A session-scoped handle on the remote tool service.
pub trait ToolCaller: Send + Sync + 'static {
    /// Call a tool and return its decoded result.
    fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> BoxFuture<'_, Result<serde_json::Value>>;

    /// List the tools the service advertises.
    fn list_tools(&self) -> BoxFuture<'_, Result<Vec<ToolDescriptor>>>;

    /// Session identifier attached to every call.
    fn session_id(&self) -> &str;
}

/// Opens a session on the remote tool service.
///
/// The initialize step goes through this seam so a run can be driven
/// against a scripted service.
pub trait ToolConnector: Send + Sync + 'static {
    fn connect(&self, client_label: &str) -> BoxFuture<'_, Result<Arc<dyn ToolCaller>>>;
}
