use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, info};

use rmcp::model::CallToolRequestParams;
use rmcp::service::RunningService;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransport;
use rmcp::{RoleClient, ServiceExt};

use onepager_core::config::ToolServiceConfig;
use onepager_core::error::{OnePagerError, Result};
use onepager_core::traits::{ToolCaller, ToolConnector};
use onepager_core::types::ToolDescriptor;

use crate::decode::decode_tool_result;
use crate::handler::OnePagerClientHandler;

type ToolConnection = RunningService<RoleClient, OnePagerClientHandler>;

/// A session on an MCP server spoken to over streamable HTTP.
///
/// The transport owns the protocol session: it attaches the server-issued
/// session header to every request and matches responses to request ids,
/// so server notifications interleaved with a result are routed to the
/// handler instead of being mistaken for the answer.
pub struct McpToolClient {
    connection: ToolConnection,
    session_id: String,
    call_timeout: Duration,
}

impl McpToolClient {
    /// Perform the `initialize` handshake.
    ///
    /// The session is identified by the server implementation named in the
    /// initialize result. A handshake that fails, times out, or returns no
    /// result is a [`OnePagerError::Session`].
    pub async fn initialize(config: &ToolServiceConfig, client_label: &str) -> Result<Self> {
        let handler = OnePagerClientHandler::new(client_label, &config.protocol_version);
        let transport = StreamableHttpClientTransport::from_uri(config.server_url.as_str());
        let init_timeout = Duration::from_secs(config.init_timeout_secs);

        let connection = tokio::time::timeout(
            init_timeout,
            <OnePagerClientHandler as ServiceExt<RoleClient>>::serve(handler, transport),
        )
        .await
        .map_err(|_| {
            OnePagerError::Session(format!(
                "initialize with {} timed out after {}s",
                config.server_url,
                init_timeout.as_secs()
            ))
        })?
        .map_err(|e| {
            OnePagerError::Session(format!("initialize with {} failed: {}", config.server_url, e))
        })?;

        let session_id = connection
            .peer_info()
            .map(|info| format!("{}/{}", info.server_info.name, info.server_info.version))
            .ok_or_else(|| {
                OnePagerError::Session(format!(
                    "no initialize result returned by {}",
                    config.server_url
                ))
            })?;

        info!(server = %config.server_url, session = %session_id, "Tool service session initialized");

        Ok(Self {
            connection,
            session_id,
            call_timeout: Duration::from_secs(config.call_timeout_secs),
        })
    }

    fn timed_out(&self, label: &str) -> OnePagerError {
        OnePagerError::remote(
            label,
            format!("timed out after {}s", self.call_timeout.as_secs()),
        )
    }
}

impl ToolCaller for McpToolClient {
    fn call_tool(&self, name: &str, arguments: Value) -> BoxFuture<'_, Result<Value>> {
        let name = name.to_string();
        Box::pin(async move {
            let params = CallToolRequestParams {
                name: name.clone().into(),
                arguments: arguments.as_object().cloned(),
                meta: None,
                task: None,
            };
            debug!(tool = %name, "Tool service request");

            let result = tokio::time::timeout(self.call_timeout, self.connection.call_tool(params))
                .await
                .map_err(|_| self.timed_out(&name))?
                .map_err(|e| OnePagerError::remote(&name, e.to_string()))?;

            decode_tool_result(&name, result)
        })
    }

    fn list_tools(&self) -> BoxFuture<'_, Result<Vec<ToolDescriptor>>> {
        Box::pin(async move {
            let tools = tokio::time::timeout(self.call_timeout, self.connection.list_all_tools())
                .await
                .map_err(|_| self.timed_out("tools/list"))?
                .map_err(|e| OnePagerError::remote("tools/list", e.to_string()))?;

            debug!(count = tools.len(), "Listed tool service tools");
            tools
                .iter()
                .map(|tool| {
                    serde_json::to_value(tool)
                        .and_then(serde_json::from_value)
                        .map_err(|e| {
                            OnePagerError::remote("tools/list", format!("malformed tool list: {}", e))
                        })
                })
                .collect()
        })
    }

    fn session_id(&self) -> &str {
        &self.session_id
    }
}

/// Opens [`McpToolClient`] sessions against the configured server.
pub struct McpConnector {
    config: ToolServiceConfig,
}

impl McpConnector {
    pub fn new(config: ToolServiceConfig) -> Self {
        Self { config }
    }
}

impl ToolConnector for McpConnector {
    fn connect(&self, client_label: &str) -> BoxFuture<'_, Result<Arc<dyn ToolCaller>>> {
        let label = client_label.to_string();
        Box::pin(async move {
            let client = McpToolClient::initialize(&self.config, &label).await?;
            Ok(Arc::new(client) as Arc<dyn ToolCaller>)
        })
    }
}
