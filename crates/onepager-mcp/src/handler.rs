use std::future::Future;

use tracing::debug;

use rmcp::handler::client::ClientHandler;
use rmcp::model::{
    ClientCapabilities, ClientInfo, Implementation, LoggingMessageNotificationParam,
    ProgressNotificationParam, ProtocolVersion,
};
use rmcp::service::NotificationContext;
use rmcp::RoleClient;

/// Client side of a tool service session.
///
/// Announces the run's client label during `initialize` and logs whatever
/// the server pushes between responses.
pub struct OnePagerClientHandler {
    client_label: String,
    protocol_version: ProtocolVersion,
}

impl OnePagerClientHandler {
    pub fn new(client_label: &str, protocol_version: &str) -> Self {
        let protocol_version =
            serde_json::from_value(serde_json::Value::String(protocol_version.to_string()))
                .unwrap_or_default();
        Self {
            client_label: client_label.to_string(),
            protocol_version,
        }
    }
}

#[allow(clippy::manual_async_fn)]
impl ClientHandler for OnePagerClientHandler {
    fn on_logging_message(
        &self,
        params: LoggingMessageNotificationParam,
        _ctx: NotificationContext<RoleClient>,
    ) -> impl Future<Output = ()> + Send + '_ {
        async move {
            debug!(client = %self.client_label, level = ?params.level, "Tool service log: {}", params.data);
        }
    }

    fn on_progress(
        &self,
        params: ProgressNotificationParam,
        _ctx: NotificationContext<RoleClient>,
    ) -> impl Future<Output = ()> + Send + '_ {
        async move {
            debug!(
                client = %self.client_label,
                progress = params.progress,
                total = ?params.total,
                "Tool service progress"
            );
        }
    }

    fn get_info(&self) -> ClientInfo {
        ClientInfo {
            meta: None,
            protocol_version: self.protocol_version.clone(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: self.client_label.clone().into(),
                title: None,
                version: env!("CARGO_PKG_VERSION").into(),
                description: None,
                icons: None,
                website_url: None,
            },
        }
    }
}
