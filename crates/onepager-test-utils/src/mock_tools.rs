use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use serde_json::{json, Value};

use onepager_core::error::{OnePagerError, Result};
use onepager_core::traits::{ToolCaller, ToolConnector};
use onepager_core::types::ToolDescriptor;

type Scripted = std::result::Result<Value, String>;

#[derive(Default)]
struct Script {
    sticky: HashMap<String, Scripted>,
    queued: HashMap<String, VecDeque<Scripted>>,
    tools: Vec<ToolDescriptor>,
    calls: Vec<(String, Value)>,
    listings: usize,
}

/// Scripted remote tool service.
///
/// Responses are set per tool name. One-shot responses are consumed first,
/// in order; after that the sticky response (if any) answers every call.
/// Clones share the same script and call log.
#[derive(Clone)]
pub struct MockToolCaller {
    script: Arc<Mutex<Script>>,
    session_id: String,
}

impl Default for MockToolCaller {
    fn default() -> Self {
        Self::new()
    }
}

impl MockToolCaller {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(Script::default())),
            session_id: "mock-session".to_string(),
        }
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn respond(self, tool: &str, result: Value) -> Self {
        self.script().sticky.insert(tool.to_string(), Ok(result));
        self
    }

    pub fn fail(self, tool: &str, message: &str) -> Self {
        self.script().sticky.insert(tool.to_string(), Err(message.to_string()));
        self
    }

    pub fn respond_once(self, tool: &str, result: Value) -> Self {
        self.queue(tool, Ok(result))
    }

    pub fn fail_once(self, tool: &str, message: &str) -> Self {
        self.queue(tool, Err(message.to_string()))
    }

    fn queue(self, tool: &str, scripted: Scripted) -> Self {
        self.script()
            .queued
            .entry(tool.to_string())
            .or_default()
            .push_back(scripted);
        self
    }

    /// Advertise tools with empty schemas.
    pub fn with_tools(self, names: &[&str]) -> Self {
        {
            let mut script = self.script();
            for name in names {
                script.tools.push(ToolDescriptor {
                    name: name.to_string(),
                    description: String::new(),
                    input_schema: json!({"type": "object", "properties": {}}),
                });
            }
        }
        self
    }

    /// Advertise one tool whose schema declares `properties`.
    pub fn with_tool_schema(self, name: &str, properties: &[&str]) -> Self {
        let props: serde_json::Map<String, Value> = properties
            .iter()
            .map(|p| (p.to_string(), json!({})))
            .collect();
        self.script().tools.push(ToolDescriptor {
            name: name.to_string(),
            description: String::new(),
            input_schema: json!({"type": "object", "properties": props}),
        });
        self
    }

    pub fn with_session(mut self, id: &str) -> Self {
        self.session_id = id.to_string();
        self
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.script().calls.clone()
    }

    /// Arguments of every call to `tool`, in order.
    pub fn calls_to(&self, tool: &str) -> Vec<Value> {
        self.script()
            .calls
            .iter()
            .filter(|(name, _)| name == tool)
            .map(|(_, args)| args.clone())
            .collect()
    }

    /// Number of `list_tools` requests made so far.
    pub fn listings(&self) -> usize {
        self.script().listings
    }

    fn answer(&self, name: &str, arguments: Value) -> Result<Value> {
        let mut script = self.script();
        script.calls.push((name.to_string(), arguments));

        let queued = script.queued.get_mut(name).and_then(VecDeque::pop_front);
        let scripted = match queued {
            Some(s) => s,
            None => match script.sticky.get(name) {
                Some(s) => s.clone(),
                None => Err("no scripted response".to_string()),
            },
        };
        scripted.map_err(|message| OnePagerError::remote(name, message))
    }
}

impl ToolCaller for MockToolCaller {
    fn call_tool(&self, name: &str, arguments: Value) -> BoxFuture<'_, Result<Value>> {
        let result = self.answer(name, arguments);
        Box::pin(async move { result })
    }

    fn list_tools(&self) -> BoxFuture<'_, Result<Vec<ToolDescriptor>>> {
        let tools = {
            let mut script = self.script();
            script.listings += 1;
            script.tools.clone()
        };
        Box::pin(async move { Ok(tools) })
    }

    fn session_id(&self) -> &str {
        &self.session_id
    }
}

/// Hands out a [`MockToolCaller`] as the session, or fails the handshake.
pub struct MockConnector {
    tools: Option<MockToolCaller>,
    failure: String,
}

impl MockConnector {
    pub fn new(tools: MockToolCaller) -> Self {
        Self {
            tools: Some(tools),
            failure: String::new(),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            tools: None,
            failure: message.to_string(),
        }
    }
}

impl ToolConnector for MockConnector {
    fn connect(&self, _client_label: &str) -> BoxFuture<'_, Result<Arc<dyn ToolCaller>>> {
        let result = match &self.tools {
            Some(tools) => Ok(Arc::new(tools.clone()) as Arc<dyn ToolCaller>),
            None => Err(OnePagerError::Session(self.failure.clone())),
        };
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_once_before_sticky() {
        let tools = MockToolCaller::new()
            .fail_once("t", "first")
            .respond("t", json!({"ok": true}));
        assert!(tools.call_tool("t", json!({})).await.is_err());
        assert_eq!(tools.call_tool("t", json!({})).await.unwrap()["ok"], true);
        assert_eq!(tools.call_tool("t", json!({})).await.unwrap()["ok"], true);
        assert_eq!(tools.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_unscripted_tool_fails() {
        let tools = MockToolCaller::new();
        let err = tools.call_tool("missing", json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "Remote tool failed: missing: no scripted response");
    }

    #[tokio::test]
    async fn test_connector_shares_log() {
        let tools = MockToolCaller::new().respond("t", json!(1));
        let connector = MockConnector::new(tools.clone());
        let session = connector.connect("x").await.unwrap();
        session.call_tool("t", json!({"a": 1})).await.unwrap();
        assert_eq!(tools.calls_to("t"), vec![json!({"a": 1})]);
    }
}
