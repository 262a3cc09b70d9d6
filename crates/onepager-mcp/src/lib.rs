mod client;
pub mod decode;
mod handler;

pub use client::{McpConnector, McpToolClient};
pub use decode::decode_tool_result;
