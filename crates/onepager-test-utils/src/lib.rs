//! Mocks and fixtures shared by the onepager crates' tests.

pub mod fixtures;
mod mock_llm;
mod mock_tools;

pub use mock_llm::MockLlm;
pub use mock_tools::{MockConnector, MockToolCaller};
