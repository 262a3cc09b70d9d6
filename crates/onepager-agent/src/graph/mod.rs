//! Step graph for the one-pager pipeline.
//!
//! A run is a fixed graph of [`StepId`]s. Each step reads the
//! [`WorkflowState`] and returns a [`StatePatch`] limited to the fields it
//! declares. Branching steps are followed by a routing rule that picks an
//! [`EdgeLabel`]; the [`GraphRunner`] follows the edge carrying that label.

pub mod edge;
pub mod executor;
pub mod node;
pub mod state;

pub use edge::{EdgeLabel, RouteFn, Topology, Transition};
pub use executor::{GraphRunner, RunResult, StepRecord};
pub use node::StepId;
pub use state::{StateField, StatePatch, WorkflowState};
