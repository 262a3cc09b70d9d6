pub mod content;
pub mod generator;
pub mod golden_facts;
pub mod graph;
pub mod ingestion;
pub mod metrics;
pub mod routing;
pub mod steps;
pub mod trace;

pub use content::ContentAgent;
pub use generator::TextGenerator;
pub use golden_facts::GoldenFactsStore;
pub use graph::{
    EdgeLabel, GraphRunner, RunResult, StatePatch, StepId, StepRecord, Topology, WorkflowState,
};
pub use ingestion::IngestionAgent;
pub use metrics::MetricsAgent;
pub use steps::StepContext;
pub use trace::TraceLog;
