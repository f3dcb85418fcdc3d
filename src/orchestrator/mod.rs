//! Orchestrator: the stage graph and the session driver.

pub mod engine;
pub mod graph;

pub use engine::{
    AnalysisEngine, SessionHandle, SessionOptions, SessionOutcome, DEFAULT_MAX_PARALLEL,
};
pub use graph::{standard_graph, GraphDependencies, StageGraph, StageGraphBuilder};
