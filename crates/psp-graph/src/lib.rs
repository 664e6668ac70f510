//! In-memory biological knowledge graph: typed nodes and edges, BFS path
//! search, upstream causal walks, mechanism validation, and patient
//! similarity.
//!
//! Unlike the other pipeline components, the graph is not behind an
//! `Arc<dyn Trait>` factory: it is built once at Engine startup by loading
//! pathway bundles, then only read for the remainder of the process, so a
//! plain owned struct is enough.

pub mod graph;
pub mod schema;

pub use graph::{Direction, KnowledgeGraph, PathQueryResult, PathStep, SimilarityResult};
pub use schema::{EdgeType, GraphEdge, GraphNode, NodeType, PathwayDefinition, SeverityGrade, TemporalPhase};
