//! Node/edge type vocabulary and pathway ingestion format for the
//! biological knowledge graph.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Biological entity types represented as graph nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Gene,
    Protein,
    Cytokine,
    Receptor,
    CellType,
    Pathway,
    AdverseEvent,
    Drug,
    Biomarker,
    Organ,
    ClinicalSign,
}

/// Relationship types between biological entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeType {
    Encodes,
    Transcribes,
    Regulates,
    Activates,
    Inhibits,
    Binds,
    Secretes,
    Expresses,
    ParticipatesIn,
    Triggers,
    UpstreamOf,
    DownstreamOf,
    Indicates,
    Treats,
    Targets,
    Affects,
    ManifestsAs,
    Causes,
    Amplifies,
    Produces,
}

impl EdgeType {
    /// Lowercased, space-separated form used in hypothesis narratives
    /// (`Activates` -> `"activates"`, `UpstreamOf` -> `"upstream of"`).
    pub fn as_narrative_phrase(&self) -> &'static str {
        match self {
            EdgeType::Encodes => "encodes",
            EdgeType::Transcribes => "transcribes",
            EdgeType::Regulates => "regulates",
            EdgeType::Activates => "activates",
            EdgeType::Inhibits => "inhibits",
            EdgeType::Binds => "binds",
            EdgeType::Secretes => "secretes",
            EdgeType::Expresses => "expresses",
            EdgeType::ParticipatesIn => "participates in",
            EdgeType::Triggers => "triggers",
            EdgeType::UpstreamOf => "upstream of",
            EdgeType::DownstreamOf => "downstream of",
            EdgeType::Indicates => "indicates",
            EdgeType::Treats => "treats",
            EdgeType::Targets => "targets",
            EdgeType::Affects => "affects",
            EdgeType::ManifestsAs => "manifests as",
            EdgeType::Causes => "causes",
            EdgeType::Amplifies => "amplifies",
            EdgeType::Produces => "produces",
        }
    }
}

/// ASTCT consensus severity grading for CRS and ICANS (Lee et al., 2019).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum SeverityGrade {
    Grade0 = 0,
    Grade1 = 1,
    Grade2 = 2,
    Grade3 = 3,
    Grade4 = 4,
    /// Fatal.
    Grade5 = 5,
}

/// Temporal phases of a cell therapy adverse event relative to infusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemporalPhase {
    PreInfusion,
    /// 0-24 hours.
    EarlyOnset,
    /// 1-7 days.
    PeakPhase,
    /// 7-14 days.
    Resolution,
    /// >14 days.
    LateOnset,
}

/// A node in the biological knowledge graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub node_id: String,
    pub node_type: NodeType,
    pub name: String,
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
    pub severity_grade: Option<SeverityGrade>,
    pub temporal_phase: Option<TemporalPhase>,
}

impl GraphNode {
    pub fn new(node_id: impl Into<String>, node_type: NodeType, name: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            node_type,
            name: name.into(),
            properties: HashMap::new(),
            severity_grade: None,
            temporal_phase: None,
        }
    }

    pub fn with_properties(mut self, properties: HashMap<String, serde_json::Value>) -> Self {
        self.properties = properties;
        self
    }
}

/// A directed edge in the biological knowledge graph. `weight` in `[0,1]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source_id: String,
    pub target_id: String,
    pub edge_type: EdgeType,
    pub weight: f64,
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
}

impl GraphEdge {
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        edge_type: EdgeType,
        weight: f64,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            edge_type,
            weight: weight.clamp(0.0, 1.0),
            properties: HashMap::new(),
        }
    }
}

/// A named biological pathway bundle that can be loaded into the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathwayDefinition {
    pub pathway_id: String,
    pub name: String,
    pub description: String,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub temporal_phase: TemporalPhase,
    #[serde(default)]
    pub adverse_events: Vec<String>,
}
