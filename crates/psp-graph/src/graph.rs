//! The in-memory knowledge graph itself: adjacency indexes, BFS path search,
//! upstream causal walks, mechanism validation, and pathway-based similarity.

use crate::schema::{EdgeType, GraphEdge, GraphNode, NodeType, PathwayDefinition};
use psp_common::units::probe_reference_range;
use std::collections::{HashMap, HashSet, VecDeque};

/// One hop of a discovered path: `(source_id, edge_type, target_id)`.
pub type PathStep = (String, EdgeType, String);

/// Result of a [`KnowledgeGraph::find_paths`] query.
#[derive(Debug, Clone, Default)]
pub struct PathQueryResult {
    pub paths: Vec<Vec<PathStep>>,
    pub min_hops: usize,
    pub max_weight_path: Vec<PathStep>,
}

/// Result of a [`KnowledgeGraph::compute_patient_similarity`] query.
#[derive(Debug, Clone)]
pub struct SimilarityResult {
    pub score: f64,
    pub shared_pathways: Vec<String>,
    pub unique_to_query: Vec<String>,
}

/// Direction to traverse when calling [`KnowledgeGraph::get_neighbors`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Out,
    In,
    Both,
}

/// Causal edge types considered by [`KnowledgeGraph::get_upstream_causes`].
const CAUSAL_EDGE_TYPES: [EdgeType; 5] = [
    EdgeType::Triggers,
    EdgeType::Causes,
    EdgeType::Activates,
    EdgeType::UpstreamOf,
    EdgeType::Amplifies,
];

/// In-memory typed directed graph of biological entities and their
/// mechanistic relationships.
///
/// Owned by the Engine for the process lifetime and mutated only during
/// initialization (pathway loading); all queries after that are lock-free
/// reads against an effectively immutable structure.
#[derive(Debug, Default)]
pub struct KnowledgeGraph {
    nodes: HashMap<String, GraphNode>,
    edges: Vec<GraphEdge>,
    adjacency: HashMap<String, Vec<usize>>,
    reverse_adjacency: HashMap<String, Vec<usize>>,
    type_index: HashMap<NodeType, HashSet<String>>,
    pathway_membership: HashMap<String, HashSet<String>>,
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node to the graph. Idempotent: re-adding an existing ID is a no-op.
    pub fn add_node(&mut self, node: GraphNode) {
        if self.nodes.contains_key(&node.node_id) {
            return;
        }
        self.type_index
            .entry(node.node_type)
            .or_default()
            .insert(node.node_id.clone());
        self.nodes.insert(node.node_id.clone(), node);
    }

    /// Add a directed edge. Fails if either endpoint is missing from the graph.
    pub fn add_edge(&mut self, edge: GraphEdge) -> psp_common::Result<()> {
        if !self.nodes.contains_key(&edge.source_id) {
            return Err(psp_common::Error::Graph(format!(
                "UnknownNode: source '{}' not in graph",
                edge.source_id
            )));
        }
        if !self.nodes.contains_key(&edge.target_id) {
            return Err(psp_common::Error::Graph(format!(
                "UnknownNode: target '{}' not in graph",
                edge.target_id
            )));
        }
        let idx = self.edges.len();
        self.adjacency
            .entry(edge.source_id.clone())
            .or_default()
            .push(idx);
        self.reverse_adjacency
            .entry(edge.target_id.clone())
            .or_default()
            .push(idx);
        self.edges.push(edge);
        Ok(())
    }

    /// Load nodes then edges from a pathway bundle; edges referencing a
    /// missing endpoint are skipped with a warning rather than failing the
    /// whole load. Returns the number of edges actually added.
    pub fn load_pathway(&mut self, pathway: PathwayDefinition) -> usize {
        for node in pathway.nodes {
            self.add_node(node);
        }

        let mut added = 0;
        for edge in pathway.edges {
            if !self.nodes.contains_key(&edge.source_id) || !self.nodes.contains_key(&edge.target_id)
            {
                tracing::warn!(
                    pathway_id = %pathway.pathway_id,
                    source = %edge.source_id,
                    target = %edge.target_id,
                    "MissingPathwayNode: skipping edge, endpoint absent from pathway"
                );
                continue;
            }
            let is_membership = edge.edge_type == EdgeType::ParticipatesIn;
            let (source, target) = (edge.source_id.clone(), edge.target_id.clone());
            if self.add_edge(edge).is_ok() {
                added += 1;
                if is_membership {
                    self.pathway_membership.entry(target).or_default().insert(source);
                }
            }
        }

        tracing::info!(
            pathway_id = %pathway.pathway_id,
            edges_added = added,
            "loaded pathway"
        );
        added
    }

    pub fn get_node(&self, node_id: &str) -> Option<&GraphNode> {
        self.nodes.get(node_id)
    }

    pub fn get_nodes_by_type(&self, node_type: NodeType) -> Vec<&GraphNode> {
        self.type_index
            .get(&node_type)
            .map(|ids| ids.iter().filter_map(|id| self.nodes.get(id)).collect())
            .unwrap_or_default()
    }

    /// Neighbors reachable by an edge of any of `edge_types` (all types if
    /// `None`), in the given `direction`.
    pub fn get_neighbors(
        &self,
        node_id: &str,
        edge_types: Option<&HashSet<EdgeType>>,
        direction: Direction,
    ) -> Vec<(&GraphEdge, &GraphNode)> {
        let mut results = Vec::new();

        if matches!(direction, Direction::Out | Direction::Both) {
            for &idx in self.adjacency.get(node_id).map(|v| v.as_slice()).unwrap_or(&[]) {
                let edge = &self.edges[idx];
                if edge_types.map(|t| t.contains(&edge.edge_type)).unwrap_or(true) {
                    if let Some(neighbor) = self.nodes.get(&edge.target_id) {
                        results.push((edge, neighbor));
                    }
                }
            }
        }

        if matches!(direction, Direction::In | Direction::Both) {
            for &idx in self
                .reverse_adjacency
                .get(node_id)
                .map(|v| v.as_slice())
                .unwrap_or(&[])
            {
                let edge = &self.edges[idx];
                if edge_types.map(|t| t.contains(&edge.edge_type)).unwrap_or(true) {
                    if let Some(neighbor) = self.nodes.get(&edge.source_id) {
                        results.push((edge, neighbor));
                    }
                }
            }
        }

        results
    }

    /// BFS over all simple paths from `source_id` to `target_id` of length
    /// `<= max_hops`. `max_weight_path` is the highest cumulative-weight path,
    /// ties broken by the lexicographically smallest node-ID sequence.
    pub fn find_paths(
        &self,
        source_id: &str,
        target_id: &str,
        max_hops: usize,
        edge_types: Option<&HashSet<EdgeType>>,
    ) -> PathQueryResult {
        if !self.nodes.contains_key(source_id) || !self.nodes.contains_key(target_id) {
            return PathQueryResult::default();
        }

        let mut all_paths: Vec<Vec<PathStep>> = Vec::new();
        let mut queue: VecDeque<(String, Vec<PathStep>, HashSet<String>)> = VecDeque::new();
        queue.push_back((source_id.to_string(), Vec::new(), {
            let mut s = HashSet::new();
            s.insert(source_id.to_string());
            s
        }));

        while let Some((current, path, visited)) = queue.pop_front() {
            if path.len() > max_hops {
                continue;
            }
            if current == target_id && !path.is_empty() {
                all_paths.push(path);
                continue;
            }
            for &idx in self.adjacency.get(&current).map(|v| v.as_slice()).unwrap_or(&[]) {
                let edge = &self.edges[idx];
                if edge_types.map(|t| !t.contains(&edge.edge_type)).unwrap_or(false) {
                    continue;
                }
                if visited.contains(&edge.target_id) {
                    continue;
                }
                let mut new_visited = visited.clone();
                new_visited.insert(edge.target_id.clone());
                let mut new_path = path.clone();
                new_path.push((edge.source_id.clone(), edge.edge_type, edge.target_id.clone()));
                queue.push_back((edge.target_id.clone(), new_path, new_visited));
            }
        }

        if all_paths.is_empty() {
            return PathQueryResult::default();
        }

        let min_hops = all_paths.iter().map(|p| p.len()).min().unwrap_or(0);
        let max_weight_path = self.select_max_weight_path(&all_paths);

        PathQueryResult {
            paths: all_paths,
            min_hops,
            max_weight_path,
        }
    }

    fn path_weight(&self, path: &[PathStep]) -> f64 {
        let mut total = 0.0;
        for (src, etype, tgt) in path {
            if let Some(indices) = self.adjacency.get(src) {
                for &idx in indices {
                    let edge = &self.edges[idx];
                    if &edge.target_id == tgt && edge.edge_type == *etype {
                        total += edge.weight;
                        break;
                    }
                }
            }
        }
        total
    }

    fn path_node_sequence(path: &[PathStep]) -> Vec<String> {
        let mut seq: Vec<String> = Vec::with_capacity(path.len() + 1);
        if let Some((first_src, _, _)) = path.first() {
            seq.push(first_src.clone());
        }
        for (_, _, tgt) in path {
            seq.push(tgt.clone());
        }
        seq
    }

    fn select_max_weight_path(&self, paths: &[Vec<PathStep>]) -> Vec<PathStep> {
        let mut best: Option<(&Vec<PathStep>, f64, Vec<String>)> = None;
        for path in paths {
            let weight = self.path_weight(path);
            let seq = Self::path_node_sequence(path);
            match &best {
                None => best = Some((path, weight, seq)),
                Some((_, best_weight, best_seq)) => {
                    if weight > *best_weight || (weight == *best_weight && &seq < best_seq) {
                        best = Some((path, weight, seq));
                    }
                }
            }
        }
        best.map(|(p, _, _)| p.clone()).unwrap_or_default()
    }

    /// Reverse-walk restricted to causal edge types from an adverse event,
    /// tracking the maximum multiplicative weight product per node. Cycles
    /// are broken by first visit.
    pub fn get_upstream_causes(
        &self,
        adverse_event_id: &str,
        max_depth: usize,
    ) -> Vec<(&GraphNode, f64)> {
        let mut results: HashMap<String, f64> = HashMap::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, f64, usize)> = VecDeque::new();
        queue.push_back((adverse_event_id.to_string(), 1.0, 0));

        while let Some((current, cumulative, depth)) = queue.pop_front() {
            if depth > max_depth {
                continue;
            }
            if visited.contains(&current) {
                continue;
            }
            visited.insert(current.clone());

            if current != adverse_event_id {
                let entry = results.entry(current.clone()).or_insert(0.0);
                if cumulative > *entry {
                    *entry = cumulative;
                }
            }

            for &idx in self
                .reverse_adjacency
                .get(&current)
                .map(|v| v.as_slice())
                .unwrap_or(&[])
            {
                let edge = &self.edges[idx];
                if CAUSAL_EDGE_TYPES.contains(&edge.edge_type) {
                    queue.push_back((edge.source_id.clone(), cumulative * edge.weight, depth + 1));
                }
            }
        }

        let mut ranked: Vec<(&GraphNode, f64)> = results
            .into_iter()
            .filter_map(|(id, weight)| self.nodes.get(&id).map(|n| (n, weight)))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked
    }

    /// Whether a directed path exists from `cause_id` to `effect_id`,
    /// optionally requiring specific intermediates on at least one path.
    pub fn validate_mechanism(
        &self,
        cause_id: &str,
        effect_id: &str,
        required_intermediates: Option<&[String]>,
    ) -> (bool, String) {
        let result = self.find_paths(cause_id, effect_id, 6, None);

        if result.paths.is_empty() {
            return (
                false,
                format!("No mechanistic path found from '{cause_id}' to '{effect_id}'"),
            );
        }

        if let Some(intermediates) = required_intermediates {
            if !intermediates.is_empty() {
                for path in &result.paths {
                    let path_nodes: HashSet<&str> = path
                        .iter()
                        .flat_map(|(src, _, tgt)| [src.as_str(), tgt.as_str()])
                        .collect();
                    if intermediates.iter().all(|i| path_nodes.contains(i.as_str())) {
                        return (
                            true,
                            format!(
                                "Valid mechanism: {cause_id} -> {} -> {effect_id} (path length {} hops)",
                                intermediates.join(" -> "),
                                path.len()
                            ),
                        );
                    }
                }
                let missing: Vec<&String> = intermediates
                    .iter()
                    .filter(|i| {
                        !result.paths.iter().any(|p| {
                            p.iter().any(|(src, _, tgt)| src == *i || tgt == *i)
                        })
                    })
                    .collect();
                return (
                    false,
                    format!(
                        "Path exists ({} hops) but missing required intermediates: {:?}",
                        result.min_hops, missing
                    ),
                );
            }
        }

        (
            true,
            format!(
                "Valid mechanism: {}-hop path found ({} total paths)",
                result.min_hops,
                result.paths.len()
            ),
        )
    }

    /// Jaccard similarity of the pathway sets activated by two patients'
    /// elevated cytokines (value above `threshold_mult * upper_normal`).
    pub fn compute_patient_similarity(
        &self,
        patient_a: &HashMap<String, f64>,
        patient_b: &HashMap<String, f64>,
        threshold_mult: f64,
    ) -> SimilarityResult {
        let active_pathways = |cytokines: &HashMap<String, f64>| -> HashSet<String> {
            let mut active = HashSet::new();
            for (cyt_id, value) in cytokines {
                let Some(node) = self.nodes.get(cyt_id) else {
                    continue;
                };
                let Some((_, high)) = probe_reference_range(&node.properties) else {
                    continue;
                };
                if *value > high * threshold_mult {
                    for &idx in self.adjacency.get(cyt_id).map(|v| v.as_slice()).unwrap_or(&[]) {
                        let edge = &self.edges[idx];
                        if edge.edge_type == EdgeType::ParticipatesIn {
                            active.insert(edge.target_id.clone());
                        }
                    }
                }
            }
            active
        };

        let pathways_a = active_pathways(patient_a);
        let pathways_b = active_pathways(patient_b);

        let intersection: HashSet<&String> = pathways_a.intersection(&pathways_b).collect();
        let union: HashSet<&String> = pathways_a.union(&pathways_b).collect();

        let score = if union.is_empty() {
            0.0
        } else {
            intersection.len() as f64 / union.len() as f64
        };

        let mut shared: Vec<String> = intersection.into_iter().cloned().collect();
        shared.sort();
        let mut unique_to_a: Vec<String> = pathways_a.difference(&pathways_b).cloned().collect();
        unique_to_a.sort();

        SimilarityResult {
            score,
            shared_pathways: shared,
            unique_to_query: unique_to_a,
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, ty: NodeType) -> GraphNode {
        GraphNode::new(id, ty, id)
    }

    #[test]
    fn add_node_is_idempotent() {
        let mut g = KnowledgeGraph::new();
        g.add_node(node("A", NodeType::Gene));
        g.add_node(node("A", NodeType::Gene));
        assert_eq!(g.node_count(), 1);
    }

    #[test]
    fn add_edge_fails_on_unknown_node() {
        let mut g = KnowledgeGraph::new();
        g.add_node(node("A", NodeType::Gene));
        let err = g
            .add_edge(GraphEdge::new("A", "B", EdgeType::Activates, 1.0))
            .unwrap_err();
        assert!(matches!(err, psp_common::Error::Graph(_)));
    }

    #[test]
    fn find_paths_breaks_ties_lexicographically() {
        let mut g = KnowledgeGraph::new();
        for id in ["S", "B", "A", "T"] {
            g.add_node(node(id, NodeType::Protein));
        }
        // Two equal-weight paths S->B->T and S->A->T; "A" < "B" lexicographically.
        g.add_edge(GraphEdge::new("S", "B", EdgeType::Activates, 0.5)).unwrap();
        g.add_edge(GraphEdge::new("B", "T", EdgeType::Activates, 0.5)).unwrap();
        g.add_edge(GraphEdge::new("S", "A", EdgeType::Activates, 0.5)).unwrap();
        g.add_edge(GraphEdge::new("A", "T", EdgeType::Activates, 0.5)).unwrap();

        let result = g.find_paths("S", "T", 6, None);
        assert_eq!(result.paths.len(), 2);
        let seq = KnowledgeGraph::path_node_sequence(&result.max_weight_path);
        assert_eq!(seq, vec!["S", "A", "T"]);
    }

    #[test]
    fn upstream_causes_breaks_cycles_on_first_visit() {
        let mut g = KnowledgeGraph::new();
        for id in ["AE:CRS", "X", "Y"] {
            g.add_node(node(id, NodeType::Pathway));
        }
        g.add_edge(GraphEdge::new("X", "AE:CRS", EdgeType::Triggers, 0.9)).unwrap();
        g.add_edge(GraphEdge::new("Y", "X", EdgeType::Causes, 0.8)).unwrap();
        g.add_edge(GraphEdge::new("X", "Y", EdgeType::Causes, 0.8)).unwrap();

        let upstream = g.get_upstream_causes("AE:CRS", 4);
        let ids: Vec<&str> = upstream.iter().map(|(n, _)| n.node_id.as_str()).collect();
        assert!(ids.contains(&"X"));
        assert!(ids.contains(&"Y"));
    }
}
