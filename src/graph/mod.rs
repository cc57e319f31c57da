//! Reasoning graphs: the provenance record of a reasoning run.
//!
//! A [`Graph`] is a directed graph of typed nodes (input, hypothesis, rule
//! checks, decisions, output) connected by typed, weighted edges. Node ids are
//! unique and every edge endpoint resolves to a node; mutations that would
//! break either invariant fail and leave the graph unchanged.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::confidence;
use crate::error::GraphInvariantError;
use crate::pipeline::SessionId;
use crate::rules::RuleType;

pub mod analysis;
pub mod builder;
pub mod export;
pub mod layout;
pub mod store;

pub use analysis::{ComplexityMetrics, GraphAnalyzer, GraphStatistics};
pub use builder::TraceGraphBuilder;
pub use export::{VisualizationData, VisualizationEdge, VisualizationNode};
pub use layout::{LayoutAlgorithm, LayoutEngine};
pub use store::GraphStore;

/// Unique identifier for a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GraphId(Uuid);

impl GraphId {
    /// Creates a new random graph ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses the textual form produced by `Display`.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for GraphId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Input,
    Hypothesis,
    SymbolicRule,
    KnowledgeCheck,
    LogicRule,
    ExpressionRule,
    RegexRule,
    PatternRule,
    Decision,
    Output,
}

impl NodeType {
    /// Top-to-bottom order used by the hierarchical layout.
    pub const HIERARCHY: [Self; 10] = [
        Self::Input,
        Self::Hypothesis,
        Self::SymbolicRule,
        Self::KnowledgeCheck,
        Self::LogicRule,
        Self::ExpressionRule,
        Self::RegexRule,
        Self::PatternRule,
        Self::Decision,
        Self::Output,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Hypothesis => "hypothesis",
            Self::SymbolicRule => "symbolic_rule",
            Self::KnowledgeCheck => "knowledge_check",
            Self::LogicRule => "logic_rule",
            Self::ExpressionRule => "expression_rule",
            Self::RegexRule => "regex_rule",
            Self::PatternRule => "pattern_rule",
            Self::Decision => "decision",
            Self::Output => "output",
        }
    }

    /// Parses `as_str` output.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::HIERARCHY.into_iter().find(|t| t.as_str() == name)
    }

    /// Position in [`Self::HIERARCHY`].
    #[must_use]
    pub const fn rank(self) -> usize {
        self as usize
    }

    /// Fill color for visualization.
    #[must_use]
    pub const fn color(self) -> &'static str {
        match self {
            Self::Input => "#E3F2FD",
            Self::Hypothesis => "#FFF3E0",
            Self::SymbolicRule => "#E8F5E8",
            Self::KnowledgeCheck => "#F3E5F5",
            Self::LogicRule => "#E0F2F1",
            Self::ExpressionRule => "#FFF8E1",
            Self::RegexRule => "#FCE4EC",
            Self::PatternRule => "#F1F8E9",
            Self::Decision => "#FFEBEE",
            Self::Output => "#FAFAFA",
        }
    }

    /// Detail node type for a rule representation.
    #[must_use]
    pub const fn for_rule(rule_type: RuleType) -> Self {
        match rule_type {
            RuleType::PatternMatch => Self::PatternRule,
            RuleType::RegexMatch => Self::RegexRule,
            RuleType::ExpressionEval => Self::ExpressionRule,
            RuleType::LogicProgram => Self::LogicRule,
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Generates,
    Validates,
    Supports,
    Contradicts,
    Requires,
    LeadsTo,
}

impl EdgeType {
    pub const ALL: [Self; 6] = [
        Self::Generates,
        Self::Validates,
        Self::Supports,
        Self::Contradicts,
        Self::Requires,
        Self::LeadsTo,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Generates => "generates",
            Self::Validates => "validates",
            Self::Supports => "supports",
            Self::Contradicts => "contradicts",
            Self::Requires => "requires",
            Self::LeadsTo => "leads_to",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    /// Stroke color for visualization.
    #[must_use]
    pub const fn color(self) -> &'static str {
        match self {
            Self::Generates => "#2196F3",
            Self::Validates => "#4CAF50",
            Self::Supports => "#8BC34A",
            Self::Contradicts => "#F44336",
            Self::Requires => "#FF9800",
            Self::LeadsTo => "#9C27B0",
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 2D position assigned by a layout.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub label: String,
    #[serde(default)]
    pub content: serde_json::Value,
    pub confidence: f64,
    #[serde(default)]
    pub position: Option<Position>,
}

impl Node {
    /// Creates an unpositioned node; confidence is clamped.
    #[must_use]
    pub fn new(id: impl Into<String>, node_type: NodeType, label: impl Into<String>, confidence: f64) -> Self {
        Self {
            id: id.into(),
            node_type,
            label: label.into(),
            content: serde_json::Value::Null,
            confidence: confidence::clamp(confidence),
            position: None,
        }
    }

    #[must_use]
    pub fn with_content(mut self, content: serde_json::Value) -> Self {
        self.content = content;
        self
    }

    #[must_use]
    pub const fn with_position(mut self, x: f64, y: f64) -> Self {
        self.position = Some(Position::new(x, y));
        self
    }
}

/// A directed graph edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    #[serde(default)]
    pub label: String,
    pub weight: f64,
}

impl Edge {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        edge_type: EdgeType,
        weight: f64,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            edge_type,
            label: String::new(),
            weight,
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

/// A reasoning graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub id: GraphId,
    pub session_id: SessionId,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub created_at: DateTime<Utc>,
}

impl Graph {
    /// Creates an empty graph for a session.
    #[must_use]
    pub fn new(session_id: SessionId) -> Self {
        Self {
            id: GraphId::new(),
            session_id,
            nodes: Vec::new(),
            edges: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    #[must_use]
    pub fn contains_node(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    #[must_use]
    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.id == id)
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Node id to position in `nodes`.
    #[must_use]
    pub fn index(&self) -> HashMap<&str, usize> {
        self.nodes.iter().enumerate().map(|(i, n)| (n.id.as_str(), i)).collect()
    }

    /// Nodes of the given type, in insertion order.
    pub fn nodes_of_type(&self, node_type: NodeType) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |n| n.node_type == node_type)
    }

    /// Appends a node. Fails on a duplicate id.
    pub fn add_node(&mut self, node: Node) -> Result<(), GraphInvariantError> {
        if self.contains_node(&node.id) {
            return Err(GraphInvariantError::DuplicateNode { id: node.id });
        }
        self.nodes.push(node);
        Ok(())
    }

    /// Appends an edge. Fails on a duplicate id, an unknown endpoint or a
    /// negative or non-finite weight.
    pub fn add_edge(&mut self, edge: Edge) -> Result<(), GraphInvariantError> {
        self.check_edge(&edge)?;
        if self.edge(&edge.id).is_some() {
            return Err(GraphInvariantError::DuplicateEdge { id: edge.id });
        }
        self.edges.push(edge);
        Ok(())
    }

    fn check_edge(&self, edge: &Edge) -> Result<(), GraphInvariantError> {
        for endpoint in [&edge.source, &edge.target] {
            if !self.contains_node(endpoint) {
                return Err(GraphInvariantError::UnknownNode {
                    edge_id: edge.id.clone(),
                    node_id: endpoint.clone(),
                });
            }
        }
        if !edge.weight.is_finite() || edge.weight < 0.0 {
            return Err(GraphInvariantError::InvalidWeight {
                edge_id: edge.id.clone(),
                weight: edge.weight,
            });
        }
        Ok(())
    }

    /// Checks every invariant; used when a graph arrives from outside.
    pub fn validate(&self) -> Result<(), GraphInvariantError> {
        let mut node_ids = HashSet::new();
        for node in &self.nodes {
            if !node_ids.insert(node.id.as_str()) {
                return Err(GraphInvariantError::DuplicateNode { id: node.id.clone() });
            }
        }
        let mut edge_ids = HashSet::new();
        for edge in &self.edges {
            if !edge_ids.insert(edge.id.as_str()) {
                return Err(GraphInvariantError::DuplicateEdge { id: edge.id.clone() });
            }
            self.check_edge(edge)?;
        }
        Ok(())
    }

    /// Number of edges ending at each node.
    #[must_use]
    pub fn in_degrees(&self) -> HashMap<&str, usize> {
        let mut out: HashMap<&str, usize> = self.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
        for edge in &self.edges {
            *out.entry(edge.target.as_str()).or_insert(0) += 1;
        }
        out
    }

    /// Undirected neighbor sets by node position. Self loops and parallel
    /// edges collapse.
    #[must_use]
    pub fn undirected_adjacency(&self) -> Vec<BTreeSet<usize>> {
        let index = self.index();
        let mut adjacency = vec![BTreeSet::new(); self.nodes.len()];
        for edge in &self.edges {
            let (Some(&s), Some(&t)) = (index.get(edge.source.as_str()), index.get(edge.target.as_str())) else {
                continue;
            };
            if s != t {
                adjacency[s].insert(t);
                adjacency[t].insert(s);
            }
        }
        adjacency
    }

    /// True when ignoring edge direction every node reaches every other.
    /// The empty graph counts as connected.
    #[must_use]
    pub fn is_weakly_connected(&self) -> bool {
        let adjacency = self.undirected_adjacency();
        adjacency.is_empty() || hop_distances(&adjacency, 0).iter().all(Option::is_some)
    }

    /// Whether every node has a position.
    #[must_use]
    pub fn is_laid_out(&self) -> bool {
        !self.nodes.is_empty() && self.nodes.iter().all(|n| n.position.is_some())
    }
}

/// Breadth-first hop counts from `start`; `None` for unreachable nodes.
pub(crate) fn hop_distances(adjacency: &[BTreeSet<usize>], start: usize) -> Vec<Option<usize>> {
    let mut dist = vec![None; adjacency.len()];
    let mut queue = VecDeque::new();
    dist[start] = Some(0);
    queue.push_back(start);
    while let Some(u) = queue.pop_front() {
        let next = dist[u].map_or(0, |d| d + 1);
        for &v in &adjacency[u] {
            if dist[v].is_none() {
                dist[v] = Some(next);
                queue.push_back(v);
            }
        }
    }
    dist
}
