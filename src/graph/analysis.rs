//! Structural analysis of reasoning graphs.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::confidence::ConfidenceSummary;

use super::{hop_distances, EdgeType, Graph, NodeType};

/// Reasoning chains returned at most.
pub const MAX_REASONING_CHAINS: usize = 5;
/// Nodes returned by the critical-path fallback.
pub const FALLBACK_PATH_LEN: usize = 3;
/// Below this confidence a node is always a bottleneck.
pub const LOW_CONFIDENCE: f64 = 0.5;
/// Nodes with more than this many incoming edges are bottlenecks when their
/// confidence is below [`FAN_IN_CONFIDENCE`].
pub const FAN_IN_LIMIT: usize = 2;
pub const FAN_IN_CONFIDENCE: f64 = 0.7;
/// Steps the reasoning-chain search may take before giving up.
pub const MAX_CHAIN_VISITS: usize = 10_000;
/// Weights are clamped to at least this before taking the log cost.
const MIN_PATH_WEIGHT: f64 = 1e-6;

/// Size and connectivity metrics.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ComplexityMetrics {
    pub density: f64,
    pub average_degree: f64,
    /// Longest shortest path in hops, ignoring direction; 0 when disconnected.
    pub diameter: usize,
    pub clustering_coefficient: f64,
}

/// Everything [`GraphAnalyzer::statistics`] reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphStatistics {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub node_types: BTreeMap<NodeType, usize>,
    pub edge_types: BTreeMap<EdgeType, usize>,
    pub confidence: ConfidenceSummary,
    pub critical_path: Vec<String>,
    pub bottlenecks: Vec<String>,
    pub complexity: ComplexityMetrics,
    pub reasoning_chains: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Frontier {
    cost: f64,
    node: usize,
}

impl Eq for Frontier {}

impl Ord for Frontier {
    // Reversed so `BinaryHeap` pops the cheapest entry, lowest index first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn edge_cost(weight: f64) -> f64 {
    -weight.clamp(MIN_PATH_WEIGHT, 1.0).ln()
}

/// Stateless graph analyzer.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphAnalyzer;

impl GraphAnalyzer {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    #[must_use]
    pub fn statistics(&self, graph: &Graph) -> GraphStatistics {
        let mut node_types = BTreeMap::new();
        for node in &graph.nodes {
            *node_types.entry(node.node_type).or_insert(0) += 1;
        }
        let mut edge_types = BTreeMap::new();
        for edge in &graph.edges {
            *edge_types.entry(edge.edge_type).or_insert(0) += 1;
        }
        GraphStatistics {
            total_nodes: graph.node_count(),
            total_edges: graph.edge_count(),
            node_types,
            edge_types,
            confidence: ConfidenceSummary::from_values(graph.nodes.iter().map(|n| n.confidence)),
            critical_path: self.critical_path(graph),
            bottlenecks: self.bottlenecks(graph),
            complexity: self.complexity(graph),
            reasoning_chains: self.reasoning_chains(graph),
        }
    }

    /// Highest-confidence route from any input node to any output node.
    ///
    /// Edge cost is `-ln(weight)`, so the cheapest path maximizes the product
    /// of edge weights. Without an input, an output or a connecting path the
    /// result is the three most confident nodes (ties by id).
    #[must_use]
    pub fn critical_path(&self, graph: &Graph) -> Vec<String> {
        self.best_route(graph).unwrap_or_else(|| Self::most_confident(graph))
    }

    fn best_route(&self, graph: &Graph) -> Option<Vec<String>> {
        let index = graph.index();
        let n = graph.node_count();
        let mut outgoing: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
        for edge in &graph.edges {
            if let (Some(&s), Some(&t)) = (index.get(edge.source.as_str()), index.get(edge.target.as_str())) {
                outgoing[s].push((t, edge_cost(edge.weight)));
            }
        }

        let mut cost = vec![f64::INFINITY; n];
        let mut previous: Vec<Option<usize>> = vec![None; n];
        let mut heap = BinaryHeap::new();
        for (i, node) in graph.nodes.iter().enumerate() {
            if node.node_type == NodeType::Input {
                cost[i] = 0.0;
                heap.push(Frontier { cost: 0.0, node: i });
            }
        }

        while let Some(Frontier { cost: c, node: u }) = heap.pop() {
            if c > cost[u] {
                continue;
            }
            for &(v, w) in &outgoing[u] {
                let next = c + w;
                if next < cost[v] {
                    cost[v] = next;
                    previous[v] = Some(u);
                    heap.push(Frontier { cost: next, node: v });
                }
            }
        }

        let target = graph
            .nodes
            .iter()
            .enumerate()
            .filter(|(i, node)| node.node_type == NodeType::Output && cost[*i].is_finite())
            .min_by(|(a, _), (b, _)| cost[*a].total_cmp(&cost[*b]))
            .map(|(i, _)| i)?;

        let mut path = vec![target];
        let mut cursor = target;
        while let Some(p) = previous[cursor] {
            path.push(p);
            cursor = p;
        }
        path.reverse();
        Some(path.into_iter().map(|i| graph.nodes[i].id.clone()).collect())
    }

    fn most_confident(graph: &Graph) -> Vec<String> {
        let mut nodes: Vec<_> = graph.nodes.iter().collect();
        nodes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence).then_with(|| a.id.cmp(&b.id)));
        nodes.into_iter().take(FALLBACK_PATH_LEN).map(|n| n.id.clone()).collect()
    }

    /// Low-confidence nodes plus weakly supported high fan-in nodes, in
    /// graph order.
    #[must_use]
    pub fn bottlenecks(&self, graph: &Graph) -> Vec<String> {
        let in_degree = graph.in_degrees();
        graph
            .nodes
            .iter()
            .filter(|node| {
                let fan_in = in_degree.get(node.id.as_str()).copied().unwrap_or(0);
                node.confidence < LOW_CONFIDENCE || (fan_in > FAN_IN_LIMIT && node.confidence < FAN_IN_CONFIDENCE)
            })
            .map(|node| node.id.clone())
            .collect()
    }

    /// Density and average degree count distinct directed node pairs;
    /// diameter and clustering treat the graph as undirected.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn complexity(&self, graph: &Graph) -> ComplexityMetrics {
        let v = graph.node_count();
        if v == 0 {
            return ComplexityMetrics::default();
        }
        let pairs: HashSet<(&str, &str)> = graph
            .edges
            .iter()
            .map(|e| (e.source.as_str(), e.target.as_str()))
            .collect();
        let e = pairs.len() as f64;
        let vf = v as f64;
        let density = if v > 1 { e / (vf * (vf - 1.0)) } else { 0.0 };

        let adjacency = graph.undirected_adjacency();
        let mut diameter = 0;
        for start in 0..v {
            let hops = hop_distances(&adjacency, start);
            if hops.iter().any(Option::is_none) {
                diameter = 0;
                break;
            }
            diameter = diameter.max(hops.into_iter().flatten().max().unwrap_or(0));
        }

        let clustering = adjacency
            .iter()
            .map(|neighbors| {
                let k = neighbors.len();
                if k < 2 {
                    return 0.0;
                }
                let members: Vec<usize> = neighbors.iter().copied().collect();
                let mut links = 0usize;
                for (i, &a) in members.iter().enumerate() {
                    links += members[i + 1..].iter().filter(|b| adjacency[a].contains(b)).count();
                }
                2.0 * links as f64 / (k * (k - 1)) as f64
            })
            .sum::<f64>()
            / vf;

        ComplexityMetrics {
            density,
            average_degree: 2.0 * e / vf,
            diameter,
            clustering_coefficient: clustering,
        }
    }

    /// Simple directed paths from input nodes to output nodes, at most
    /// [`MAX_REASONING_CHAINS`].
    ///
    /// The search only descends into nodes that can still reach an output and
    /// stops after [`MAX_CHAIN_VISITS`] steps.
    #[must_use]
    pub fn reasoning_chains(&self, graph: &Graph) -> Vec<Vec<String>> {
        let index = graph.index();
        let n = graph.node_count();
        let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut incoming: Vec<Vec<usize>> = vec![Vec::new(); n];
        for edge in &graph.edges {
            if let (Some(&s), Some(&t)) = (index.get(edge.source.as_str()), index.get(edge.target.as_str())) {
                if !outgoing[s].contains(&t) {
                    outgoing[s].push(t);
                    incoming[t].push(s);
                }
            }
        }

        let mut search = ChainSearch {
            graph,
            outgoing,
            reaches_output: reaches_output(graph, &incoming),
            on_path: vec![false; n],
            path: Vec::new(),
            chains: Vec::new(),
            visits: 0,
        };
        let inputs = graph.nodes.iter().enumerate().filter(|(_, n)| n.node_type == NodeType::Input);
        for (source, _) in inputs {
            if !search.reaches_output[source] {
                continue;
            }
            search.path.push(source);
            search.on_path[source] = true;
            search.descend();
            search.on_path[source] = false;
            search.path.pop();
            if search.done() {
                break;
            }
        }
        if search.visits >= MAX_CHAIN_VISITS {
            debug!(graph = %graph.id, chains = search.chains.len(), "reasoning chain search budget exhausted");
        }
        search.chains.truncate(MAX_REASONING_CHAINS);
        search.chains
    }
}

/// Nodes with a directed path to some output node (outputs included).
fn reaches_output(graph: &Graph, incoming: &[Vec<usize>]) -> Vec<bool> {
    let mut seen = vec![false; graph.node_count()];
    let mut queue: VecDeque<usize> = VecDeque::new();
    for (i, node) in graph.nodes.iter().enumerate() {
        if node.node_type == NodeType::Output {
            seen[i] = true;
            queue.push_back(i);
        }
    }
    while let Some(current) = queue.pop_front() {
        for &prev in &incoming[current] {
            if !seen[prev] {
                seen[prev] = true;
                queue.push_back(prev);
            }
        }
    }
    seen
}

struct ChainSearch<'a> {
    graph: &'a Graph,
    outgoing: Vec<Vec<usize>>,
    reaches_output: Vec<bool>,
    on_path: Vec<bool>,
    path: Vec<usize>,
    chains: Vec<Vec<String>>,
    visits: usize,
}

impl ChainSearch<'_> {
    fn done(&self) -> bool {
        self.chains.len() >= MAX_REASONING_CHAINS || self.visits >= MAX_CHAIN_VISITS
    }

    fn descend(&mut self) {
        let Some(&current) = self.path.last() else {
            return;
        };
        for k in 0..self.outgoing[current].len() {
            if self.done() {
                return;
            }
            let next = self.outgoing[current][k];
            if self.on_path[next] || !self.reaches_output[next] {
                continue;
            }
            self.visits += 1;
            self.path.push(next);
            if self.graph.nodes[next].node_type == NodeType::Output {
                let chain = self.path.iter().map(|&i| self.graph.nodes[i].id.clone()).collect();
                self.chains.push(chain);
            }
            self.on_path[next] = true;
            self.descend();
            self.on_path[next] = false;
            self.path.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, Node};
    use crate::pipeline::SessionId;

    fn linear() -> Graph {
        let mut g = Graph::new(SessionId::new());
        g.add_node(Node::new("input", NodeType::Input, "in", 1.0)).unwrap();
        g.add_node(Node::new("a", NodeType::Hypothesis, "A", 0.9)).unwrap();
        g.add_node(Node::new("b", NodeType::SymbolicRule, "B", 0.95)).unwrap();
        g.add_node(Node::new("output", NodeType::Output, "out", 1.0)).unwrap();
        g.add_edge(Edge::new("e1", "input", "a", EdgeType::Generates, 1.0)).unwrap();
        g.add_edge(Edge::new("e2", "a", "b", EdgeType::Validates, 0.9)).unwrap();
        g.add_edge(Edge::new("e3", "b", "output", EdgeType::LeadsTo, 0.95)).unwrap();
        g
    }

    #[test]
    fn critical_path_follows_the_chain() {
        let path = GraphAnalyzer::new().critical_path(&linear());
        assert_eq!(path, vec!["input", "a", "b", "output"]);
    }

    #[test]
    fn critical_path_prefers_confident_edges() {
        let mut g = linear();
        g.add_node(Node::new("c", NodeType::Decision, "C", 0.4)).unwrap();
        g.add_edge(Edge::new("e4", "input", "c", EdgeType::Generates, 0.2)).unwrap();
        g.add_edge(Edge::new("e5", "c", "output", EdgeType::LeadsTo, 1.0)).unwrap();
        // 0.2 < 1.0 * 0.9 * 0.95
        assert_eq!(GraphAnalyzer::new().critical_path(&g), vec!["input", "a", "b", "output"]);

        g.edges[3].weight = 1.0;
        assert_eq!(GraphAnalyzer::new().critical_path(&g), vec!["input", "c", "output"]);
    }

    #[test]
    fn critical_path_falls_back_to_confident_nodes() {
        let mut g = Graph::new(SessionId::new());
        g.add_node(Node::new("x", NodeType::Decision, "x", 0.2)).unwrap();
        g.add_node(Node::new("b", NodeType::Decision, "b", 0.9)).unwrap();
        g.add_node(Node::new("a", NodeType::Decision, "a", 0.9)).unwrap();
        g.add_node(Node::new("c", NodeType::Decision, "c", 0.5)).unwrap();
        assert_eq!(GraphAnalyzer::new().critical_path(&g), vec!["a", "b", "c"]);

        // input and output present but unreachable
        let mut g = linear();
        g.edges.retain(|e| e.id != "e2");
        assert_eq!(GraphAnalyzer::new().critical_path(&g), vec!["input", "output", "b"]);
    }

    #[test]
    fn bottlenecks_combine_both_rules() {
        let mut g = linear();
        g.add_node(Node::new("low", NodeType::Decision, "low", 0.3)).unwrap();
        g.add_node(Node::new("hub", NodeType::Decision, "hub", 0.6)).unwrap();
        for (i, src) in ["input", "a", "b"].into_iter().enumerate() {
            g.add_edge(Edge::new(format!("h{i}"), src, "hub", EdgeType::Supports, 0.5)).unwrap();
        }
        g.add_edge(Edge::new("h3", "low", "hub", EdgeType::Supports, 0.5)).unwrap();
        assert_eq!(GraphAnalyzer::new().bottlenecks(&g), vec!["low", "hub"]);
    }

    #[test]
    fn complexity_of_a_chain() {
        let m = GraphAnalyzer::new().complexity(&linear());
        assert!((m.density - 3.0 / 12.0).abs() < 1e-12);
        assert!((m.average_degree - 1.5).abs() < 1e-12);
        assert_eq!(m.diameter, 3);
        assert_eq!(m.clustering_coefficient, 0.0);
    }

    #[test]
    fn complexity_of_a_triangle_and_disconnected_graph() {
        let mut g = Graph::new(SessionId::new());
        for id in ["a", "b", "c"] {
            g.add_node(Node::new(id, NodeType::Decision, id, 0.5)).unwrap();
        }
        g.add_edge(Edge::new("1", "a", "b", EdgeType::LeadsTo, 1.0)).unwrap();
        g.add_edge(Edge::new("2", "b", "c", EdgeType::LeadsTo, 1.0)).unwrap();
        g.add_edge(Edge::new("3", "a", "c", EdgeType::LeadsTo, 1.0)).unwrap();
        let m = GraphAnalyzer::new().complexity(&g);
        assert_eq!(m.diameter, 1);
        assert!((m.clustering_coefficient - 1.0).abs() < 1e-12);

        g.add_node(Node::new("d", NodeType::Decision, "d", 0.5)).unwrap();
        let m = GraphAnalyzer::new().complexity(&g);
        assert_eq!(m.diameter, 0);
        assert!((m.clustering_coefficient - 0.75).abs() < 1e-12);
    }

    #[test]
    fn chains_are_capped() {
        let mut g = Graph::new(SessionId::new());
        g.add_node(Node::new("in", NodeType::Input, "in", 1.0)).unwrap();
        g.add_node(Node::new("out", NodeType::Output, "out", 1.0)).unwrap();
        for i in 0..8 {
            let mid = format!("m{i}");
            g.add_node(Node::new(mid.clone(), NodeType::Decision, "m", 0.5)).unwrap();
            g.add_edge(Edge::new(format!("a{i}"), "in", mid.clone(), EdgeType::LeadsTo, 0.5)).unwrap();
            g.add_edge(Edge::new(format!("b{i}"), mid, "out", EdgeType::LeadsTo, 0.5)).unwrap();
        }
        let chains = GraphAnalyzer::new().reasoning_chains(&g);
        assert_eq!(chains.len(), MAX_REASONING_CHAINS);
        assert_eq!(chains[0], vec!["in", "m0", "out"]);
    }

    fn dense_dag(n: usize) -> Graph {
        let mut g = Graph::new(SessionId::new());
        g.add_node(Node::new("n0", NodeType::Input, "in", 1.0)).unwrap();
        for i in 1..n {
            g.add_node(Node::new(format!("n{i}"), NodeType::Decision, "d", 0.5)).unwrap();
        }
        for i in 0..n {
            for j in i + 1..n {
                g.add_edge(Edge::new(format!("e{i}_{j}"), format!("n{i}"), format!("n{j}"), EdgeType::LeadsTo, 0.5))
                    .unwrap();
            }
        }
        g
    }

    #[test]
    fn chains_skip_branches_that_cannot_finish() {
        // 2^38 simple paths leave n0; none of them ends at an output.
        let mut g = dense_dag(40);
        g.add_node(Node::new("out", NodeType::Output, "out", 1.0)).unwrap();
        let started = std::time::Instant::now();
        assert!(GraphAnalyzer::new().reasoning_chains(&g).is_empty());
        assert!(started.elapsed() < std::time::Duration::from_secs(2));

        g.add_edge(Edge::new("last", "n39", "out", EdgeType::LeadsTo, 0.5)).unwrap();
        let chains = GraphAnalyzer::new().reasoning_chains(&g);
        assert_eq!(chains.len(), MAX_REASONING_CHAINS);
        assert!(chains.iter().all(|c| c.first().map(String::as_str) == Some("n0")
            && c.last().map(String::as_str) == Some("out")));
    }

    #[test]
    fn chain_search_is_bounded_with_cycles() {
        // Every node reaches the output, but only through the last one.
        let mut g = dense_dag(30);
        for i in 1..29 {
            for j in 1..i {
                g.add_edge(Edge::new(format!("back{i}_{j}"), format!("n{i}"), format!("n{j}"), EdgeType::LeadsTo, 0.5))
                    .unwrap();
            }
        }
        g.add_node(Node::new("out", NodeType::Output, "out", 1.0)).unwrap();
        g.add_edge(Edge::new("last", "n29", "out", EdgeType::LeadsTo, 0.5)).unwrap();
        let started = std::time::Instant::now();
        let chains = GraphAnalyzer::new().reasoning_chains(&g);
        assert!(chains.len() <= MAX_REASONING_CHAINS);
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }

    #[test]
    fn statistics_count_types() {
        let stats = GraphAnalyzer::new().statistics(&linear());
        assert_eq!(stats.total_nodes, 4);
        assert_eq!(stats.node_types[&NodeType::Input], 1);
        assert_eq!(stats.edge_types[&EdgeType::LeadsTo], 1);
        assert_eq!(stats.confidence.count, 4);
        assert!((stats.confidence.min - 0.9).abs() < 1e-12);
        assert_eq!(stats.reasoning_chains.len(), 1);
        assert!(stats.bottlenecks.is_empty());

        let empty = GraphAnalyzer::new().statistics(&Graph::new(SessionId::new()));
        assert!(empty.critical_path.is_empty());
        assert_eq!(empty.complexity, ComplexityMetrics::default());
    }
}
