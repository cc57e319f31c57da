//! Turns an ordered stage trace into a reasoning graph.

use serde_json::json;
use tracing::debug;

use crate::error::GraphInvariantError;
use crate::pipeline::{SessionId, Stage, Trace};
use crate::rules::RuleType;

use super::{Edge, EdgeType, Graph, Node, NodeType};

/// Builds graphs from traces. Stateless apart from options.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceGraphBuilder {
    rule_details: bool,
}

struct Ids {
    nodes: usize,
    edges: usize,
}

impl Ids {
    fn node(&mut self, node_type: NodeType) -> String {
        let id = format!("{node_type}_{}", self.nodes);
        self.nodes += 1;
        id
    }

    fn edge(&mut self) -> String {
        let id = format!("edge_{}", self.edges);
        self.edges += 1;
        id
    }
}

const fn stage_shape(stage: Stage) -> (NodeType, EdgeType, &'static str, &'static str) {
    match stage {
        Stage::Hypothesis => (NodeType::Hypothesis, EdgeType::Generates, "Hypothesis", "Generates Hypothesis"),
        Stage::RuleCheck => (NodeType::SymbolicRule, EdgeType::Validates, "Symbolic Rule Check", "Validates Hypothesis"),
        Stage::KnowledgeCheck => (
            NodeType::KnowledgeCheck,
            EdgeType::Supports,
            "Knowledge Check",
            "Supports with Knowledge",
        ),
        Stage::Validation => (NodeType::Decision, EdgeType::LeadsTo, "Validation", "Leads to Next Stage"),
        Stage::FinalAnswer => (NodeType::Decision, EdgeType::LeadsTo, "Final Answer", "Leads to Next Stage"),
    }
}

impl TraceGraphBuilder {
    #[must_use]
    pub const fn new() -> Self {
        Self { rule_details: false }
    }

    /// Also emit one node per evaluated rule under the rule-check node.
    #[must_use]
    pub const fn with_rule_details(mut self) -> Self {
        self.rule_details = true;
        self
    }

    /// Builds the graph: an input node from the first trace's question, one
    /// node per trace chained in order, and a terminal output node carrying
    /// the last trace's output. No traces yields an empty graph.
    pub fn build(&self, session_id: SessionId, traces: &[Trace]) -> Result<Graph, GraphInvariantError> {
        let mut graph = Graph::new(session_id);
        let (Some(first), Some(last)) = (traces.first(), traces.last()) else {
            return Ok(graph);
        };
        let mut ids = Ids { nodes: 0, edges: 0 };

        let question = first
            .metadata
            .get("question")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("Unknown question")
            .to_string();
        let input_id = ids.node(NodeType::Input);
        graph.add_node(
            Node::new(input_id.clone(), NodeType::Input, "Question", 1.0).with_content(json!({ "question": question })),
        )?;

        let mut previous = input_id;
        for trace in traces {
            let (node_type, edge_type, label, edge_label) = stage_shape(trace.stage);
            let node_id = ids.node(node_type);
            graph.add_node(
                Node::new(node_id.clone(), node_type, label, trace.confidence).with_content(json!({
                    "stage": trace.stage,
                    "output": trace.output,
                    "metadata": trace.metadata,
                    "timestamp": trace.timestamp,
                })),
            )?;
            graph.add_edge(
                Edge::new(ids.edge(), previous, node_id.clone(), edge_type, trace.confidence).with_label(edge_label),
            )?;

            if self.rule_details && trace.stage == Stage::RuleCheck {
                Self::add_rule_details(&mut graph, &mut ids, &node_id, trace)?;
            }
            previous = node_id;
        }

        let output_id = ids.node(NodeType::Output);
        graph.add_node(
            Node::new(output_id.clone(), NodeType::Output, "Final Answer", last.confidence).with_content(json!({
                "answer": last.output,
                "confidence": last.confidence,
            })),
        )?;
        graph.add_edge(Edge::new(ids.edge(), previous, output_id, EdgeType::LeadsTo, last.confidence).with_label("Final Result"))?;

        debug!(
            graph = %graph.id,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "reasoning graph built"
        );
        Ok(graph)
    }

    fn add_rule_details(graph: &mut Graph, ids: &mut Ids, check_id: &str, trace: &Trace) -> Result<(), GraphInvariantError> {
        let Some(rules) = trace.metadata.get("rules").and_then(serde_json::Value::as_array) else {
            return Ok(());
        };
        for rule in rules {
            let rule_type = rule
                .get("rule_type")
                .cloned()
                .and_then(|v| serde_json::from_value::<RuleType>(v).ok());
            let node_type = rule_type.map_or(NodeType::PatternRule, NodeType::for_rule);
            let passed = rule.get("passed").and_then(serde_json::Value::as_bool).unwrap_or(false);
            let confidence = rule.get("confidence").and_then(serde_json::Value::as_f64).unwrap_or(0.0);
            let name = rule
                .get("rule_name")
                .and_then(serde_json::Value::as_str)
                .or_else(|| rule.get("rule_id").and_then(serde_json::Value::as_str))
                .unwrap_or("rule");

            let node_id = ids.node(node_type);
            graph.add_node(Node::new(node_id.clone(), node_type, name, confidence).with_content(rule.clone()))?;
            let (edge_type, label) = if passed {
                (EdgeType::Supports, "Rule Passed")
            } else {
                (EdgeType::Contradicts, "Rule Failed")
            };
            graph.add_edge(Edge::new(ids.edge(), node_id, check_id, edge_type, confidence).with_label(label))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn traces() -> Vec<Trace> {
        vec![
            Trace::new(Stage::Hypothesis, "H", 0.8).with_metadata("question", "Why?"),
            Trace::new(Stage::RuleCheck, "R", 0.6).with_metadata(
                "rules",
                json!([
                    {"rule_id": "a", "rule_name": "A", "rule_type": "regex_match", "passed": true, "confidence": 0.9},
                    {"rule_id": "b", "rule_name": "B", "rule_type": "pattern_match", "passed": false, "confidence": 0.0}
                ]),
            ),
            Trace::new(Stage::KnowledgeCheck, "K", 0.5),
            Trace::new(Stage::Validation, "V", 0.7),
            Trace::new(Stage::FinalAnswer, "answer", 0.65),
        ]
    }

    #[test]
    fn builds_a_chain() {
        let g = TraceGraphBuilder::new().build(SessionId::new(), &traces()).unwrap();
        // input + 5 traces + output
        assert_eq!(g.node_count(), 7);
        assert_eq!(g.edge_count(), 6);
        assert_eq!(g.nodes[0].node_type, NodeType::Input);
        assert_eq!(g.nodes[0].content["question"], "Why?");
        assert_eq!(g.nodes[6].node_type, NodeType::Output);
        assert_eq!(g.nodes[6].content["answer"], "answer");

        let kinds: Vec<EdgeType> = g.edges.iter().map(|e| e.edge_type).collect();
        assert_eq!(
            kinds,
            vec![
                EdgeType::Generates,
                EdgeType::Validates,
                EdgeType::Supports,
                EdgeType::LeadsTo,
                EdgeType::LeadsTo,
                EdgeType::LeadsTo
            ]
        );
        assert!((g.edges[1].weight - 0.6).abs() < 1e-12);
        assert!(g.validate().is_ok());
    }

    #[test]
    fn rule_details_hang_off_the_rule_check() {
        let g = TraceGraphBuilder::new()
            .with_rule_details()
            .build(SessionId::new(), &traces())
            .unwrap();
        assert_eq!(g.node_count(), 9);
        let check = g.nodes_of_type(NodeType::SymbolicRule).next().unwrap().id.clone();
        let into_check: Vec<&Edge> = g.edges.iter().filter(|e| e.target == check).collect();
        assert_eq!(into_check.len(), 3);
        assert!(into_check.iter().any(|e| e.edge_type == EdgeType::Contradicts));
        assert_eq!(g.nodes_of_type(NodeType::RegexRule).count(), 1);
    }

    #[test]
    fn empty_traces_give_empty_graph() {
        let g = TraceGraphBuilder::new().build(SessionId::new(), &[]).unwrap();
        assert_eq!(g.node_count(), 0);
    }
}
