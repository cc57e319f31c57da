//! Graph codecs: JSON, a DOT-style text form and front-end visualization
//! data.
//!
//! Both text codecs carry enough to rebuild the graph with the same ids,
//! types, weights and confidences. Importers re-check every graph invariant.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::pipeline::SessionId;

use super::{Edge, EdgeType, Graph, GraphId, Node, NodeType, Position};

/// Serializes a graph as pretty-printed JSON.
pub fn to_json(graph: &Graph) -> Result<String, GraphError> {
    serde_json::to_string_pretty(graph).map_err(|e| GraphError::Serialization { message: e.to_string() })
}

/// Parses a graph from JSON and checks its invariants.
pub fn from_json(raw: &str) -> Result<Graph, GraphError> {
    let graph: Graph = serde_json::from_str(raw).map_err(|e| GraphError::Serialization { message: e.to_string() })?;
    graph.validate()?;
    Ok(graph)
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Renders a graph as a DOT digraph, one statement per line.
#[must_use]
pub fn to_dot(graph: &Graph) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "digraph {} {{", quote(&graph.id.to_string()));
    out.push_str("  rankdir=LR;\n");
    out.push_str("  node [shape=box, style=filled];\n");
    let _ = writeln!(
        out,
        "  graph [session_id={}, created_at={}];",
        quote(&graph.session_id.to_string()),
        quote(&graph.created_at.to_rfc3339())
    );

    for node in &graph.nodes {
        let _ = write!(
            out,
            "  {} [label={}, type={}, confidence={}, fillcolor={}",
            quote(&node.id),
            quote(&node.label),
            quote(node.node_type.as_str()),
            node.confidence,
            quote(node.node_type.color()),
        );
        if !node.content.is_null() {
            let _ = write!(out, ", content={}", quote(&node.content.to_string()));
        }
        if let Some(p) = node.position {
            let _ = write!(out, ", pos={}", quote(&format!("{},{}", p.x, p.y)));
        }
        out.push_str("];\n");
    }

    for edge in &graph.edges {
        let _ = writeln!(
            out,
            "  {} -> {} [id={}, label={}, type={}, weight={}, color={}];",
            quote(&edge.source),
            quote(&edge.target),
            quote(&edge.id),
            quote(&edge.label),
            quote(edge.edge_type.as_str()),
            edge.weight,
            quote(edge.edge_type.color()),
        );
    }
    out.push_str("}\n");
    out
}

/// Scanner over a single DOT line.
struct Cursor<'a> {
    rest: &'a str,
    line: usize,
}

impl<'a> Cursor<'a> {
    const fn new(text: &'a str, line: usize) -> Self {
        Self { rest: text, line }
    }

    fn error(&self, reason: impl Into<String>) -> GraphError {
        GraphError::Parse {
            line: self.line,
            reason: reason.into(),
        }
    }

    fn skip_ws(&mut self) {
        self.rest = self.rest.trim_start();
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        if let Some(rest) = self.rest.strip_prefix(token) {
            self.rest = rest;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &str) -> Result<(), GraphError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(format!("expected `{token}`")))
        }
    }

    /// A quoted string or a bare token.
    fn value(&mut self) -> Result<String, GraphError> {
        self.skip_ws();
        if self.rest.starts_with('"') {
            return self.quoted();
        }
        let end = self
            .rest
            .find(|c: char| c.is_whitespace() || matches!(c, ',' | ']' | ';' | '=' | '{' | '['))
            .unwrap_or(self.rest.len());
        if end == 0 {
            return Err(self.error("expected a value"));
        }
        let (token, rest) = self.rest.split_at(end);
        self.rest = rest;
        Ok(token.to_string())
    }

    fn quoted(&mut self) -> Result<String, GraphError> {
        self.expect("\"")?;
        let rest = self.rest;
        let mut out = String::new();
        let mut chars = rest.char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '"' => {
                    self.rest = &rest[i + 1..];
                    return Ok(out);
                }
                '\\' => match chars.next() {
                    Some((_, 'n')) => out.push('\n'),
                    Some((_, 'r')) => out.push('\r'),
                    Some((_, other)) => out.push(other),
                    None => break,
                },
                _ => out.push(c),
            }
        }
        Err(self.error("unterminated string"))
    }

    /// `[k=v, k=v]`; absent brackets give an empty map.
    fn attributes(&mut self) -> Result<BTreeMap<String, String>, GraphError> {
        let mut attrs = BTreeMap::new();
        if !self.eat("[") {
            return Ok(attrs);
        }
        loop {
            if self.eat("]") {
                return Ok(attrs);
            }
            let key = self.value()?;
            self.expect("=")?;
            let value = self.value()?;
            attrs.insert(key, value);
            if !self.eat(",") {
                self.expect("]")?;
                return Ok(attrs);
            }
        }
    }

    fn finish(&mut self) -> Result<(), GraphError> {
        self.eat(";");
        self.skip_ws();
        if self.rest.is_empty() {
            Ok(())
        } else {
            Err(self.error(format!("unexpected trailing text `{}`", self.rest)))
        }
    }
}

fn number(cursor: &Cursor<'_>, attrs: &BTreeMap<String, String>, key: &str, default: f64) -> Result<f64, GraphError> {
    attrs.get(key).map_or(Ok(default), |raw| {
        raw.parse::<f64>()
            .map_err(|_| cursor.error(format!("`{key}` is not a number: {raw}")))
    })
}

fn position(cursor: &Cursor<'_>, raw: &str) -> Result<Position, GraphError> {
    let (x, y) = raw
        .split_once(',')
        .ok_or_else(|| cursor.error(format!("bad position `{raw}`")))?;
    match (x.trim().parse(), y.trim().parse()) {
        (Ok(x), Ok(y)) => Ok(Position::new(x, y)),
        _ => Err(cursor.error(format!("bad position `{raw}`"))),
    }
}

/// Parses the output of [`to_dot`].
///
/// Also accepts hand-written DOT with one statement per line; nodes without a
/// `type` become decisions, edges without an `id` are numbered `edge_N`, and
/// missing confidences and weights default to 1.
pub fn from_dot(text: &str) -> Result<Graph, GraphError> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty() && !l.starts_with("//"));
    let Some((line, first)) = lines.next() else {
        return Err(GraphError::Parse {
            line: 0,
            reason: "empty input".to_string(),
        });
    };
    let mut graph = header(&mut Cursor::new(first, line))?;
    let mut closed = false;
    let mut last_line = line;

    for (line, raw) in lines {
        last_line = line;
        let mut cursor = Cursor::new(raw, line);
        if closed {
            return Err(cursor.error("content after closing brace"));
        }
        if cursor.eat("}") {
            cursor.finish()?;
            closed = true;
            continue;
        }
        if cursor.rest.starts_with('"') {
            statement(&mut graph, &mut cursor)?;
            continue;
        }

        let keyword = cursor.value()?;
        match keyword.as_str() {
            "graph" => {
                let attrs = cursor.attributes()?;
                cursor.finish()?;
                if let Some(raw) = attrs.get("session_id") {
                    graph.session_id =
                        SessionId::parse(raw).map_err(|e| cursor.error(format!("bad session id: {e}")))?;
                }
                if let Some(raw) = attrs.get("created_at") {
                    graph.created_at = DateTime::parse_from_rfc3339(raw)
                        .map_err(|e| cursor.error(format!("bad timestamp: {e}")))?
                        .with_timezone(&Utc);
                }
            }
            "node" | "edge" => {
                cursor.attributes()?;
                cursor.finish()?;
            }
            _ if cursor.eat("=") => {
                cursor.value()?;
                cursor.finish()?;
            }
            other => return Err(cursor.error(format!("unexpected statement `{other}`"))),
        }
    }

    if closed {
        Ok(graph)
    } else {
        Err(GraphError::Parse {
            line: last_line,
            reason: "missing closing brace".to_string(),
        })
    }
}

fn header(cursor: &mut Cursor<'_>) -> Result<Graph, GraphError> {
    if !cursor.eat("digraph") {
        return Err(cursor.error("expected `digraph`"));
    }
    cursor.skip_ws();
    let name = if cursor.rest.starts_with('{') {
        String::new()
    } else {
        cursor.value()?
    };
    cursor.expect("{")?;
    cursor.finish()?;
    let mut graph = Graph::new(SessionId::new());
    if let Ok(id) = GraphId::parse(&name) {
        graph.id = id;
    }
    Ok(graph)
}

fn statement(graph: &mut Graph, cursor: &mut Cursor<'_>) -> Result<(), GraphError> {
    let first = cursor.quoted()?;
    if cursor.eat("->") {
        let target = cursor.value()?;
        let attrs = cursor.attributes()?;
        cursor.finish()?;
        let edge_type = match attrs.get("type") {
            Some(name) => EdgeType::from_name(name).ok_or_else(|| cursor.error(format!("unknown edge type `{name}`")))?,
            None => EdgeType::LeadsTo,
        };
        let id = attrs
            .get("id")
            .cloned()
            .unwrap_or_else(|| format!("edge_{}", graph.edge_count()));
        let mut edge = Edge::new(id, first, target, edge_type, number(cursor, &attrs, "weight", 1.0)?);
        if let Some(label) = attrs.get("label") {
            edge = edge.with_label(label.clone());
        }
        return graph.add_edge(edge).map_err(|e| cursor.error(e.to_string()));
    }

    let attrs = cursor.attributes()?;
    cursor.finish()?;
    let node_type = match attrs.get("type") {
        Some(name) => NodeType::from_name(name).ok_or_else(|| cursor.error(format!("unknown node type `{name}`")))?,
        None => NodeType::Decision,
    };
    let label = attrs.get("label").cloned().unwrap_or_else(|| first.clone());
    let mut node = Node::new(first, node_type, label, number(cursor, &attrs, "confidence", 1.0)?);
    if let Some(raw) = attrs.get("content") {
        node.content = serde_json::from_str(raw).map_err(|e| cursor.error(format!("bad content: {e}")))?;
    }
    if let Some(raw) = attrs.get("pos") {
        node.position = Some(position(cursor, raw)?);
    }
    graph.add_node(node).map_err(|e| cursor.error(e.to_string()))
}

/// A node as drawn by a front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizationNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub x: f64,
    pub y: f64,
    pub confidence: f64,
    pub color: String,
    /// 20 + 30 × confidence.
    pub size: f64,
    pub content: serde_json::Value,
}

/// An edge as drawn by a front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizationEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub label: String,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    pub weight: f64,
    pub color: String,
    /// 1 + 2 × weight.
    pub width: f64,
}

/// Draw-ready nodes and edges plus graph-level metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizationData {
    pub graph_id: GraphId,
    pub nodes: Vec<VisualizationNode>,
    pub edges: Vec<VisualizationEdge>,
    pub total_nodes: usize,
    pub total_edges: usize,
    pub created_at: DateTime<Utc>,
}

impl VisualizationData {
    /// Unpositioned nodes are drawn at the origin.
    #[must_use]
    pub fn from_graph(graph: &Graph) -> Self {
        let nodes = graph
            .nodes
            .iter()
            .map(|n| {
                let p = n.position.unwrap_or_default();
                VisualizationNode {
                    id: n.id.clone(),
                    label: n.label.clone(),
                    node_type: n.node_type,
                    x: p.x,
                    y: p.y,
                    confidence: n.confidence,
                    color: n.node_type.color().to_string(),
                    size: 20.0 + n.confidence * 30.0,
                    content: n.content.clone(),
                }
            })
            .collect();
        let edges = graph
            .edges
            .iter()
            .map(|e| VisualizationEdge {
                id: e.id.clone(),
                source: e.source.clone(),
                target: e.target.clone(),
                label: e.label.clone(),
                edge_type: e.edge_type,
                weight: e.weight,
                color: e.edge_type.color().to_string(),
                width: 1.0 + e.weight * 2.0,
            })
            .collect();
        Self {
            graph_id: graph.id,
            nodes,
            edges,
            total_nodes: graph.node_count(),
            total_edges: graph.edge_count(),
            created_at: graph.created_at,
        }
    }
}
