//! 2D layouts for reasoning graphs.
//!
//! Every algorithm is deterministic for a given graph: iterative layouts start
//! from a fixed spiral (or circle) and run at most their configured number of
//! iterations. Graphs with fewer than two nodes, or that are not weakly
//! connected, get a sequential placement instead.

use std::f64::consts::TAU;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::LayoutConfig;
use crate::error::ValidationError;

use super::{hop_distances, Graph, NodeType, Position};

/// Optimal-distance constant of the force-directed layout.
const FORCE_DIRECTED_K: f64 = 3.0;
/// Optimal-distance constant of the spring layout.
const SPRING_K: f64 = 2.0;
/// Minimum pair distance used in force computations.
const MIN_DISTANCE: f64 = 0.01;
/// Mean per-node movement under which iterative layouts stop early.
const CONVERGENCE: f64 = 1e-4;
/// Golden angle in radians; spaces the initial spiral evenly.
const GOLDEN_ANGLE: f64 = 2.399_963_229_728_653;

/// Layout algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutAlgorithm {
    #[default]
    Hierarchical,
    Circular,
    ForceDirected,
    Spring,
    KamadaKawai,
}

impl LayoutAlgorithm {
    pub const ALL: [Self; 5] = [
        Self::Hierarchical,
        Self::Circular,
        Self::ForceDirected,
        Self::Spring,
        Self::KamadaKawai,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hierarchical => "hierarchical",
            Self::Circular => "circular",
            Self::ForceDirected => "force_directed",
            Self::Spring => "spring",
            Self::KamadaKawai => "kamada_kawai",
        }
    }
}

impl fmt::Display for LayoutAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LayoutAlgorithm {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == normalized)
            .ok_or_else(|| ValidationError::UnknownLayout { name: s.to_string() })
    }
}

/// Computes node positions.
#[derive(Debug, Clone, Copy, Default)]
pub struct LayoutEngine {
    config: LayoutConfig,
}

impl LayoutEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_config(config: LayoutConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &LayoutConfig {
        &self.config
    }

    /// Assigns a position to every node of `graph`.
    pub fn calculate_layout(&self, graph: &mut Graph, algorithm: LayoutAlgorithm) {
        let positions = self.positions(graph, algorithm);
        for (node, position) in graph.nodes.iter_mut().zip(positions) {
            node.position = Some(position);
        }
        debug!(graph = %graph.id, %algorithm, nodes = graph.node_count(), "layout calculated");
    }

    /// Like [`Self::calculate_layout`] with the algorithm given by name.
    pub fn calculate_layout_named(&self, graph: &mut Graph, algorithm: &str) -> Result<(), ValidationError> {
        let algorithm = algorithm.parse()?;
        self.calculate_layout(graph, algorithm);
        Ok(())
    }

    /// A laid-out copy of `graph`.
    #[must_use]
    pub fn laid_out(&self, graph: &Graph, algorithm: LayoutAlgorithm) -> Graph {
        let mut out = graph.clone();
        self.calculate_layout(&mut out, algorithm);
        out
    }

    /// Positions in node order, without touching the graph.
    #[must_use]
    pub fn positions(&self, graph: &Graph, algorithm: LayoutAlgorithm) -> Vec<Position> {
        if graph.node_count() <= 1 {
            return sequential(graph.node_count());
        }
        if !graph.is_weakly_connected() {
            warn!(graph = %graph.id, %algorithm, "graph is disconnected, using sequential layout");
            return sequential(graph.node_count());
        }
        let cfg = &self.config;
        match algorithm {
            LayoutAlgorithm::Hierarchical => hierarchical(graph, cfg),
            LayoutAlgorithm::Circular => circular(graph.node_count(), cfg.scale),
            LayoutAlgorithm::ForceDirected => {
                force_directed(graph, FORCE_DIRECTED_K, cfg.force_directed_iterations, cfg.scale)
            }
            LayoutAlgorithm::Spring => force_directed(graph, SPRING_K, cfg.spring_iterations, cfg.spring_scale),
            LayoutAlgorithm::KamadaKawai => kamada_kawai(graph, cfg.kamada_kawai_iterations, cfg.scale),
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn sequential(n: usize) -> Vec<Position> {
    (0..n).map(|i| Position::new(i as f64 * 2.0, (i % 3) as f64)).collect()
}

#[allow(clippy::cast_precision_loss)]
fn hierarchical(graph: &Graph, cfg: &LayoutConfig) -> Vec<Position> {
    let mut positions = vec![Position::default(); graph.node_count()];
    for node_type in NodeType::HIERARCHY {
        let members: Vec<usize> = graph
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.node_type == node_type)
            .map(|(i, _)| i)
            .collect();
        let half = members.len() as f64 / 2.0;
        let y = node_type.rank() as f64 * cfg.layer_spacing;
        for (j, &i) in members.iter().enumerate() {
            positions[i] = Position::new((j as f64 - half) * cfg.node_spacing, y);
        }
    }
    positions
}

#[allow(clippy::cast_precision_loss)]
fn circular(n: usize, radius: f64) -> Vec<Position> {
    (0..n)
        .map(|i| {
            let theta = TAU * i as f64 / n as f64;
            Position::new(radius * theta.cos(), radius * theta.sin())
        })
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn spiral(n: usize) -> Vec<Position> {
    (0..n)
        .map(|i| {
            let r = ((i as f64 + 0.5) / n as f64).sqrt();
            let theta = i as f64 * GOLDEN_ANGLE;
            Position::new(r * theta.cos(), r * theta.sin())
        })
        .collect()
}

/// Centers the points on the origin and scales the largest coordinate to
/// `scale`.
fn rescale(points: &mut [Position], scale: f64) {
    if points.is_empty() {
        return;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / n;
    let mut extent = 0.0f64;
    for p in points.iter_mut() {
        p.x -= cx;
        p.y -= cy;
        extent = extent.max(p.x.abs()).max(p.y.abs());
    }
    if extent > 0.0 {
        let factor = scale / extent;
        for p in points.iter_mut() {
            p.x *= factor;
            p.y *= factor;
        }
    }
}

/// Fruchterman-Reingold relaxation: pairwise repulsion `k²/d`, attraction
/// `d²/k` along edges, with a linearly cooling step size.
#[allow(clippy::cast_precision_loss)]
fn force_directed(graph: &Graph, k: f64, iterations: usize, scale: f64) -> Vec<Position> {
    let adjacency = graph.undirected_adjacency();
    let n = adjacency.len();
    let mut pos = spiral(n);
    let mut temperature = 0.1;
    let cooling = temperature / (iterations as f64 + 1.0);

    for _ in 0..iterations {
        let mut moved = 0.0;
        let mut displacement = vec![(0.0f64, 0.0f64); n];
        for i in 0..n {
            for j in 0..n {
                if i == j {
                    continue;
                }
                let dx = pos[i].x - pos[j].x;
                let dy = pos[i].y - pos[j].y;
                let d = dx.hypot(dy).max(MIN_DISTANCE);
                let attraction = if adjacency[i].contains(&j) { d / k } else { 0.0 };
                let force = k * k / (d * d) - attraction;
                displacement[i].0 += dx * force;
                displacement[i].1 += dy * force;
            }
        }
        for (p, (dx, dy)) in pos.iter_mut().zip(displacement) {
            let length = dx.hypot(dy).max(MIN_DISTANCE);
            let step_x = dx * temperature / length;
            let step_y = dy * temperature / length;
            p.x += step_x;
            p.y += step_y;
            moved += step_x.hypot(step_y);
        }
        temperature -= cooling;
        if moved / (n as f64) < CONVERGENCE {
            break;
        }
    }

    rescale(&mut pos, scale);
    pos
}

/// Stress majorization toward hop distances, with weights `d⁻²`.
/// Expects a connected graph.
#[allow(clippy::cast_precision_loss)]
fn kamada_kawai(graph: &Graph, iterations: usize, scale: f64) -> Vec<Position> {
    let adjacency = graph.undirected_adjacency();
    let n = adjacency.len();
    let dist: Vec<Vec<f64>> = (0..n)
        .map(|s| {
            hop_distances(&adjacency, s)
                .into_iter()
                .map(|d| d.map_or(f64::INFINITY, |d| d as f64))
                .collect()
        })
        .collect();
    let mut pos = circular(n, 1.0);

    for _ in 0..iterations {
        let mut moved = 0.0;
        for i in 0..n {
            let (mut sx, mut sy, mut sw) = (0.0, 0.0, 0.0);
            for j in 0..n {
                let d = dist[i][j];
                if i == j || !d.is_finite() {
                    continue;
                }
                let w = 1.0 / (d * d);
                let dx = pos[i].x - pos[j].x;
                let dy = pos[i].y - pos[j].y;
                let norm = dx.hypot(dy).max(MIN_DISTANCE);
                sx += w * (pos[j].x + d * dx / norm);
                sy += w * (pos[j].y + d * dy / norm);
                sw += w;
            }
            if sw > 0.0 {
                let next = Position::new(sx / sw, sy / sw);
                moved += (next.x - pos[i].x).hypot(next.y - pos[i].y);
                pos[i] = next;
            }
        }
        if moved / (n as f64) < CONVERGENCE {
            break;
        }
    }

    rescale(&mut pos, scale);
    pos
}
