//! Shared graph store keyed by graph id.
//!
//! The outer map is only locked to look up or insert entries; each graph has
//! its own mutex so mutations to one graph never block another.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tracing::debug;

use crate::error::GraphError;
use crate::pipeline::SessionId;

use super::{Edge, Graph, GraphId, Node};

fn lock_err(context: &'static str) -> GraphError {
    GraphError::Poisoned { context }
}

fn not_found(id: GraphId) -> GraphError {
    GraphError::NotFound { id: id.to_string() }
}

/// Owns every reasoning graph.
#[derive(Debug, Default)]
pub struct GraphStore {
    graphs: RwLock<HashMap<GraphId, Arc<Mutex<Graph>>>>,
}

impl GraphStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, id: GraphId) -> Result<Arc<Mutex<Graph>>, GraphError> {
        let guard = self.graphs.read().map_err(|_| lock_err("graph map read"))?;
        guard.get(&id).cloned().ok_or_else(|| not_found(id))
    }

    /// Creates an empty graph for a session and returns its id.
    pub fn create(&self, session_id: SessionId) -> Result<GraphId, GraphError> {
        self.insert(Graph::new(session_id))
    }

    /// Takes ownership of a built graph after checking its invariants.
    pub fn insert(&self, graph: Graph) -> Result<GraphId, GraphError> {
        graph.validate()?;
        let id = graph.id;
        let mut guard = self.graphs.write().map_err(|_| lock_err("graph map write"))?;
        guard.insert(id, Arc::new(Mutex::new(graph)));
        debug!(graph = %id, "graph stored");
        Ok(id)
    }

    /// A copy of the graph as it is now.
    pub fn get(&self, id: GraphId) -> Result<Graph, GraphError> {
        let entry = self.entry(id)?;
        let graph = entry.lock().map_err(|_| lock_err("graph read"))?;
        Ok(graph.clone())
    }

    /// Runs `f` on a working copy of one graph while holding its lock. The
    /// copy replaces the stored graph only if `f` succeeds and the result
    /// still validates; otherwise the stored graph is untouched.
    pub fn update<T, F>(&self, id: GraphId, f: F) -> Result<T, GraphError>
    where
        F: FnOnce(&mut Graph) -> Result<T, GraphError>,
    {
        let entry = self.entry(id)?;
        let mut graph = entry.lock().map_err(|_| lock_err("graph write"))?;
        let mut draft = graph.clone();
        let out = f(&mut draft)?;
        draft.validate()?;
        *graph = draft;
        Ok(out)
    }

    /// Appends a node to a stored graph.
    pub fn add_node(&self, id: GraphId, node: Node) -> Result<(), GraphError> {
        self.update(id, |g| g.add_node(node).map_err(GraphError::from))
    }

    /// Appends an edge to a stored graph; the graph is unchanged on failure.
    pub fn add_edge(&self, id: GraphId, edge: Edge) -> Result<(), GraphError> {
        self.update(id, |g| g.add_edge(edge).map_err(GraphError::from))
    }

    /// Removes and returns a graph.
    pub fn delete(&self, id: GraphId) -> Result<Graph, GraphError> {
        let entry = {
            let mut guard = self.graphs.write().map_err(|_| lock_err("graph map write"))?;
            guard.remove(&id).ok_or_else(|| not_found(id))?
        };
        let graph = entry.lock().map_err(|_| lock_err("graph delete"))?;
        Ok(graph.clone())
    }

    /// Ids of all stored graphs, sorted.
    pub fn ids(&self) -> Result<Vec<GraphId>, GraphError> {
        let guard = self.graphs.read().map_err(|_| lock_err("graph map read"))?;
        let mut ids: Vec<GraphId> = guard.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    /// Ids of graphs recorded for a session.
    pub fn ids_for_session(&self, session_id: SessionId) -> Result<Vec<GraphId>, GraphError> {
        let mut out = Vec::new();
        for id in self.ids()? {
            let entry = self.entry(id)?;
            let graph = entry.lock().map_err(|_| lock_err("graph read"))?;
            if graph.session_id == session_id {
                out.push(id);
            }
        }
        Ok(out)
    }

    pub fn len(&self) -> Result<usize, GraphError> {
        Ok(self.graphs.read().map_err(|_| lock_err("graph map read"))?.len())
    }

    pub fn is_empty(&self) -> Result<bool, GraphError> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::error::GraphInvariantError;
    use crate::graph::{EdgeType, NodeType};

    #[test]
    fn create_mutate_delete() {
        let store = GraphStore::new();
        let session = SessionId::new();
        let id = store.create(session).unwrap();

        store.add_node(id, Node::new("a", NodeType::Input, "a", 1.0)).unwrap();
        store.add_node(id, Node::new("b", NodeType::Output, "b", 1.0)).unwrap();
        store.add_edge(id, Edge::new("e", "a", "b", EdgeType::LeadsTo, 1.0)).unwrap();

        let err = store
            .add_edge(id, Edge::new("f", "a", "ghost", EdgeType::LeadsTo, 1.0))
            .unwrap_err();
        assert!(matches!(err, GraphError::Invariant(GraphInvariantError::UnknownNode { .. })));
        assert_eq!(store.get(id).unwrap().edge_count(), 1);
        assert_eq!(store.ids_for_session(session).unwrap(), vec![id]);

        let removed = store.delete(id).unwrap();
        assert_eq!(removed.node_count(), 2);
        assert!(matches!(store.get(id), Err(GraphError::NotFound { .. })));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn failed_update_discards_partial_changes() {
        let store = GraphStore::new();
        let id = store.create(SessionId::new()).unwrap();
        store.add_node(id, Node::new("a", NodeType::Input, "a", 1.0)).unwrap();

        let err = store
            .update(id, |g| {
                g.add_node(Node::new("b", NodeType::Output, "b", 1.0))?;
                g.add_edge(Edge::new("e", "a", "b", EdgeType::LeadsTo, 1.0))?;
                g.add_edge(Edge::new("f", "b", "ghost", EdgeType::LeadsTo, 1.0))?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, GraphError::Invariant(GraphInvariantError::UnknownNode { .. })));

        let g = store.get(id).unwrap();
        assert_eq!(g.node_count(), 1);
        assert_eq!(g.edge_count(), 0);

        // direct field writes that break the graph are rejected too
        let err = store
            .update(id, |g| {
                g.nodes.push(Node::new("a", NodeType::Input, "dup", 1.0));
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, GraphError::Invariant(GraphInvariantError::DuplicateNode { .. })));
        assert_eq!(store.get(id).unwrap().node_count(), 1);

        let count = store
            .update(id, |g| {
                g.add_node(Node::new("b", NodeType::Output, "b", 1.0))?;
                Ok(g.node_count())
            })
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(store.get(id).unwrap().node_count(), 2);
    }

    #[test]
    fn insert_rejects_invalid_graphs() {
        let store = GraphStore::new();
        let mut g = Graph::new(SessionId::new());
        g.nodes.push(Node::new("a", NodeType::Input, "a", 1.0));
        g.nodes.push(Node::new("a", NodeType::Input, "a", 1.0));
        assert!(store.insert(g).is_err());
        assert_eq!(store.len().unwrap(), 0);
    }

    #[test]
    fn concurrent_writers_on_one_graph_are_serialized() {
        let store = Arc::new(GraphStore::new());
        let id = store.create(SessionId::new()).unwrap();
        store.add_node(id, Node::new("root", NodeType::Input, "root", 1.0)).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..25 {
                        let node = format!("n{t}_{i}");
                        store.add_node(id, Node::new(node.clone(), NodeType::Decision, "d", 0.5)).unwrap();
                        store
                            .add_edge(id, Edge::new(format!("e{t}_{i}"), "root", node, EdgeType::LeadsTo, 0.5))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let g = store.get(id).unwrap();
        assert_eq!(g.node_count(), 201);
        assert_eq!(g.edge_count(), 200);
        assert!(g.validate().is_ok());
    }
}
