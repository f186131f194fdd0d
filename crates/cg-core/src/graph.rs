//! Graph store (C3): node/edge set over `petgraph::stable_graph::StableDiGraph`,
//! with a stable id scheme, a name index, and caller/callee caches.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::error::{CoreError, Result};
use crate::metadata::{EntryFunctionMetadata, IdRemap, MetadataRegistry};
use crate::model::{EdgeId, GraphEdge, GraphNode, NodeId};

/// Which fields participate in a node's stable id (§8: v2 vs v3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdScheme {
    /// `hash(name)` — matches the legacy/v2 container format.
    NameOnly,
    /// `hash(name + origin)` — matches the v3 container format.
    NameAndOrigin,
}

fn stable_hash(bytes: &[u8]) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}

fn node_id_for(scheme: IdScheme, name: &str, origin: Option<&str>) -> NodeId {
    let key = match scheme {
        IdScheme::NameOnly => name.to_string(),
        IdScheme::NameAndOrigin => format!("{}\u{0}{}", name, origin.unwrap_or("")),
    };
    NodeId(stable_hash(key.as_bytes()))
}

/// Env var that opts into the §4.3 "empirical collision tracking" policy:
/// instead of failing fatally on an id collision between differently-named
/// functions, log it and keep both under the same id bucket (last writer
/// wins on lookup). Off by default, since silently aliasing two functions
/// corrupts the graph.
pub const COLLISION_TRACKING_ENV: &str = "METACG_EMPIRICAL_COLLISION_TRACKING";

fn collision_tracking_enabled() -> bool {
    std::env::var(COLLISION_TRACKING_ENV).is_ok_and(|v| v != "0")
}

/// The call graph: a directed multigraph keyed by the stable id scheme in
/// effect for this graph instance.
pub struct Graph {
    inner: StableDiGraph<GraphNode, GraphEdge>,
    id_scheme: IdScheme,
    by_id: HashMap<NodeId, NodeIndex>,
    by_name: HashMap<String, Vec<NodeId>>,
    collisions: u64,
    /// Graph-level `EntryFunctionMD` (§4.3): which node is the program's
    /// `main`, set by `EntryFunctionCollector` and consulted by `get_main`.
    entry: Option<NodeId>,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("node_count", &self.inner.node_count())
            .field("edge_count", &self.inner.edge_count())
            .field("id_scheme", &self.id_scheme)
            .finish()
    }
}

impl Graph {
    pub fn new(id_scheme: IdScheme) -> Self {
        Graph {
            inner: StableDiGraph::new(),
            id_scheme,
            by_id: HashMap::new(),
            by_name: HashMap::new(),
            collisions: 0,
            entry: None,
        }
    }

    /// Attach graph-level `EntryFunctionMD`, overwriting any previous entry.
    pub fn set_entry(&mut self, id: NodeId) {
        self.entry = Some(id);
    }

    /// The graph's own `EntryFunctionMD`, if `EntryFunctionCollector` (or a
    /// merge source) has set one.
    pub fn entry_metadata(&self) -> Option<EntryFunctionMetadata> {
        self.entry.map(|entry| EntryFunctionMetadata { entry: Some(entry) })
    }

    pub fn id_scheme(&self) -> IdScheme {
        self.id_scheme
    }

    pub fn collision_count(&self) -> u64 {
        self.collisions
    }

    /// Insert a node, deriving its id from the active scheme. On a hash
    /// collision between two differently-named functions, fails fatally
    /// unless `METACG_EMPIRICAL_COLLISION_TRACKING` is set (§4.3).
    pub fn insert(&mut self, node: GraphNode) -> Result<NodeId> {
        let id = node_id_for(self.id_scheme, &node.name, node.origin.as_deref());
        if let Some(&existing_idx) = self.by_id.get(&id) {
            let existing = &self.inner[existing_idx];
            if existing.name != node.name || existing.origin != node.origin {
                self.collisions += 1;
                if collision_tracking_enabled() {
                    tracing::error!(
                        a = %existing.name,
                        b = %node.name,
                        hash = format!("{:#x}", id.0),
                        "node id collision tracked empirically; keeping existing node"
                    );
                    return Ok(id);
                }
                return Err(CoreError::IdHashCollision {
                    a: existing.name.clone(),
                    b: node.name.clone(),
                    hash: id.0,
                });
            }
            return Ok(id);
        }
        let name = node.name.clone();
        let idx = self.inner.add_node(node);
        self.by_id.insert(id, idx);
        self.by_name.entry(name).or_default().push(id);
        Ok(id)
    }

    /// Fetch the node named `name` (optionally disambiguated by `origin`
    /// under the v3 scheme), inserting an empty (no body) node if absent.
    pub fn get_or_insert(&mut self, name: &str, origin: Option<&str>) -> Result<NodeId> {
        let id = node_id_for(self.id_scheme, name, origin);
        if self.by_id.contains_key(&id) {
            return Ok(id);
        }
        let mut node = GraphNode::new(name);
        if let Some(origin) = origin {
            node = node.with_origin(origin);
        }
        self.insert(node)
    }

    pub fn add_edge(&mut self, edge: GraphEdge) -> EdgeId {
        let source = self.by_id[&edge.source];
        let target = self.by_id[&edge.target];
        let idx = self.inner.add_edge(source, target, edge);
        EdgeId(idx.index() as u64)
    }

    pub fn node(&self, id: NodeId) -> Option<&GraphNode> {
        self.by_id.get(&id).and_then(|&idx| self.inner.node_weight(idx))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut GraphNode> {
        let idx = *self.by_id.get(&id)?;
        self.inner.node_weight_mut(idx)
    }

    pub fn edge(&self, id: EdgeId) -> Option<&GraphEdge> {
        let idx = EdgeIndex::new(id.0 as usize);
        self.inner.edge_weight(idx)
    }

    pub fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.by_id.keys().copied()
    }

    pub fn all_nodes(&self) -> impl Iterator<Item = (NodeId, &GraphNode)> {
        self.by_id
            .iter()
            .filter_map(move |(&id, &idx)| self.inner.node_weight(idx).map(|n| (id, n)))
    }

    pub fn all_edges(&self) -> impl Iterator<Item = &GraphEdge> {
        self.inner.edge_indices().filter_map(move |idx| self.inner.edge_weight(idx))
    }

    pub fn edges_from(&self, source: NodeId) -> impl Iterator<Item = &GraphEdge> {
        let idx = self.by_id.get(&source).copied();
        idx.into_iter().flat_map(move |idx| {
            self.inner
                .edges_directed(idx, Direction::Outgoing)
                .filter_map(move |e| self.inner.edge_weight(e.id()))
        })
    }

    pub fn edges_to(&self, target: NodeId) -> impl Iterator<Item = &GraphEdge> {
        let idx = self.by_id.get(&target).copied();
        idx.into_iter().flat_map(move |idx| {
            self.inner
                .edges_directed(idx, Direction::Incoming)
                .filter_map(move |e| self.inner.edge_weight(e.id()))
        })
    }

    pub fn has_edge_between(&self, source: NodeId, target: NodeId) -> bool {
        self.edges_from(source).any(|e| e.target == target)
    }

    /// Mutable access to the edge `source -> target`, if one exists.
    /// Used by the merger to fold per-edge metadata into an
    /// already-present edge instead of inserting a duplicate (§4.7 pass 2).
    pub fn edge_between_mut(&mut self, source: NodeId, target: NodeId) -> Option<&mut GraphEdge> {
        let src_idx = *self.by_id.get(&source)?;
        let tgt_idx = *self.by_id.get(&target)?;
        let edge_idx = self
            .inner
            .edges_directed(src_idx, Direction::Outgoing)
            .find(|e| e.target() == tgt_idx)
            .map(|e| e.id())?;
        self.inner.edge_weight_mut(edge_idx)
    }

    pub fn find_by_name(&self, name: &str) -> &[NodeId] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn remove_node(&mut self, id: NodeId) -> Option<GraphNode> {
        let idx = self.by_id.remove(&id)?;
        let node = self.inner.remove_node(idx)?;
        if let Some(ids) = self.by_name.get_mut(&node.name) {
            ids.retain(|&i| i != id);
        }
        Some(node)
    }

    pub fn remove_edge(&mut self, id: EdgeId) -> Option<GraphEdge> {
        let idx = EdgeIndex::new(id.0 as usize);
        self.inner.remove_edge(idx)
    }

    /// Resolve the program entry point: the node named `main`, falling
    /// back to the mangled spellings a C++ `main` can appear under
    /// (`_Z4main` with no parameters, `_ZSt4mainiPPc` for `main(int,
    /// char**)` picked up by some mangling schemes), overridden by an
    /// explicit `EntryFunctionMD` on the graph if one is attached.
    pub fn get_main(&self, entry_override: Option<&EntryFunctionMetadata>) -> Option<NodeId> {
        let explicit = match entry_override {
            Some(md) => md.entry,
            None => self.entry,
        };
        if let Some(id) = explicit {
            if self.by_id.contains_key(&id) {
                return Some(id);
            }
        }
        for candidate in ["main", "_Z4main", "_ZSt4mainiPPc"] {
            if let Some(&id) = self.find_by_name(candidate).first() {
                return Some(id);
            }
        }
        None
    }

    pub fn id_remap(&self) -> GraphIdRemap<'_> {
        GraphIdRemap { graph: self }
    }
}

/// Identity remap: used when reading metadata attached to *this* graph's
/// own ids (e.g. round-tripping to JSON without a foreign graph in play).
pub struct GraphIdRemap<'a> {
    graph: &'a Graph,
}

impl<'a> IdRemap for GraphIdRemap<'a> {
    fn remap(&self, foreign: NodeId) -> Option<NodeId> {
        self.graph.by_id.contains_key(&foreign).then_some(foreign)
    }
}

pub fn default_registry() -> MetadataRegistry {
    MetadataRegistry::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_idempotent_by_name() {
        let mut g = Graph::new(IdScheme::NameOnly);
        let a = g.insert(GraphNode::new("foo")).unwrap();
        let b = g.get_or_insert("foo", None).unwrap();
        assert_eq!(a, b);
        assert_eq!(g.node_count(), 1);
    }

    #[test]
    fn name_and_origin_scheme_distinguishes_same_name_different_origin() {
        let mut g = Graph::new(IdScheme::NameAndOrigin);
        let a = g.insert(GraphNode::new("foo").with_origin("a.cpp")).unwrap();
        let b = g.insert(GraphNode::new("foo").with_origin("b.cpp")).unwrap();
        assert_ne!(a, b);
        assert_eq!(g.node_count(), 2);
    }

    #[test]
    fn same_name_inserted_twice_is_not_a_collision() {
        let mut g = Graph::new(IdScheme::NameOnly);
        g.insert(GraphNode::new("foo")).unwrap();
        let result = g.insert(GraphNode::new("foo"));
        assert!(result.is_ok());
        assert_eq!(g.node_count(), 1);
    }

    #[test]
    fn get_main_finds_main_by_name() {
        let mut g = Graph::new(IdScheme::NameOnly);
        let id = g.insert(GraphNode::new("main")).unwrap();
        assert_eq!(g.get_main(None), Some(id));
    }

    #[test]
    fn get_main_prefers_entry_function_override() {
        let mut g = Graph::new(IdScheme::NameOnly);
        g.insert(GraphNode::new("main")).unwrap();
        let custom = g.insert(GraphNode::new("real_entry")).unwrap();
        let md = EntryFunctionMetadata { entry: Some(custom) };
        assert_eq!(g.get_main(Some(&md)), Some(custom));
    }

    #[test]
    fn edges_connect_inserted_nodes() {
        let mut g = Graph::new(IdScheme::NameOnly);
        let a = g.insert(GraphNode::new("a")).unwrap();
        let b = g.insert(GraphNode::new("b")).unwrap();
        g.add_edge(GraphEdge::new(a, b));
        assert!(g.has_edge_between(a, b));
        assert_eq!(g.edges_from(a).count(), 1);
        assert_eq!(g.edges_to(b).count(), 1);
    }
}
