//! Core graph data model (C3): stable node/edge ids and the payload each
//! one carries, per §3 "Graph node"/"Graph edge".

use crate::metadata::MetadataMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeId(pub u64);

/// A function in the call graph. `name` is the mangled function name used
/// as (part of) the stable id; `origin` is the defining translation unit's
/// source path, present once the active id scheme is v3 (§8).
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub name: String,
    pub origin: Option<String>,
    pub has_body: bool,
    pub metadata: MetadataMap,
}

impl GraphNode {
    pub fn new(name: impl Into<String>) -> Self {
        GraphNode {
            name: name.into(),
            origin: None,
            has_body: false,
            metadata: MetadataMap::new(),
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_body(mut self, has_body: bool) -> Self {
        self.has_body = has_body;
        self
    }
}

/// A caller -> callee edge. `source`/`target` are filled in by `Graph` on
/// insertion; `metadata` holds per-edge attached data (none of the v1 spec's
/// built-in metadata types are edge-level today, but the slot exists for
/// collector-contributed edge data).
#[derive(Debug, Clone)]
pub struct GraphEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub metadata: MetadataMap,
}

impl GraphEdge {
    pub fn new(source: NodeId, target: NodeId) -> Self {
        GraphEdge {
            source,
            target,
            metadata: MetadataMap::new(),
        }
    }
}
