//! Merge strategies (§4.7): decide, for each source node, which
//! destination node it corresponds to.

use cg_core::{Graph, GraphNode, NodeId, Result};

pub trait MergeStrategy {
    /// Resolve or create the destination node that `source_node`
    /// corresponds to.
    fn destination_id(&self, dest: &mut Graph, source_node: &GraphNode) -> Result<NodeId>;
}

/// Same function name collapses into one node, regardless of origin.
pub struct MergeByName;

impl MergeStrategy for MergeByName {
    fn destination_id(&self, dest: &mut Graph, source_node: &GraphNode) -> Result<NodeId> {
        if let Some(&id) = dest.find_by_name(&source_node.name).first() {
            return Ok(id);
        }
        dest.insert(GraphNode::new(source_node.name.clone()))
    }
}

/// Name and origin must both match; a function with the same name but a
/// different origin file is a distinct node.
pub struct MergeByNameAndOrigin;

impl MergeStrategy for MergeByNameAndOrigin {
    fn destination_id(&self, dest: &mut Graph, source_node: &GraphNode) -> Result<NodeId> {
        dest.get_or_insert(&source_node.name, source_node.origin.as_deref())
    }
}
