//! `merge_into` (C7, §4.7): the three-pass merge procedure plus the
//! signature-based over-approximation pass for indirect calls observed
//! only as "might call a function shaped like this" within one TU.

use std::collections::HashMap;

use cg_core::metadata::{AllAliasMetadata, FunctionSignatureMetadata, MergeAction, VirtualCallMetadata};
use cg_core::{Graph, GraphEdge, IdRemap, MetadataRegistry, NodeId, Result};

use crate::strategy::MergeStrategy;

/// Counts of what a merge actually did, for `cgmerge --validate-only` and
/// for tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub nodes_merged: usize,
    pub edges_added: usize,
    pub edges_folded: usize,
    pub overapprox_edges_added: usize,
}

/// Maps a source graph's node ids into the destination's id space, built
/// during pass 1 and consulted by passes 2-4.
struct SourceToDestRemap<'a> {
    map: &'a HashMap<NodeId, NodeId>,
}

impl<'a> IdRemap for SourceToDestRemap<'a> {
    fn remap(&self, foreign: NodeId) -> Option<NodeId> {
        self.map.get(&foreign).copied()
    }
}

/// Merge every node, edge, and metadata key of `source` into `dest`,
/// using `strategy` to decide node correspondence.
pub fn merge_into(
    dest: &mut Graph,
    source: &Graph,
    strategy: &dyn MergeStrategy,
    registry: &MetadataRegistry,
) -> Result<MergeReport> {
    let mut report = MergeReport::default();
    let mut id_map: HashMap<NodeId, NodeId> = HashMap::new();

    // Pass 1: node walk.
    for (src_id, src_node) in source.all_nodes() {
        let dest_id = strategy.destination_id(dest, src_node)?;
        id_map.insert(src_id, dest_id);
        report.nodes_merged += 1;
        if let Some(dest_node) = dest.node_mut(dest_id) {
            dest_node.has_body |= src_node.has_body;
            if dest_node.origin.is_none() {
                if let Some(origin) = &src_node.origin {
                    dest_node.origin = Some(origin.clone());
                }
            }
        }
    }

    if dest.entry_metadata().is_none() {
        if let Some(entry) = source.entry_metadata().and_then(|md| md.entry) {
            if let Some(&dest_entry) = id_map.get(&entry) {
                dest.set_entry(dest_entry);
            }
        }
    }

    let remap = SourceToDestRemap { map: &id_map };

    // Pass 2: edge walk.
    for edge in source.all_edges() {
        let (Some(&s), Some(&t)) = (id_map.get(&edge.source), id_map.get(&edge.target)) else {
            continue;
        };
        if let Some(existing) = dest.edge_between_mut(s, t) {
            existing.metadata.merge_from(&edge.metadata, MergeAction::EdgeMerge, &remap, registry)?;
            report.edges_folded += 1;
        } else {
            let mut new_edge = GraphEdge::new(s, t);
            new_edge.metadata.merge_from(&edge.metadata, MergeAction::EdgeMerge, &remap, registry)?;
            dest.add_edge(new_edge);
            report.edges_added += 1;
        }
    }

    // Pass 3: node metadata merge, ids inside metadata (e.g. OverrideMD)
    // rewritten through the same remap.
    for (src_id, src_node) in source.all_nodes() {
        let dest_id = id_map[&src_id];
        let src_metadata = src_node.metadata.clone();
        if let Some(dest_node) = dest.node_mut(dest_id) {
            dest_node
                .metadata
                .merge_from(&src_metadata, MergeAction::NodeMerge, &remap, registry)?;
        }
    }

    // Pass 4: over-approximation. Build a signature -> node index over the
    // merged destination graph, then for every node carrying
    // `AllAliasMetadata`, add an edge to every node whose own signature
    // matches one it might call.
    let mut by_signature: HashMap<cg_core::metadata::FunctionSignature, Vec<NodeId>> = HashMap::new();
    for (id, node) in dest.all_nodes() {
        if let Some(sig_md) = node
            .metadata
            .get(FunctionSignatureMetadata::KEY)
            .and_then(|v| v.as_any().downcast_ref::<FunctionSignatureMetadata>())
        {
            by_signature.entry(sig_md.own_signature.clone()).or_default().push(id);
        }
    }
    let alias_nodes: Vec<(NodeId, Vec<cg_core::metadata::FunctionSignature>)> = dest
        .all_nodes()
        .filter_map(|(id, node)| {
            node.metadata
                .get(AllAliasMetadata::KEY)
                .and_then(|v| v.as_any().downcast_ref::<AllAliasMetadata>())
                .map(|md| (id, md.might_call.clone()))
        })
        .collect();
    for (caller, signatures) in alias_nodes {
        for sig in signatures {
            if let Some(callees) = by_signature.get(&sig) {
                for &callee in callees {
                    if !dest.has_edge_between(caller, callee) {
                        dest.add_edge(GraphEdge::new(caller, callee));
                        report.overapprox_edges_added += 1;
                    }
                }
            }
        }
    }

    // Pass 5: virtual-dispatch over-approximation. Build a simple-method-
    // name -> node index over the whole merged graph (derived from each
    // node's own name, since a qualified method name is always
    // `Class::method`), then for every node carrying `VirtualCallMD`, wire
    // an edge to every node whose unqualified name matches one it might
    // call. This is what makes cross-TU overrides (§8 scenario 3) resolve
    // at all: a single TU's solver can't see a base/override pair split
    // across translation units, so the call stays unresolved until the
    // whole program is assembled here.
    let mut by_simple_name: HashMap<String, Vec<NodeId>> = HashMap::new();
    for (id, node) in dest.all_nodes() {
        let simple = node.name.rsplit("::").next().unwrap_or(&node.name).to_string();
        by_simple_name.entry(simple).or_default().push(id);
    }
    let virtual_callers: Vec<(NodeId, Vec<String>)> = dest
        .all_nodes()
        .filter_map(|(id, node)| {
            node.metadata
                .get(VirtualCallMetadata::KEY)
                .and_then(|v| v.as_any().downcast_ref::<VirtualCallMetadata>())
                .map(|md| (id, md.might_call_methods.clone()))
        })
        .collect();
    for (caller, names) in virtual_callers {
        for name in names {
            if let Some(candidates) = by_simple_name.get(&name) {
                for &callee in candidates {
                    if callee != caller && !dest.has_edge_between(caller, callee) {
                        dest.add_edge(GraphEdge::new(caller, callee));
                        report.overapprox_edges_added += 1;
                    }
                }
            }
        }
    }

    Ok(report)
}

/// Re-checks the §8 universal invariants against an already-loaded graph:
/// every node is reachable through its own name index, and every edge's
/// endpoints are present as nodes. Grounded on `CGValidate`/`CGVerify`'s
/// structural cross-checks, minus the profiler-trace comparison those
/// tools do against an external `.cubex` file, which has no counterpart
/// here (this tool never ingests profiling data).
pub fn validate_invariants(graph: &Graph) -> Vec<String> {
    let mut violations = Vec::new();
    for (id, node) in graph.all_nodes() {
        if !graph.find_by_name(&node.name).contains(&id) {
            violations.push(format!("node {} ({}) is missing from its own name index", id, node.name));
        }
    }
    for edge in graph.all_edges() {
        if graph.node(edge.source).is_none() {
            violations.push(format!("edge {} -> {} has a dangling source endpoint", edge.source, edge.target));
        }
        if graph.node(edge.target).is_none() {
            violations.push(format!("edge {} -> {} has a dangling target endpoint", edge.source, edge.target));
        }
    }
    violations
}

/// GlobalLoopDepth is not merged pointwise; recomputed from scratch after
/// every merge (§4.2, §4.7). This IR carries no loop-nesting information
/// (see `cg-collector::collectors::LoopDepthCollector`), so the recompute
/// is a flat 0 everywhere, matching what a fresh single-TU run would have
/// produced.
pub fn recompute_global_loop_depth(graph: &mut Graph) {
    let ids: Vec<_> = graph.node_ids().collect();
    for id in ids {
        if let Some(node) = graph.node_mut(id) {
            node.metadata.insert(
                cg_core::metadata::GlobalLoopDepthMetadata::KEY,
                Box::new(cg_core::metadata::GlobalLoopDepthMetadata { depth: 0 }),
            );
        }
    }
}
