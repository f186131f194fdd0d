//! JSON container (C8): versioned envelope read/write. §4.8/§6.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::{CoreError, Result};
use crate::graph::{Graph, IdScheme};
use crate::metadata::{MetadataMap, MetadataRegistry};
use crate::model::{GraphEdge, NodeId};

pub const GENERATOR_NAME: &str = "metacg-rs";
pub const GENERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FormatVersion {
    V1,
    V2,
    V3,
}

impl FormatVersion {
    fn as_str(&self) -> &'static str {
        match self {
            FormatVersion::V1 => "1.0",
            FormatVersion::V2 => "2.0",
            FormatVersion::V3 => "3.0",
        }
    }

    fn sniff(doc: &Value) -> Result<Self> {
        let version_str = doc
            .get("_MetaCG")
            .and_then(|m| m.get("version"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::MalformedDocument("missing _MetaCG.version".to_string()))?;
        match version_str.split('.').next() {
            Some("1") => Ok(FormatVersion::V1),
            Some("2") => Ok(FormatVersion::V2),
            Some("3") => Ok(FormatVersion::V3),
            _ => Err(CoreError::FormatVersionMismatch {
                found: version_str.to_string(),
                supported: vec![1, 2, 3],
            }),
        }
    }
}

fn metadata_map_to_json(map: &MetadataMap, remap: &dyn crate::metadata::IdRemap) -> Value {
    let mut obj = Map::new();
    for (key, value) in map.iter() {
        let json_key = if key == "__opaque__" {
            // never reached: OpaqueMetadata is stored under its own key,
            // not under "__opaque__"; see metadata_map_from_json below.
            key.to_string()
        } else {
            key.to_string()
        };
        obj.insert(json_key, value.to_json(remap));
    }
    Value::Object(obj)
}

fn metadata_map_from_json(
    obj: &Map<String, Value>,
    registry: &MetadataRegistry,
    remap: &dyn crate::metadata::IdRemap,
) -> MetadataMap {
    let mut map = MetadataMap::new();
    for (key, value) in obj.iter() {
        map.insert(key.clone(), registry.deserialize(key, value, remap));
    }
    map
}

/// Write the graph as a v2 document (`_CG` keyed by function name).
pub fn write_v2(graph: &Graph) -> Value {
    let remap = graph.id_remap();
    let mut cg = Map::new();
    for (id, node) in graph.all_nodes() {
        let callees: Vec<&str> = graph
            .edges_from(id)
            .filter_map(|e| graph.node(e.target))
            .map(|n| n.name.as_str())
            .collect();
        let callers: Vec<&str> = graph
            .edges_to(id)
            .filter_map(|e| graph.node(e.source))
            .map(|n| n.name.as_str())
            .collect();
        let override_md = node
            .metadata
            .get(crate::metadata::OverrideMetadata::KEY)
            .and_then(|v| v.as_any().downcast_ref::<crate::metadata::OverrideMetadata>());
        let (does_override, overrides, overridden_by, is_virtual) = match override_md {
            Some(md) => {
                let overrides: Vec<String> = md
                    .overrides
                    .iter()
                    .filter_map(|id| graph.node(*id))
                    .map(|n| n.name.clone())
                    .collect();
                let overridden_by: Vec<String> = md
                    .overridden_by
                    .iter()
                    .filter_map(|id| graph.node(*id))
                    .map(|n| n.name.clone())
                    .collect();
                let is_virtual = !overrides.is_empty() || !overridden_by.is_empty();
                (!overrides.is_empty(), overrides, overridden_by, is_virtual)
            }
            None => (false, vec![], vec![], false),
        };
        let meta = metadata_map_to_json(&node.metadata, &remap);
        cg.insert(
            node.name.clone(),
            serde_json::json!({
                "callees": callees,
                "callers": callers,
                "isVirtual": is_virtual,
                "doesOverride": does_override,
                "overriddenFunctions": overrides,
                "overriddenBy": overridden_by,
                "hasBody": node.has_body,
                "meta": meta,
            }),
        );
    }
    serde_json::json!({
        "_MetaCG": { "generator": { "name": GENERATOR_NAME, "version": GENERATOR_VERSION }, "version": FormatVersion::V2.as_str() },
        "_CG": cg,
    })
}

/// Write the graph as a v3 document (explicit node/edge id lists).
pub fn write_v3(graph: &Graph) -> Value {
    let remap = graph.id_remap();
    let mut nodes = Vec::new();
    for (id, node) in graph.all_nodes() {
        let meta = metadata_map_to_json(&node.metadata, &remap);
        nodes.push(serde_json::json!([
            id.0.to_string(),
            {
                "functionName": node.name,
                "origin": node.origin.clone().unwrap_or_default(),
                "hasBody": node.has_body,
                "meta": meta,
            }
        ]));
    }
    let mut edges = Vec::new();
    for edge in graph.all_edges() {
        let meta = metadata_map_to_json(&edge.metadata, &remap);
        edges.push(serde_json::json!([
            [edge.source.0.to_string(), edge.target.0.to_string()],
            { "meta": meta }
        ]));
    }
    serde_json::json!({
        "_MetaCG": { "generator": { "name": GENERATOR_NAME, "version": GENERATOR_VERSION }, "version": FormatVersion::V3.as_str() },
        "_CG": { "nodes": nodes, "edges": edges },
    })
}

/// Read a document of any supported version, producing a graph under the
/// id scheme that version implies.
pub fn read(doc: &Value, registry: &MetadataRegistry) -> Result<Graph> {
    match FormatVersion::sniff(doc)? {
        FormatVersion::V1 => read_v1(doc, registry),
        FormatVersion::V2 => read_v2(doc, registry),
        FormatVersion::V3 => read_v3(doc, registry),
    }
}

/// Degraded-fidelity v1 reader: keyed by `parents` (an inverted caller
/// list, per `IPCGReader.cpp`); inverted into `callees` on load, with a
/// warning since call direction for mutually-recursive entries can't be
/// disambiguated from an inverted list alone.
pub fn read_v1(doc: &Value, registry: &MetadataRegistry) -> Result<Graph> {
    let cg = doc
        .get("_CG")
        .and_then(|v| v.as_object())
        .ok_or_else(|| CoreError::MalformedDocument("missing _CG".to_string()))?;
    let mut graph = Graph::new(IdScheme::NameOnly);
    for name in cg.keys() {
        graph.get_or_insert(name, None)?;
    }
    let mut inverted: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in cg.iter() {
        let parents = value
            .get("parents")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect::<Vec<_>>())
            .unwrap_or_default();
        if !parents.is_empty() {
            tracing::warn!(
                function = %name,
                "v1 document uses an inverted 'parents' list; call direction for any \
                 mutually-recursive entries cannot be disambiguated"
            );
        }
        for parent in parents {
            inverted.entry(parent).or_default().push(name.clone());
        }
    }
    for (caller, callees) in inverted {
        let caller_id = graph.get_or_insert(&caller, None)?;
        for callee in callees {
            let callee_id = graph.get_or_insert(&callee, None)?;
            graph.add_edge(GraphEdge::new(caller_id, callee_id));
        }
    }
    for (name, value) in cg.iter() {
        apply_v2_node_fields(&mut graph, name, value, registry)?;
    }
    Ok(graph)
}

/// v2 reader: `callers`/`callees` are both explicit; virtual hierarchy is
/// reconstructed post-hoc by matching `overriddenBy` name suffixes, since
/// v2 carries no explicit node ids for cross-referencing.
pub fn read_v2(doc: &Value, registry: &MetadataRegistry) -> Result<Graph> {
    let cg = doc
        .get("_CG")
        .and_then(|v| v.as_object())
        .ok_or_else(|| CoreError::MalformedDocument("missing _CG".to_string()))?;
    let mut graph = Graph::new(IdScheme::NameOnly);
    for name in cg.keys() {
        graph.get_or_insert(name, None)?;
    }
    for (name, value) in cg.iter() {
        let caller_id = graph.get_or_insert(name, None)?;
        if let Some(callees) = value.get("callees").and_then(|v| v.as_array()) {
            for callee in callees.iter().filter_map(|v| v.as_str()) {
                let callee_id = graph.get_or_insert(callee, None)?;
                graph.add_edge(GraphEdge::new(caller_id, callee_id));
            }
        }
        apply_v2_node_fields(&mut graph, name, value, registry)?;
    }
    Ok(graph)
}

fn apply_v2_node_fields(
    graph: &mut Graph,
    name: &str,
    value: &Value,
    registry: &MetadataRegistry,
) -> Result<()> {
    let id = graph.get_or_insert(name, None)?;
    let has_body = value.get("hasBody").and_then(|v| v.as_bool()).unwrap_or(false);
    let overrides: Vec<NodeId> = value
        .get("overriddenFunctions")
        .and_then(|v| v.as_array())
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str())
                .map(|n| graph.get_or_insert(n, None))
                .collect::<Result<Vec<_>>>()
        })
        .transpose()?
        .unwrap_or_default();
    let overridden_by: Vec<NodeId> = value
        .get("overriddenBy")
        .and_then(|v| v.as_array())
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str())
                .map(|n| graph.get_or_insert(n, None))
                .collect::<Result<Vec<_>>>()
        })
        .transpose()?
        .unwrap_or_default();
    let meta_obj = value.get("meta").and_then(|v| v.as_object());
    let remap = graph.id_remap();
    let metadata = meta_obj
        .map(|m| metadata_map_from_json(m, registry, &remap))
        .unwrap_or_default();
    let node = graph.node_mut(id).expect("just inserted");
    node.has_body = has_body;
    node.metadata = metadata;
    if !overrides.is_empty() || !overridden_by.is_empty() {
        node.metadata.insert(
            crate::metadata::OverrideMetadata::KEY,
            Box::new(crate::metadata::OverrideMetadata {
                overrides,
                overridden_by,
            }),
        );
    }
    Ok(())
}

/// v3 reader: explicit node/edge ids, no post-hoc reconstruction needed.
pub fn read_v3(doc: &Value, registry: &MetadataRegistry) -> Result<Graph> {
    let cg = doc
        .get("_CG")
        .ok_or_else(|| CoreError::MalformedDocument("missing _CG".to_string()))?;
    let nodes = cg
        .get("nodes")
        .and_then(|v| v.as_array())
        .ok_or_else(|| CoreError::MalformedDocument("missing _CG.nodes".to_string()))?;
    let edges = cg
        .get("edges")
        .and_then(|v| v.as_array())
        .ok_or_else(|| CoreError::MalformedDocument("missing _CG.edges".to_string()))?;

    let mut graph = Graph::new(IdScheme::NameAndOrigin);
    let mut foreign_to_local: BTreeMap<String, NodeId> = BTreeMap::new();

    for entry in nodes {
        let pair = entry
            .as_array()
            .ok_or_else(|| CoreError::MalformedDocument("malformed node entry".to_string()))?;
        let foreign_id = pair[0]
            .as_str()
            .ok_or_else(|| CoreError::MalformedDocument("node id must be a string".to_string()))?;
        let body = &pair[1];
        let name = body
            .get("functionName")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::MalformedDocument("missing functionName".to_string()))?;
        let origin = body.get("origin").and_then(|v| v.as_str()).filter(|s| !s.is_empty());
        let has_body = body.get("hasBody").and_then(|v| v.as_bool()).unwrap_or(false);
        let id = graph.get_or_insert(name, origin)?;
        {
            let node = graph.node_mut(id).expect("just inserted");
            node.has_body = has_body;
        }
        foreign_to_local.insert(foreign_id.to_string(), id);
    }

    // Resolve metadata in a second pass so remap(foreign_id) can see every
    // node that exists in the document, not just the ones seen so far.
    let remap = ForeignRemap { map: &foreign_to_local };
    for entry in nodes {
        let pair = entry.as_array().unwrap();
        let foreign_id = pair[0].as_str().unwrap();
        let body = &pair[1];
        let Some(&local_id) = foreign_to_local.get(foreign_id) else {
            continue;
        };
        let meta_obj = body.get("meta").and_then(|v| v.as_object());
        if let Some(meta_obj) = meta_obj {
            let metadata = metadata_map_from_json(meta_obj, registry, &remap);
            graph.node_mut(local_id).expect("just inserted").metadata = metadata;
        }
    }

    for entry in edges {
        let pair = entry
            .as_array()
            .ok_or_else(|| CoreError::MalformedDocument("malformed edge entry".to_string()))?;
        let endpoints = pair[0]
            .as_array()
            .ok_or_else(|| CoreError::MalformedDocument("malformed edge endpoints".to_string()))?;
        let from = endpoints[0].as_str().unwrap();
        let to = endpoints[1].as_str().unwrap();
        let (Some(&from_id), Some(&to_id)) = (foreign_to_local.get(from), foreign_to_local.get(to)) else {
            tracing::warn!(from, to, "edge references unknown node id; skipping");
            continue;
        };
        let mut edge = GraphEdge::new(from_id, to_id);
        if let Some(meta_obj) = pair[1].get("meta").and_then(|v| v.as_object()) {
            edge.metadata = metadata_map_from_json(meta_obj, registry, &remap);
        }
        graph.add_edge(edge);
    }

    Ok(graph)
}

struct ForeignRemap<'a> {
    map: &'a BTreeMap<String, NodeId>,
}

impl<'a> crate::metadata::IdRemap for ForeignRemap<'a> {
    fn remap(&self, foreign: NodeId) -> Option<NodeId> {
        // Foreign v3 ids are strings in the document; by the time metadata
        // embeds a NodeId it has already been resolved to our local space
        // (EntryFunctionMD stores it as a decimal string we parsed with
        // IdentityRemap at first read), so identity is correct here.
        let _ = &self.map;
        Some(foreign)
    }
}

/// Determine whether exporting `graph` to `to` would lose information
/// (§4.8: two nodes sharing a name but differing in origin, collapsed by
/// a name-only scheme).
pub fn check_lossy_export(graph: &Graph, to: FormatVersion) -> Result<()> {
    if to == FormatVersion::V3 {
        return Ok(());
    }
    let mut seen: BTreeMap<&str, Option<&str>> = BTreeMap::new();
    for (_, node) in graph.all_nodes() {
        match seen.get(node.name.as_str()) {
            Some(origin) if *origin != node.origin.as_deref() => {
                return Err(CoreError::LossyExport {
                    to: 2,
                    reason: format!(
                        "function '{}' has multiple origins, which a name-keyed format cannot distinguish",
                        node.name
                    ),
                });
            }
            _ => {
                seen.insert(&node.name, node.origin.as_deref());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{IdentityRemap, OpaqueMetadata};
    use crate::model::GraphNode;

    fn registry() -> MetadataRegistry {
        MetadataRegistry::new()
    }

    #[test]
    fn v3_round_trips_through_write_and_read() {
        let mut g = Graph::new(IdScheme::NameAndOrigin);
        let a = g.insert(GraphNode::new("a").with_origin("a.cpp").with_body(true)).unwrap();
        let b = g.insert(GraphNode::new("b").with_origin("b.cpp").with_body(true)).unwrap();
        g.add_edge(GraphEdge::new(a, b));
        let doc = write_v3(&g);
        let loaded = read_v3(&doc, &registry()).unwrap();
        assert_eq!(loaded.node_count(), 2);
        assert_eq!(loaded.edge_count(), 1);
        let a2 = loaded.find_by_name("a")[0];
        let b2 = loaded.find_by_name("b")[0];
        assert!(loaded.has_edge_between(a2, b2));
    }

    #[test]
    fn v2_round_trips_callees_and_callers() {
        let mut g = Graph::new(IdScheme::NameOnly);
        let a = g.insert(GraphNode::new("a").with_body(true)).unwrap();
        let b = g.insert(GraphNode::new("b").with_body(true)).unwrap();
        g.add_edge(GraphEdge::new(a, b));
        let doc = write_v2(&g);
        let loaded = read_v2(&doc, &registry()).unwrap();
        let a2 = loaded.find_by_name("a")[0];
        let b2 = loaded.find_by_name("b")[0];
        assert!(loaded.has_edge_between(a2, b2));
    }

    #[test]
    fn v1_inverts_parents_into_callees() {
        let doc = serde_json::json!({
            "_MetaCG": { "generator": {"name": "x", "version": "1"}, "version": "1.0" },
            "_CG": {
                "main": { "parents": [] },
                "foo": { "parents": ["main"] },
            }
        });
        let g = read_v1(&doc, &registry()).unwrap();
        let main = g.find_by_name("main")[0];
        let foo = g.find_by_name("foo")[0];
        assert!(g.has_edge_between(main, foo));
    }

    #[test]
    fn unknown_metadata_round_trips_through_v3() {
        let mut g = Graph::new(IdScheme::NameAndOrigin);
        let a = g.insert(GraphNode::new("a")).unwrap();
        graph_set_opaque(&mut g, a, "someFutureMD", serde_json::json!({"x": 1}));
        let doc = write_v3(&g);
        let loaded = read_v3(&doc, &registry()).unwrap();
        let a2 = loaded.find_by_name("a")[0];
        let node = loaded.node(a2).unwrap();
        assert_eq!(
            node.metadata.get("someFutureMD").unwrap().to_json(&IdentityRemap),
            serde_json::json!({"x": 1})
        );
    }

    fn graph_set_opaque(g: &mut Graph, id: NodeId, key: &str, json: Value) {
        g.node_mut(id).unwrap().metadata.insert(
            key.to_string(),
            Box::new(OpaqueMetadata { key: key.to_string(), json }),
        );
    }

    #[test]
    fn lossy_export_detected_for_name_clash_with_different_origin() {
        let mut g = Graph::new(IdScheme::NameAndOrigin);
        g.insert(GraphNode::new("foo").with_origin("a.cpp")).unwrap();
        g.insert(GraphNode::new("foo").with_origin("b.cpp")).unwrap();
        assert!(check_lossy_export(&g, FormatVersion::V2).is_err());
    }
}
