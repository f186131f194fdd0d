//! Graph Merger (C7, §4.7): combines per-TU graphs into one whole-program
//! call graph.

pub mod merge;
pub mod strategy;

pub use merge::{merge_into, recompute_global_loop_depth, validate_invariants, MergeReport};
pub use strategy::{MergeByName, MergeByNameAndOrigin, MergeStrategy};

#[cfg(test)]
mod tests {
    use super::*;
    use cg_core::metadata::{
        AllAliasMetadata, FunctionSignature, FunctionSignatureMetadata, NumStatementsMetadata,
    };
    use cg_core::{Graph, GraphEdge, GraphNode, IdScheme, MetadataRegistry};

    #[test]
    fn merge_by_name_collapses_same_named_nodes_and_unions_edges() {
        let mut dest = Graph::new(IdScheme::NameOnly);
        let main_dest = dest.insert(GraphNode::new("main").with_body(true)).unwrap();

        let mut source = Graph::new(IdScheme::NameOnly);
        let main_src = source.insert(GraphNode::new("main").with_body(true)).unwrap();
        let g_src = source.insert(GraphNode::new("g").with_body(true)).unwrap();
        source.add_edge(GraphEdge::new(main_src, g_src));

        let registry = MetadataRegistry::new();
        let report = merge_into(&mut dest, &source, &MergeByName, &registry).unwrap();

        assert_eq!(report.nodes_merged, 2);
        assert_eq!(report.edges_added, 1);
        let g_dest = dest.find_by_name("g")[0];
        assert!(dest.has_edge_between(main_dest, g_dest));
    }

    #[test]
    fn merge_by_name_and_origin_keeps_same_named_functions_from_different_files_distinct() {
        let mut dest = Graph::new(IdScheme::NameAndOrigin);
        dest.insert(GraphNode::new("helper").with_origin("a.cpp")).unwrap();

        let mut source = Graph::new(IdScheme::NameAndOrigin);
        source.insert(GraphNode::new("helper").with_origin("b.cpp")).unwrap();

        let registry = MetadataRegistry::new();
        merge_into(&mut dest, &source, &MergeByNameAndOrigin, &registry).unwrap();

        assert_eq!(dest.find_by_name("helper").len(), 2);
    }

    #[test]
    fn merging_twice_folds_metadata_instead_of_duplicating_edges() {
        let mut dest = Graph::new(IdScheme::NameOnly);
        let main_dest = dest.insert(GraphNode::new("main").with_body(true)).unwrap();
        let g_dest = dest.insert(GraphNode::new("g").with_body(true)).unwrap();
        dest.add_edge(GraphEdge::new(main_dest, g_dest));

        let mut source = Graph::new(IdScheme::NameOnly);
        let main_src = source.insert(GraphNode::new("main").with_body(true)).unwrap();
        let g_src = source.insert(GraphNode::new("g").with_body(true)).unwrap();
        if let Some(node) = source.node_mut(main_src) {
            node.metadata.insert(NumStatementsMetadata::KEY, Box::new(NumStatementsMetadata::new(3)));
        }
        source.add_edge(GraphEdge::new(main_src, g_src));

        let registry = MetadataRegistry::new();
        let report = merge_into(&mut dest, &source, &MergeByName, &registry).unwrap();

        assert_eq!(report.edges_added, 0);
        assert_eq!(report.edges_folded, 1);
        assert_eq!(dest.edge_count(), 1);
    }

    #[test]
    fn overapproximation_pass_wires_alias_candidates_by_signature() {
        let mut dest = Graph::new(IdScheme::NameOnly);
        let caller = dest.insert(GraphNode::new("dispatch").with_body(true)).unwrap();
        let candidate = dest.insert(GraphNode::new("handler_a").with_body(true)).unwrap();

        let sig = FunctionSignature {
            ret_type: "void".to_string(),
            param_types: vec!["?".to_string()],
        };
        if let Some(node) = dest.node_mut(caller) {
            node.metadata.insert(
                AllAliasMetadata::KEY,
                Box::new(AllAliasMetadata { might_call: vec![sig.clone()] }),
            );
        }
        if let Some(node) = dest.node_mut(candidate) {
            node.metadata.insert(
                FunctionSignatureMetadata::KEY,
                Box::new(FunctionSignatureMetadata { own_signature: sig }),
            );
        }

        let empty_source = Graph::new(IdScheme::NameOnly);
        let registry = MetadataRegistry::new();
        let report = merge_into(&mut dest, &empty_source, &MergeByName, &registry).unwrap();

        assert_eq!(report.overapprox_edges_added, 1);
        assert!(dest.has_edge_between(caller, candidate));
    }

    #[test]
    fn validate_invariants_is_clean_on_a_well_formed_graph() {
        let mut g = Graph::new(IdScheme::NameOnly);
        let a = g.insert(GraphNode::new("a").with_body(true)).unwrap();
        let b = g.insert(GraphNode::new("b").with_body(true)).unwrap();
        g.add_edge(GraphEdge::new(a, b));
        assert!(validate_invariants(&g).is_empty());
    }
}
