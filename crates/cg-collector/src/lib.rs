//! Per-translation-unit pipeline: AST walk, equivalence-class solving,
//! call-edge resolution, and metadata collection, in that order (§5).

pub mod collectors;
pub mod extract;
pub mod pipeline;
pub mod resolver;
pub mod solver;

use std::collections::{HashMap, HashSet};

use cg_core::metadata::{AllAliasMetadata, FunctionSignature, FunctionSignatureMetadata};
use cg_core::{DeclId, Graph, GraphNode, NodeId, ObjectName, ObjectRef};
use cg_frontend::{DeclKind, TranslationUnit};

use extract::CalleeRef;
use pipeline::Pipeline;
use solver::EquivalenceClassSolver;

/// Maps a function's own mangled name to its parameter decl ids, for the
/// resolver's argument-binding pass.
fn params_by_name(tu: &TranslationUnit) -> HashMap<String, Vec<DeclId>> {
    tu.decls.iter().map(|d| (d.mangled_names[0].clone(), d.params.clone())).collect()
}

/// Maps a method's unqualified name to every same-named method declared in
/// this translation unit, so `base.method(...)` calls whose static type we
/// don't know resolve to the whole candidate set right here when the
/// overload set is fully local (§8 scenario 3's cross-TU case still needs
/// `cg-merge`'s whole-program pass; this only covers what one TU can see).
fn virtual_method_index(tu: &TranslationUnit) -> HashMap<String, Vec<String>> {
    let mut index: HashMap<String, Vec<String>> = HashMap::new();
    for decl in &tu.decls {
        if decl.kind == DeclKind::Method {
            let qualified = &decl.mangled_names[0];
            let simple = qualified.rsplit("::").next().unwrap_or(qualified).to_string();
            index.entry(simple).or_default().push(qualified.clone());
        }
    }
    index
}

/// Unions every unresolved `base.method(...)` call site's function object
/// with each same-named method decl found in this translation unit, ahead
/// of solving and resolution (§8 scenario 3's intra-TU case).
fn bind_virtual_calls_within_unit(
    calls: &[extract::CallConstraint],
    method_index: &HashMap<String, Vec<String>>,
    solver: &mut EquivalenceClassSolver,
) {
    for call in calls {
        let Some(name) = &call.virtual_name else { continue };
        let CalleeRef::Indirect(obj) = &call.callee else { continue };
        let Some(candidates) = method_index.get(name) else { continue };
        for candidate in candidates {
            solver.union(obj, &ObjectRef::object(ObjectName::Decl(DeclId::new(candidate.clone()))));
        }
    }
}

/// Runs the full per-TU pipeline against `tu`, inserting its functions
/// into `graph` and wiring up every registered collector. Returns the
/// name -> node id map, for callers that need to look up specific
/// functions afterward (e.g. `cgcollect` reporting a summary).
pub fn collect_translation_unit(
    tu: &TranslationUnit,
    graph: &mut Graph,
    pipeline: &Pipeline,
) -> HashMap<String, NodeId> {
    let mut node_ids = HashMap::new();
    for decl in &tu.decls {
        let name = decl.mangled_names[0].clone();
        let node = GraphNode::new(name.clone())
            .with_origin(decl.origin_file.clone())
            .with_body(!decl.body.is_empty() || decl.kind == cg_frontend::DeclKind::Function);
        match graph.insert(node) {
            Ok(id) => {
                node_ids.insert(name, id);
            }
            Err(err) => {
                tracing::error!(%err, function = %name, "failed to insert function into graph");
            }
        }
    }

    let known: std::collections::HashSet<String> = node_ids.keys().cloned().collect();
    let extracted = extract::extract(tu, &known);

    let mut solver = EquivalenceClassSolver::new();
    for assign in &extracted.assigns {
        solver.union(&assign.lhs, &assign.rhs);
    }
    for member in &extracted.members {
        solver.record_prefix(&member.base, &member.field, &member.object);
    }
    for deref in &extracted.derefs {
        solver.record_deref(&deref.base, &deref.target);
    }
    bind_virtual_calls_within_unit(&extracted.calls, &virtual_method_index(tu), &mut solver);

    resolver::resolve(&extracted, &mut solver, &node_ids, &params_by_name(tu), graph);

    for decl in &tu.decls {
        if let Some(&id) = node_ids.get(&decl.mangled_names[0]) {
            pipeline.run_decl_phase(decl, id, graph);
        }
    }
    pipeline.run_graph_phase(graph);

    node_ids
}

/// Assembles the default built-in collector set plus an override
/// collector derived from this TU's own decls.
pub fn default_pipeline(tu: &TranslationUnit, node_ids: &HashMap<String, NodeId>) -> Pipeline {
    let mut pipeline = Pipeline::new();
    for collector in collectors::all_decl_collectors() {
        pipeline.register_decl_collector(collector);
    }
    pipeline.register_graph_collector(Box::new(collectors::override_collector(&tu.decls, node_ids)));
    pipeline.register_graph_collector(Box::new(collectors::EntryFunctionCollector));
    pipeline.register_graph_collector(Box::new(collectors::GlobalLoopDepthCollector));
    pipeline
}

/// Without real type information, a function's "signature" is approximated
/// by its parameter count alone (`"?"` per parameter, `"?"` return type) —
/// enough to tell a 0-ary callback apart from a 2-ary one, not enough to
/// distinguish by actual type. Populates `FunctionSignatureMetadata` on
/// every decl and, for every indirect call site the solver couldn't bind
/// to any concrete decl, `AllAliasMetadata` on the caller listing every
/// address-taken function in this translation unit (approximating the
/// conservative "could call anything whose address escaped" over-approx
/// `--alias-model all` asks for; `cg-merge`'s pass 4 turns these into
/// edges once the whole program is assembled).
pub fn attach_alias_metadata(tu: &TranslationUnit, graph: &mut Graph, node_ids: &HashMap<String, NodeId>) {
    let sig_of = |param_count: usize| FunctionSignature {
        ret_type: "?".to_string(),
        param_types: vec!["?".to_string(); param_count],
    };

    for decl in &tu.decls {
        if let Some(&id) = node_ids.get(&decl.mangled_names[0]) {
            if let Some(node) = graph.node_mut(id) {
                node.metadata.insert(
                    FunctionSignatureMetadata::KEY,
                    Box::new(FunctionSignatureMetadata { own_signature: sig_of(decl.params.len()) }),
                );
            }
        }
    }

    let known: HashSet<String> = node_ids.keys().cloned().collect();
    let extracted = extract::extract(tu, &known);
    let mut solver = EquivalenceClassSolver::new();
    for assign in &extracted.assigns {
        solver.union(&assign.lhs, &assign.rhs);
    }
    for member in &extracted.members {
        solver.record_prefix(&member.base, &member.field, &member.object);
    }
    for deref in &extracted.derefs {
        solver.record_deref(&deref.base, &deref.target);
    }

    let address_taken_signatures: Vec<FunctionSignature> = tu
        .decls
        .iter()
        .filter(|d| {
            extracted
                .assigns
                .iter()
                .any(|a| matches!(&a.rhs.name, ObjectName::Decl(id) if id.0 == d.mangled_names[0]))
        })
        .map(|d| sig_of(d.params.len()))
        .collect();

    if address_taken_signatures.is_empty() {
        return;
    }
    for call in &extracted.calls {
        let CalleeRef::Indirect(obj) = &call.callee else { continue };
        // `callee_decls` returns every `Decl`-shaped member of the class,
        // including the call-site object's own synthetic per-scope name
        // when nothing else was ever unioned with it. Only a candidate
        // that actually names a known function counts as resolved.
        if solver.callee_decls(obj).iter().any(|name| node_ids.contains_key(name)) {
            continue;
        }
        let Some(&caller_id) = node_ids.get(&call.caller) else { continue };
        if let Some(node) = graph.node_mut(caller_id) {
            let md = node.metadata.get_or_create::<AllAliasMetadata>(AllAliasMetadata::KEY);
            for sig in &address_taken_signatures {
                if !md.might_call.contains(sig) {
                    md.might_call.push(sig.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cg_core::IdScheme;
    use cg_frontend::{AstVisitor, TreeSitterCxxFrontend};
    use std::path::PathBuf;

    #[test]
    fn direct_calls_produce_edges_end_to_end() {
        let src = "int g() { return 1; }\nint main() { return g(); }\n";
        let tu = TreeSitterCxxFrontend::new().parse(&PathBuf::from("t.c"), src).unwrap();
        let mut graph = Graph::new(IdScheme::NameAndOrigin);
        // two-pass: need node_ids before building the override collector,
        // so insert once with an empty pipeline, then build the real one.
        let prelim = collect_translation_unit(&tu, &mut graph, &Pipeline::new());
        let pipeline = default_pipeline(&tu, &prelim);
        let mut graph2 = Graph::new(IdScheme::NameAndOrigin);
        let node_ids = collect_translation_unit(&tu, &mut graph2, &pipeline);

        let main_id = node_ids["main"];
        let g_id = node_ids["g"];
        assert!(graph2.has_edge_between(main_id, g_id));
        assert_eq!(graph2.get_main(None), Some(main_id));
    }

    #[test]
    fn alias_metadata_links_unresolved_indirect_calls_to_address_taken_functions() {
        // `dispatch` calls through a parameter the solver never unifies with
        // anything; `handler`'s address escapes via a plain assignment
        // elsewhere in the TU. The call stays genuinely unresolved, so
        // `attach_alias_metadata` is the only thing that can link the two.
        let src = "int handler() { return 1; }\n\
                   int dispatch(int (*fp)()) { return fp(); }\n\
                   int registrar() { int (*g)(); g = handler; return 0; }\n";
        let tu = TreeSitterCxxFrontend::new().parse(&PathBuf::from("t.c"), src).unwrap();
        let mut graph = Graph::new(IdScheme::NameAndOrigin);
        let node_ids = collect_translation_unit(&tu, &mut graph, &Pipeline::new());
        attach_alias_metadata(&tu, &mut graph, &node_ids);

        let handler_sig = graph
            .node(node_ids["handler"])
            .unwrap()
            .metadata
            .get(FunctionSignatureMetadata::KEY)
            .and_then(|v| v.as_any().downcast_ref::<FunctionSignatureMetadata>())
            .unwrap()
            .own_signature
            .clone();
        let dispatch_aliases = graph
            .node(node_ids["dispatch"])
            .unwrap()
            .metadata
            .get(AllAliasMetadata::KEY)
            .and_then(|v| v.as_any().downcast_ref::<AllAliasMetadata>())
            .unwrap();
        assert!(dispatch_aliases.might_call.contains(&handler_sig));
    }
}
