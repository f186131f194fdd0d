//! Call-Edge Resolver (C6): for every call site, enumerates the callee
//! class members and emits edges into the graph store.

use std::collections::HashMap;

use cg_core::metadata::VirtualCallMetadata;
use cg_core::{DeclId, Graph, GraphEdge, NodeId, ObjectName, ObjectRef};

use crate::extract::{CalleeRef, ExtractedUnit};
use crate::solver::EquivalenceClassSolver;

/// Resolve every call constraint against the solved equivalence classes
/// and insert the resulting edges into `graph`. `node_ids` maps a
/// function's mangled name to its already-inserted graph node.
/// `params_by_name` maps a function's mangled name to its parameter decl
/// ids in declaration order, used to bind call-site arguments into the
/// resolved callee's own object identities (§4.5/§4.6, §8 scenario 4).
pub fn resolve(
    unit: &ExtractedUnit,
    solver: &mut EquivalenceClassSolver,
    node_ids: &HashMap<String, NodeId>,
    params_by_name: &HashMap<String, Vec<DeclId>>,
    graph: &mut Graph,
) {
    for call in &unit.calls {
        let Some(&caller_id) = node_ids.get(&call.caller) else {
            tracing::warn!(caller = %call.caller, "call site's enclosing function has no graph node; skipping");
            continue;
        };
        match &call.callee {
            CalleeRef::Direct(name) => {
                if let Some(&callee_id) = node_ids.get(name) {
                    insert_edge(graph, caller_id, callee_id);
                    bind_call(solver, name, call);
                } else {
                    tracing::warn!(callee = %name, "direct call target not found in function map; skipping (UnknownSymbol)");
                }
            }
            CalleeRef::Indirect(obj) => {
                let candidates = solver.callee_decls(obj);
                if candidates.is_empty() {
                    tracing::debug!(caller = %call.caller, "indirect call site resolved to no known function; over-approximation found nothing");
                    attach_virtual_call_metadata(graph, caller_id, call);
                }
                for name in &candidates {
                    if let Some(&callee_id) = node_ids.get(name) {
                        insert_edge(graph, caller_id, callee_id);
                    }
                    bind_call(solver, name, call);
                }
            }
        }
    }

    // Parameter <-> argument binding runs as its own pass, after every
    // call's own callee has been resolved, since a call can only bind
    // into a callee's parameters once `params_by_name` tells us what
    // those parameter objects are named.
    for call in &unit.calls {
        if call.args.is_empty() {
            continue;
        }
        let names: Vec<String> = match &call.callee {
            CalleeRef::Direct(name) => vec![name.clone()],
            CalleeRef::Indirect(obj) => solver.callee_decls(obj),
        };
        for name in names {
            let Some(params) = params_by_name.get(&name) else { continue };
            for (arg, param) in call.args.iter().zip(params) {
                let param_obj = ObjectRef::object(ObjectName::Decl(param.clone()));
                solver.union(arg, &param_obj);
            }
        }
    }
}

/// When a `base.method(...)` call site resolves to nothing within this
/// translation unit, record the unqualified method name as `VirtualCallMD`
/// on the caller so `cg-merge`'s whole-program pass can still wire an edge
/// once the rest of the class hierarchy is known (§8 scenario 3).
fn attach_virtual_call_metadata(graph: &mut Graph, caller_id: NodeId, call: &crate::extract::CallConstraint) {
    let Some(name) = &call.virtual_name else { return };
    if let Some(node) = graph.node_mut(caller_id) {
        let md = node.metadata.get_or_create::<VirtualCallMetadata>(VirtualCallMetadata::KEY);
        if !md.might_call_methods.contains(name) {
            md.might_call_methods.push(name.clone());
        }
    }
}

/// Binds a call site's receiver (`base` in `base.method()`) to the
/// resolved callee's own `this` identity, so member accesses made through
/// `this` inside the callee and through the call-site object outside it
/// fall into the same equivalence class (§8 scenario 4).
fn bind_call(solver: &mut EquivalenceClassSolver, callee_name: &str, call: &crate::extract::CallConstraint) {
    if let Some(this_obj) = &call.this_obj {
        let callee_this = ObjectRef::object(ObjectName::This {
            parent: Box::new(ObjectName::Decl(DeclId::new(callee_name.to_string()))),
        });
        solver.union(this_obj, &callee_this);
    }
}

fn insert_edge(graph: &mut Graph, caller: NodeId, callee: NodeId) {
    if !graph.has_edge_between(caller, callee) {
        graph.add_edge(GraphEdge::new(caller, callee));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{AssignConstraint, CallConstraint};
    use cg_core::{GraphNode, IdScheme, ObjectName, ObjectRef};
    use cg_core::DeclId;

    #[test]
    fn indirect_call_resolves_through_solved_alias() {
        let mut graph = Graph::new(IdScheme::NameOnly);
        let mut node_ids = HashMap::new();
        node_ids.insert("f".to_string(), graph.insert(GraphNode::new("f").with_body(true)).unwrap());
        node_ids.insert("foo".to_string(), graph.insert(GraphNode::new("foo").with_body(true)).unwrap());

        let mut solver = EquivalenceClassSolver::new();
        let fp = ObjectRef::object(ObjectName::Decl(DeclId::new("f#fp")));
        let foo = ObjectRef::object(ObjectName::Decl(DeclId::new("foo")));
        solver.union(&fp, &foo);

        let unit = ExtractedUnit {
            assigns: vec![AssignConstraint { lhs: fp.clone(), rhs: foo }],
            members: vec![],
            derefs: vec![],
            calls: vec![CallConstraint {
                caller: "f".to_string(),
                callee: crate::extract::CalleeRef::Indirect(fp),
                loc_hash: 0,
                virtual_name: None,
                args: vec![],
                this_obj: None,
            }],
        };

        resolve(&unit, &mut solver, &node_ids, &HashMap::new(), &mut graph);
        let f_id = node_ids["f"];
        let foo_id = node_ids["foo"];
        assert!(graph.has_edge_between(f_id, foo_id));
    }

    #[test]
    fn unresolved_method_call_attaches_virtual_call_metadata() {
        let mut graph = Graph::new(IdScheme::NameOnly);
        let mut node_ids = HashMap::new();
        node_ids.insert("f".to_string(), graph.insert(GraphNode::new("f").with_body(true)).unwrap());

        let mut solver = EquivalenceClassSolver::new();
        let base = ObjectRef::object(ObjectName::Decl(DeclId::new("f#obj")));
        let call_obj = ObjectRef::object(ObjectName::Member { base: Box::new(base.clone()), field: DeclId::new("speak") });

        let unit = ExtractedUnit {
            assigns: vec![],
            members: vec![],
            derefs: vec![],
            calls: vec![CallConstraint {
                caller: "f".to_string(),
                callee: crate::extract::CalleeRef::Indirect(call_obj),
                loc_hash: 0,
                virtual_name: Some("speak".to_string()),
                args: vec![],
                this_obj: Some(base),
            }],
        };

        resolve(&unit, &mut solver, &node_ids, &HashMap::new(), &mut graph);
        let f_id = node_ids["f"];
        let md = graph
            .node(f_id)
            .unwrap()
            .metadata
            .get(cg_core::metadata::VirtualCallMetadata::KEY)
            .and_then(|v| v.as_any().downcast_ref::<cg_core::metadata::VirtualCallMetadata>())
            .unwrap();
        assert_eq!(md.might_call_methods, vec!["speak".to_string()]);
    }
}
