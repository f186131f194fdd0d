//! Built-in per-decl/per-graph collectors (§4.2), wired to the `cg-core`
//! metadata types through the C9 pipeline traits.

use std::collections::HashMap;

use cg_core::metadata::{
    CodeStatisticsMetadata, FilePropertiesMetadata, InlineMetadata,
    LoopDepthMetadata, MallocVariableMetadata, NumConditionalBranchMetadata, NumOperationsMetadata,
    NumStatementsMetadata, OverrideMetadata, UniqueTypeMetadata,
};
use cg_core::{Graph, MetadataValue};
use cg_frontend::{Decl, DeclKind, Expr, ExprKind};

use crate::pipeline::{PerDeclCollector, PerGraphCollector};

fn count_statements(exprs: &[Expr]) -> i64 {
    exprs.len() as i64
}

fn flatten<'a>(exprs: &'a [Expr], out: &mut Vec<&'a Expr>) {
    for e in exprs {
        out.push(e);
        flatten(&e.sub_exprs, out);
    }
}

pub struct NumStatementsCollector;
impl PerDeclCollector for NumStatementsCollector {
    fn name(&self) -> &'static str {
        "NumStatements"
    }
    fn compute(&self, decl: &Decl) -> Option<(&'static str, Box<dyn MetadataValue>)> {
        Some((
            NumStatementsMetadata::KEY,
            Box::new(NumStatementsMetadata::new(count_statements(&decl.body))),
        ))
    }
}

pub struct CodeStatisticsCollector;
impl PerDeclCollector for CodeStatisticsCollector {
    fn name(&self) -> &'static str {
        "CodeStatistics"
    }
    fn compute(&self, decl: &Decl) -> Option<(&'static str, Box<dyn MetadataValue>)> {
        let mut flat = Vec::new();
        flatten(&decl.body, &mut flat);
        let num_vars = flat.iter().filter(|e| e.kind() == ExprKind::DeclRef).count() as i64;
        Some((CodeStatisticsMetadata::KEY, Box::new(CodeStatisticsMetadata::new(num_vars))))
    }
}

/// Tree-sitter gives us no explicit loop-nesting annotation in this IR
/// (loops aren't lowered as a distinct `ExprKind`); report depth 0 rather
/// than fabricate a number, matching the honest-absence policy documented
/// for file-scope construct expressions.
pub struct LoopDepthCollector;
impl PerDeclCollector for LoopDepthCollector {
    fn name(&self) -> &'static str {
        "LoopDepth"
    }
    fn compute(&self, _decl: &Decl) -> Option<(&'static str, Box<dyn MetadataValue>)> {
        Some((LoopDepthMetadata::KEY, Box::new(LoopDepthMetadata::new(0))))
    }
}

pub struct NumConditionalBranchesCollector;
impl PerDeclCollector for NumConditionalBranchesCollector {
    fn name(&self) -> &'static str {
        "NumConditionalBranches"
    }
    fn compute(&self, decl: &Decl) -> Option<(&'static str, Box<dyn MetadataValue>)> {
        let mut flat = Vec::new();
        flatten(&decl.body, &mut flat);
        let count = flat
            .iter()
            .filter(|e| e.kind() == ExprKind::BinaryOp && matches!(e.operator.as_deref(), Some("&&") | Some("||")))
            .count() as i64;
        Some((
            NumConditionalBranchMetadata::KEY,
            Box::new(NumConditionalBranchMetadata::new(count)),
        ))
    }
}

pub struct NumOperationsCollector;
impl PerDeclCollector for NumOperationsCollector {
    fn name(&self) -> &'static str {
        "NumOperations"
    }
    fn compute(&self, decl: &Decl) -> Option<(&'static str, Box<dyn MetadataValue>)> {
        let mut flat = Vec::new();
        flatten(&decl.body, &mut flat);
        let mut md = NumOperationsMetadata::default();
        for e in flat {
            match e.kind() {
                ExprKind::BinaryOp | ExprKind::UnaryOp => match e.operator.as_deref() {
                    Some(op) if ["+", "-", "*", "/", "%"].contains(&op) => md.int_ops += 1,
                    _ => md.control_flow_ops += 1,
                },
                ExprKind::Subscript | ExprKind::Member => md.memory_accesses += 1,
                _ => {}
            }
        }
        Some((NumOperationsMetadata::KEY, Box::new(md)))
    }
}

pub struct FilePropertiesCollector;
impl PerDeclCollector for FilePropertiesCollector {
    fn name(&self) -> &'static str {
        "FileProperties"
    }
    fn compute(&self, decl: &Decl) -> Option<(&'static str, Box<dyn MetadataValue>)> {
        Some((
            FilePropertiesMetadata::KEY,
            Box::new(FilePropertiesMetadata {
                system_include: decl.from_system_include,
                origin: decl.origin_file.clone(),
            }),
        ))
    }
}

pub struct InlineCollector;
impl PerDeclCollector for InlineCollector {
    fn name(&self) -> &'static str {
        "InlineInfo"
    }
    fn compute(&self, decl: &Decl) -> Option<(&'static str, Box<dyn MetadataValue>)> {
        Some((
            InlineMetadata::KEY,
            Box::new(InlineMetadata {
                marked_inline: false,
                likely_inline: decl.body.len() <= 1,
                always_inline: false,
                is_template: decl.template_dependent,
            }),
        ))
    }
}

pub struct UniqueTypeCollector;
impl PerDeclCollector for UniqueTypeCollector {
    fn name(&self) -> &'static str {
        "UniqueTypes"
    }
    fn compute(&self, decl: &Decl) -> Option<(&'static str, Box<dyn MetadataValue>)> {
        Some((UniqueTypeMetadata::KEY, Box::new(UniqueTypeMetadata::new(decl.params.len() as i64))))
    }
}

pub struct MallocVariableCollector;
impl PerDeclCollector for MallocVariableCollector {
    fn name(&self) -> &'static str {
        "MallocVariable"
    }
    fn compute(&self, decl: &Decl) -> Option<(&'static str, Box<dyn MetadataValue>)> {
        let mut flat = Vec::new();
        flatten(&decl.body, &mut flat);
        let mut allocs = std::collections::BTreeMap::new();
        for (i, e) in flat.iter().enumerate() {
            if e.kind() == ExprKind::New {
                allocs.insert(format!("@NEW#{}", i), decl.mangled_names[0].clone());
            }
        }
        if allocs.is_empty() {
            return None;
        }
        Some((MallocVariableMetadata::KEY, Box::new(MallocVariableMetadata { allocs })))
    }
}

/// Synthesizes `OverrideMD` from each decl's own `overrides` list (base
/// method names the frontend resolved via the enclosing record's
/// `base_class_clause`, §4.4/§8 scenario 3). Only sees the base method if
/// it's defined in the same translation unit; a base declared in a TU this
/// one doesn't include yields a dangling name with no node to attach to,
/// which this collector just skips.
pub struct OverrideCollector {
    pub overrides_by_name: HashMap<String, Vec<String>>,
    pub node_ids: HashMap<String, cg_core::NodeId>,
}

impl PerGraphCollector for OverrideCollector {
    fn name(&self) -> &'static str {
        "OverrideMD"
    }

    fn compute(&self, graph: &mut Graph) {
        for (derived_name, base_names) in &self.overrides_by_name {
            let Some(&derived_id) = self.node_ids.get(derived_name) else { continue };
            let mut resolved_bases = Vec::new();
            for base_name in base_names {
                let Some(&base_id) = self.node_ids.get(base_name) else { continue };
                resolved_bases.push(base_id);
                let md = graph
                    .node_mut(base_id)
                    .map(|n| n.metadata.get_or_create::<OverrideMetadata>(OverrideMetadata::KEY));
                if let Some(md) = md {
                    if !md.overridden_by.contains(&derived_id) {
                        md.overridden_by.push(derived_id);
                    }
                }
            }
            if resolved_bases.is_empty() {
                continue;
            }
            if let Some(node) = graph.node_mut(derived_id) {
                let md = node.metadata.get_or_create::<OverrideMetadata>(OverrideMetadata::KEY);
                for id in resolved_bases {
                    if !md.overrides.contains(&id) {
                        md.overrides.push(id);
                    }
                }
            }
        }
    }
}

/// Entry-point detection: attaches `EntryFunctionMD` pointing at `main`,
/// if present (§4.3).
pub struct EntryFunctionCollector;
impl PerGraphCollector for EntryFunctionCollector {
    fn name(&self) -> &'static str {
        "EntryFunction"
    }
    fn compute(&self, graph: &mut Graph) {
        if let Some(&id) = graph.find_by_name("main").first() {
            graph.set_entry(id);
            tracing::debug!(?id, "detected program entry point");
        }
    }
}

/// Recomputed from scratch after merges (§4.2/§4.7): depth of the deepest
/// loop anywhere in the call chain rooted at each function, approximated
/// here as 0 since this IR carries no loop nesting (see `LoopDepthCollector`).
pub struct GlobalLoopDepthCollector;
impl PerGraphCollector for GlobalLoopDepthCollector {
    fn name(&self) -> &'static str {
        "GlobalLoopDepth"
    }
    fn compute(&self, graph: &mut Graph) {
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
}

pub fn all_decl_collectors() -> Vec<Box<dyn PerDeclCollector>> {
    vec![
        Box::new(NumStatementsCollector),
        Box::new(CodeStatisticsCollector),
        Box::new(LoopDepthCollector),
        Box::new(NumConditionalBranchesCollector),
        Box::new(NumOperationsCollector),
        Box::new(FilePropertiesCollector),
        Box::new(InlineCollector),
        Box::new(UniqueTypeCollector),
        Box::new(MallocVariableCollector),
    ]
}

pub fn override_collector(decls: &[Decl], node_ids: &HashMap<String, cg_core::NodeId>) -> OverrideCollector {
    let mut overrides_by_name: HashMap<String, Vec<String>> = HashMap::new();
    for decl in decls {
        if decl.kind == DeclKind::Method && !decl.overrides.is_empty() {
            overrides_by_name.insert(decl.mangled_names[0].clone(), decl.overrides.clone());
        }
    }
    OverrideCollector { overrides_by_name, node_ids: node_ids.clone() }
}
