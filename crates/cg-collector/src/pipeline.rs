//! Plugin / pass pipeline (C9): per-decl collectors run before per-graph
//! collectors; a collector crash is isolated and logged (§4.9).

use std::panic::{catch_unwind, AssertUnwindSafe};

use cg_core::{Graph, MetadataValue, NodeId};
use cg_frontend::Decl;

/// `compute(function_decl) -> Option<MetaData>`, called once per decl
/// after the AST walk; ordering across collectors is unspecified.
pub trait PerDeclCollector {
    fn name(&self) -> &'static str;
    fn compute(&self, decl: &Decl) -> Option<(&'static str, Box<dyn MetadataValue>)>;
}

/// `compute(graph)`, called once all per-decl collectors have finished.
/// May read or write node/edge metadata.
pub trait PerGraphCollector {
    fn name(&self) -> &'static str;
    fn compute(&self, graph: &mut Graph);
}

#[derive(Default)]
pub struct Pipeline {
    decl_collectors: Vec<Box<dyn PerDeclCollector>>,
    graph_collectors: Vec<Box<dyn PerGraphCollector>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_decl_collector(&mut self, collector: Box<dyn PerDeclCollector>) {
        self.decl_collectors.push(collector);
    }

    pub fn register_graph_collector(&mut self, collector: Box<dyn PerGraphCollector>) {
        self.graph_collectors.push(collector);
    }

    /// Runs every per-decl collector over `decl`, attaching results to the
    /// graph node `id`. A panicking collector is caught and logged; it
    /// does not abort the remaining collectors or the overall run.
    pub fn run_decl_phase(&self, decl: &Decl, id: NodeId, graph: &mut Graph) {
        for collector in &self.decl_collectors {
            let name = collector.name();
            let result = catch_unwind(AssertUnwindSafe(|| collector.compute(decl)));
            match result {
                Ok(Some((key, value))) => {
                    if let Some(node) = graph.node_mut(id) {
                        node.metadata.insert(key, value);
                    }
                }
                Ok(None) => {}
                Err(_) => {
                    tracing::error!(collector = name, decl = ?decl.mangled_names, "per-decl collector panicked; skipping");
                }
            }
        }
    }

    /// Runs every per-graph collector. Guaranteed to start only after
    /// every `run_decl_phase` call for this graph has returned (§4.9a).
    pub fn run_graph_phase(&self, graph: &mut Graph) {
        for collector in &self.graph_collectors {
            let name = collector.name();
            let result = catch_unwind(AssertUnwindSafe(|| {
                collector.compute(graph);
            }));
            if result.is_err() {
                tracing::error!(collector = name, "per-graph collector panicked; skipping");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cg_core::{GraphNode, IdScheme};
    use cg_frontend::DeclKind;
    use cg_core::DeclId as CoreDeclId;

    struct PanicCollector;
    impl PerDeclCollector for PanicCollector {
        fn name(&self) -> &'static str {
            "panic"
        }
        fn compute(&self, _decl: &Decl) -> Option<(&'static str, Box<dyn MetadataValue>)> {
            panic!("boom");
        }
    }

    fn sample_decl() -> Decl {
        Decl {
            id: CoreDeclId::new("f"),
            kind: DeclKind::Function,
            mangled_names: vec!["f".to_string()],
            params: vec![],
            variadic: false,
            body: vec![],
            overrides: vec![],
            parent_record: None,
            implicit: false,
            template_dependent: false,
            origin_file: "t.c".to_string(),
            from_system_include: false,
            loc: Default::default(),
        }
    }

    #[test]
    fn a_panicking_collector_does_not_abort_the_phase() {
        let mut pipeline = Pipeline::new();
        pipeline.register_decl_collector(Box::new(PanicCollector));
        let mut graph = Graph::new(IdScheme::NameOnly);
        let id = graph.insert(GraphNode::new("f")).unwrap();
        pipeline.run_decl_phase(&sample_decl(), id, &mut graph);
    }
}
