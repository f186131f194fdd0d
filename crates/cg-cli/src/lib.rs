//! Shared plumbing for the four `cg-cli` binaries: exit-code taxonomy,
//! logging setup, collector selection, and the small graph transforms
//! (`--prune`, the alias over-approximation wiring) more than one binary
//! needs.

use std::collections::HashMap;
use std::path::Path;

use cg_collector::collectors;
use cg_collector::pipeline::Pipeline;
use cg_core::{Graph, NodeId};

/// §6/§7 exit-code taxonomy. `0` success is `std::process::ExitCode::SUCCESS`
/// and isn't represented here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitStatus {
    ArgumentError = 1,
    GraphConstructionFailed = 2,
    NoMainFound = 3,
    IoFailure = 4,
}

impl From<ExitStatus> for std::process::ExitCode {
    fn from(status: ExitStatus) -> Self {
        std::process::ExitCode::from(status as u8)
    }
}

/// Installs a `tracing-subscriber` filter driven by `--log-level`, matching
/// the rest of the workspace's logging conventions.
pub fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// The collector-selection set from §6's CLI surface. `All` expands to
/// every built-in collector; `None` means run no optional collectors at
/// all (the override/entry/loop-depth graph passes still run — they're
/// not optional, they're how `hasBody`/virtual dispatch/entry metadata
/// get populated at all).
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CollectorSelection {
    None,
    NumStatements,
    CodeStatistics,
    LoopDepth,
    GlobalLoopDepth,
    MallocVariable,
    NumConditionalBranches,
    NumOperations,
    UniqueTypes,
    OverrideMd,
    All,
}

/// Builds a pipeline carrying exactly the decl collectors named in
/// `selected` (deduped; order doesn't matter, §4.9 leaves collector
/// ordering unspecified), plus the graph-level passes every run needs.
pub fn build_pipeline(
    selected: &[CollectorSelection],
    tu: &cg_frontend::TranslationUnit,
    node_ids: &HashMap<String, NodeId>,
) -> Pipeline {
    let mut pipeline = Pipeline::new();
    let all = selected.contains(&CollectorSelection::All);
    let want = |sel: CollectorSelection| all || selected.contains(&sel);

    if want(CollectorSelection::NumStatements) {
        pipeline.register_decl_collector(Box::new(collectors::NumStatementsCollector));
    }
    if want(CollectorSelection::CodeStatistics) {
        pipeline.register_decl_collector(Box::new(collectors::CodeStatisticsCollector));
    }
    if want(CollectorSelection::LoopDepth) {
        pipeline.register_decl_collector(Box::new(collectors::LoopDepthCollector));
    }
    if want(CollectorSelection::NumConditionalBranches) {
        pipeline.register_decl_collector(Box::new(collectors::NumConditionalBranchesCollector));
    }
    if want(CollectorSelection::NumOperations) {
        pipeline.register_decl_collector(Box::new(collectors::NumOperationsCollector));
    }
    if want(CollectorSelection::UniqueTypes) {
        pipeline.register_decl_collector(Box::new(collectors::UniqueTypeCollector));
    }
    if want(CollectorSelection::MallocVariable) {
        pipeline.register_decl_collector(Box::new(collectors::MallocVariableCollector));
    }
    // FileProperties/Inline carry no selection flag of their own in §6;
    // they're cheap structural facts, always on, like the graph passes
    // below.
    pipeline.register_decl_collector(Box::new(collectors::FilePropertiesCollector));
    pipeline.register_decl_collector(Box::new(collectors::InlineCollector));

    pipeline.register_graph_collector(Box::new(collectors::override_collector(&tu.decls, node_ids)));
    pipeline.register_graph_collector(Box::new(collectors::EntryFunctionCollector));
    if all || selected.contains(&CollectorSelection::GlobalLoopDepth) || want(CollectorSelection::LoopDepth) {
        pipeline.register_graph_collector(Box::new(collectors::GlobalLoopDepthCollector));
    }
    pipeline
}

/// `--pluginPaths=`: the original tool dynamically loads `.so` pass
/// plugins at this point. This workspace has no `libloading` dependency
/// and no stable plugin ABI to load against, so a path here is accepted
/// syntactically and warned about once rather than silently ignored.
pub fn warn_unsupported_plugin_paths(paths: &[String]) {
    if !paths.is_empty() {
        tracing::warn!(
            count = paths.len(),
            "--pluginPaths is not supported by this build; dynamic pass loading was dropped, ignoring"
        );
    }
}

/// `--prune`: drop bodyless nodes with no incident edges at all — they
/// contribute nothing but noise to a whole-program graph (an unresolved
/// libc declaration nobody ends up calling, for instance).
pub fn prune_disconnected_bodyless(graph: &mut Graph) {
    let doomed: Vec<NodeId> = graph
        .node_ids()
        .filter(|&id| {
            let Some(node) = graph.node(id) else { return false };
            !node.has_body && graph.edges_from(id).next().is_none() && graph.edges_to(id).next().is_none()
        })
        .collect();
    for id in doomed {
        graph.remove_node(id);
    }
}

/// Reads a source file as UTF-8, mapping I/O failure onto the §6 exit
/// taxonomy rather than panicking.
pub fn read_source(path: &Path) -> Result<String, ExitStatus> {
    std::fs::read_to_string(path).map_err(|err| {
        tracing::error!(path = %path.display(), %err, "failed to read input file");
        ExitStatus::IoFailure
    })
}
