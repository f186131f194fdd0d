//! `cgmerge`: combines one or more per-TU `.ipcg` files into a single
//! whole-program `.mcg` (§4.7).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use cg_cli::{init_logging, ExitStatus};
use cg_core::{default_registry, Graph, IdScheme};
use cg_merge::{merge_into, recompute_global_loop_depth, MergeByName};

#[derive(Parser)]
#[command(name = "cgmerge")]
#[command(about = "Merges per-TU call graphs into one whole-program graph")]
struct Args {
    output: PathBuf,
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Run the merge and report statistics without writing the output file.
    #[arg(long)]
    validate_only: bool,

    #[arg(long, default_value = "info")]
    log_level: String,
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

    let registry = default_registry();
    let mut dest = Graph::new(IdScheme::NameAndOrigin);
    let strategy = MergeByName;

    for input in &args.inputs {
        let text = match std::fs::read_to_string(input) {
            Ok(t) => t,
            Err(err) => {
                tracing::error!(path = %input.display(), %err, "failed to read input .ipcg");
                return ExitStatus::IoFailure.into();
            }
        };
        let doc: serde_json::Value = match serde_json::from_str(&text) {
            Ok(d) => d,
            Err(err) => {
                tracing::error!(path = %input.display(), %err, "failed to parse input .ipcg as JSON");
                return ExitStatus::IoFailure.into();
            }
        };
        let source = match cg_core::io::read(&doc, &registry) {
            Ok(g) => g,
            Err(err) => {
                tracing::error!(path = %input.display(), %err, "failed to read graph document");
                return ExitStatus::GraphConstructionFailed.into();
            }
        };
        let report = match merge_into(&mut dest, &source, &strategy, &registry) {
            Ok(r) => r,
            Err(err) => {
                tracing::error!(path = %input.display(), %err, "merge failed");
                return ExitStatus::GraphConstructionFailed.into();
            }
        };
        tracing::info!(
            path = %input.display(),
            nodes_merged = report.nodes_merged,
            edges_added = report.edges_added,
            edges_folded = report.edges_folded,
            overapprox_edges_added = report.overapprox_edges_added,
            "merged translation unit"
        );
    }

    recompute_global_loop_depth(&mut dest);

    let main_id = dest.get_main(dest.entry_metadata().as_ref());
    if main_id.is_none() {
        tracing::warn!("whole-program graph has no entry function (main)");
    }

    if args.validate_only {
        let violations = cg_merge::validate_invariants(&dest);
        for v in &violations {
            tracing::error!(%v, "invariant violation");
        }
        tracing::info!(
            nodes = dest.node_count(),
            edges = dest.edge_count(),
            violations = violations.len(),
            "validate-only: not writing output"
        );
        return if violations.is_empty() {
            ExitCode::SUCCESS
        } else {
            ExitStatus::GraphConstructionFailed.into()
        };
    }

    if main_id.is_none() {
        return ExitStatus::NoMainFound.into();
    }

    let doc = cg_core::io::write_v3(&dest);
    let serialized = match serde_json::to_string_pretty(&doc) {
        Ok(s) => s,
        Err(err) => {
            tracing::error!(%err, "failed to serialize merged document");
            return ExitStatus::IoFailure.into();
        }
    };
    if let Err(err) = std::fs::write(&args.output, serialized) {
        tracing::error!(path = %args.output.display(), %err, "failed to write output file");
        return ExitStatus::IoFailure.into();
    }

    ExitCode::SUCCESS
}
