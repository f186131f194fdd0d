//! `cgconvert`: reads a MetaCG document of any supported version and
//! rewrites it as a different version (§4.8, §6).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use cg_cli::{init_logging, ExitStatus};
use cg_core::default_registry;
use cg_core::io::FormatVersion;

#[derive(Parser)]
#[command(name = "cgconvert")]
#[command(about = "Converts a MetaCG document between container versions")]
struct Args {
    input: PathBuf,
    output: PathBuf,

    /// Target container version; defaults to the newest (v3).
    #[arg(value_parser = ["2", "3"], default_value = "3")]
    version: String,

    /// Write the output even if the conversion would lose information
    /// (e.g. collapsing two same-named functions from different origins
    /// into one node in a name-keyed format).
    #[arg(long)]
    discard_failed_metadata: bool,

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

    let text = match std::fs::read_to_string(&args.input) {
        Ok(t) => t,
        Err(err) => {
            tracing::error!(path = %args.input.display(), %err, "failed to read input file");
            return ExitStatus::IoFailure.into();
        }
    };
    let doc: serde_json::Value = match serde_json::from_str(&text) {
        Ok(d) => d,
        Err(err) => {
            tracing::error!(path = %args.input.display(), %err, "failed to parse input as JSON");
            return ExitStatus::IoFailure.into();
        }
    };

    let registry = default_registry();
    let graph = match cg_core::io::read(&doc, &registry) {
        Ok(g) => g,
        Err(err) => {
            tracing::error!(%err, "failed to read source document");
            return ExitStatus::GraphConstructionFailed.into();
        }
    };

    let target = match args.version.as_str() {
        "2" => FormatVersion::V2,
        _ => FormatVersion::V3,
    };

    if let Err(err) = cg_core::io::check_lossy_export(&graph, target) {
        if args.discard_failed_metadata {
            tracing::warn!(%err, "continuing despite lossy export (--discard-failed-metadata)");
        } else {
            tracing::error!(%err, "aborting: export would lose information (pass --discard-failed-metadata to proceed)");
            return ExitStatus::IoFailure.into();
        }
    }

    let out_doc = match target {
        FormatVersion::V2 => cg_core::io::write_v2(&graph),
        _ => cg_core::io::write_v3(&graph),
    };
    let serialized = match serde_json::to_string_pretty(&out_doc) {
        Ok(s) => s,
        Err(err) => {
            tracing::error!(%err, "failed to serialize converted document");
            return ExitStatus::IoFailure.into();
        }
    };
    if let Err(err) = std::fs::write(&args.output, serialized) {
        tracing::error!(path = %args.output.display(), %err, "failed to write output file");
        return ExitStatus::IoFailure.into();
    }

    ExitCode::SUCCESS
}
