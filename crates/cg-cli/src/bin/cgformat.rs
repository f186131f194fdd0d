//! `cgformat`: canonicalizes a MetaCG document in place — sorted arrays,
//! rewritten origin prefixes, and (optionally) metadata keys the registry
//! doesn't recognize dropped rather than carried through opaquely (§6).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use cg_cli::{init_logging, ExitStatus};
use cg_core::default_registry;
use cg_core::io::FormatVersion;
use cg_core::OpaqueMetadata;

#[derive(Parser)]
#[command(name = "cgformat")]
#[command(about = "Canonicalizes a MetaCG document's whitespace, array order, and origin prefixes")]
struct Args {
    input: PathBuf,
    output: PathBuf,

    /// Rewrite origin/file paths starting with OLD to start with NEW
    /// instead, as `OLD=NEW`.
    #[arg(long = "rewrite-origin-prefix")]
    rewrite_origin_prefix: Option<String>,

    /// Drop metadata entries whose key the registry doesn't recognize,
    /// instead of carrying them through opaquely.
    #[arg(long)]
    discard_unparsable_metadata: bool,

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

    let prefix_rewrite = match &args.rewrite_origin_prefix {
        Some(spec) => match spec.split_once('=') {
            Some((old, new)) => Some((old.to_string(), new.to_string())),
            None => {
                eprintln!("--rewrite-origin-prefix expects OLD=NEW");
                return ExitStatus::ArgumentError.into();
            }
        },
        None => None,
    };

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
    let version = match detect_version(&doc) {
        Ok(v) => v,
        Err(err) => {
            tracing::error!(%err, "failed to determine document version");
            return ExitStatus::GraphConstructionFailed.into();
        }
    };

    let registry = default_registry();
    let mut graph = match cg_core::io::read(&doc, &registry) {
        Ok(g) => g,
        Err(err) => {
            tracing::error!(%err, "failed to read source document");
            return ExitStatus::GraphConstructionFailed.into();
        }
    };

    if let Some((old, new)) = &prefix_rewrite {
        for id in graph.node_ids().collect::<Vec<_>>() {
            if let Some(node) = graph.node_mut(id) {
                if let Some(origin) = &node.origin {
                    if let Some(rest) = origin.strip_prefix(old.as_str()) {
                        node.origin = Some(format!("{new}{rest}"));
                    } else {
                        tracing::debug!(%origin, old, "origin does not start with the given prefix; leaving as-is");
                    }
                }
            }
        }
    }

    if args.discard_unparsable_metadata {
        for id in graph.node_ids().collect::<Vec<_>>() {
            if let Some(node) = graph.node_mut(id) {
                drop_opaque_keys(&mut node.metadata);
            }
        }
    }

    let out_doc = match version {
        FormatVersion::V2 => cg_core::io::write_v2(&graph),
        _ => cg_core::io::write_v3(&graph),
    };
    let canonical = canonicalize(out_doc);
    let serialized = match serde_json::to_string_pretty(&canonical) {
        Ok(s) => s,
        Err(err) => {
            tracing::error!(%err, "failed to serialize canonicalized document");
            return ExitStatus::IoFailure.into();
        }
    };
    if let Err(err) = std::fs::write(&args.output, serialized) {
        tracing::error!(path = %args.output.display(), %err, "failed to write output file");
        return ExitStatus::IoFailure.into();
    }

    ExitCode::SUCCESS
}

fn detect_version(doc: &serde_json::Value) -> Result<FormatVersion, String> {
    let v = doc
        .get("_MetaCG")
        .and_then(|m| m.get("version"))
        .and_then(|v| v.as_str())
        .ok_or("missing _MetaCG.version")?;
    match v.split('.').next() {
        Some("2") => Ok(FormatVersion::V2),
        Some("3") => Ok(FormatVersion::V3),
        Some("1") => Ok(FormatVersion::V2), // v1 is read-only; always normalize forward.
        _ => Err(format!("unsupported version {v}")),
    }
}

fn drop_opaque_keys(metadata: &mut cg_core::MetadataMap) {
    let opaque_keys: Vec<String> = metadata
        .iter()
        .filter(|(_, v)| v.as_any().downcast_ref::<OpaqueMetadata>().is_some())
        .map(|(k, _)| k.to_string())
        .collect();
    for key in opaque_keys {
        metadata.remove(&key);
    }
}

/// Sorts object keys and any array made up entirely of strings, recursing
/// into every nested value. Arrays mixing strings with other shapes (v3's
/// `nodes`/`edges` tuples) are left in their original order — reordering
/// those would change which foreign id refers to which entry.
fn canonicalize(value: serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match value {
        Value::Object(map) => {
            let mut sorted: std::collections::BTreeMap<String, Value> = std::collections::BTreeMap::new();
            for (k, v) in map {
                sorted.insert(k, canonicalize(v));
            }
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k, v);
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            let mut items: Vec<Value> = items.into_iter().map(canonicalize).collect();
            if !items.is_empty() && items.iter().all(|v| v.is_string()) {
                items.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
            }
            Value::Array(items)
        }
        other => other,
    }
}
