//! dbt result artifacts read from a `target/` directory.

use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

use crate::paths::ARTIFACT_NAMES;
use crate::store::ledger::ArgSnapshot;

/// The four artifacts. Absent or unparsable files are `{}` and listed in `missing`.
#[derive(Debug, Clone, Serialize)]
pub struct Artifacts {
    pub manifest: Value,
    pub run_results: Value,
    pub sources: Value,
    pub catalog: Value,
    pub missing: Vec<String>,
}

impl Default for Artifacts {
    fn default() -> Self {
        Self {
            manifest: empty(),
            run_results: empty(),
            sources: empty(),
            catalog: empty(),
            missing: Vec::new(),
        }
    }
}

fn empty() -> Value {
    Value::Object(Map::new())
}

fn read_artifact(target_dir: &Path, name: &str) -> Option<Value> {
    let path = target_dir.join(format!("{}.json", name));
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "artifact not readable");
            return None;
        }
    };
    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "artifact is not valid JSON");
            None
        }
    }
}

/// Read every artifact from `target_dir`. Never fails.
pub fn collect(target_dir: &Path) -> Artifacts {
    let mut artifacts = Artifacts::default();
    for name in ARTIFACT_NAMES {
        let Some(value) = read_artifact(target_dir, name) else {
            artifacts.missing.push(name.to_string());
            continue;
        };
        match name {
            "manifest" => artifacts.manifest = value,
            "run_results" => artifacts.run_results = value,
            "sources" => artifacts.sources = value,
            "catalog" => artifacts.catalog = value,
            _ => {}
        }
    }
    artifacts
}

fn arg_text(args: &Map<String, Value>, key: &str) -> String {
    match args.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Flatten `run_results.args` into the snapshot fields.
pub fn arg_snapshot(run_results: &Value) -> ArgSnapshot {
    let empty = Map::new();
    let args = run_results
        .get("args")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    ArgSnapshot {
        quiet: arg_text(args, "quiet"),
        which: arg_text(args, "which"),
        no_print: arg_text(args, "no_print"),
        rpc_method: arg_text(args, "rpc_method"),
        use_colors: arg_text(args, "use_colors"),
        write_json: arg_text(args, "write_json"),
        profiles_dir: arg_text(args, "profiles_dir"),
        partial_parse: arg_text(args, "partial_parse"),
        printer_width: arg_text(args, "printer_width"),
        static_parser: arg_text(args, "static_parser"),
        version_check: arg_text(args, "version_check"),
        event_buffer_size: arg_text(args, "event_buffer_size"),
        indirect_selection: arg_text(args, "indirect_selection"),
        send_anonymous: arg_text(args, "send_anonymous_usage_stats"),
        usage_stats: arg_text(args, "usage_stats"),
    }
}
