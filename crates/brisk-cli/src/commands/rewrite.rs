//! `brisk rewrite` — call-site rewriting of one compiled module image.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use anyhow::Context;

use brisk_engine::{
    CallSiteRewriter, EncodedSignature, EntryPointTable, NativeEntryPoint, RewriteInput,
    RewriteOutcome,
};

use crate::output;

/// Extension of the debug-symbol sidecar written next to an image.
const DEBUG_EXTENSION: &str = "dbg";

/// Run the rewrite pipeline over one image file.
///
/// Internal rewrite failures propagate and fail the invocation loudly; an
/// unchanged image skips the write-back entirely.
pub fn run(
    image: PathBuf,
    refs: Vec<PathBuf>,
    entry_points: Option<PathBuf>,
    interactive_host: bool,
    output_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    let code = fs::read(&image).with_context(|| format!("reading image {}", image.display()))?;
    let module_name = image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let debug_path = image.with_extension(DEBUG_EXTENSION);
    let debug = fs::read(&debug_path).ok();

    let table = match entry_points {
        Some(path) => load_entry_points(&path)?,
        None => EntryPointTable::new(),
    };

    let rewriter = CallSiteRewriter::new(&table);
    let outcome = rewriter.process(RewriteInput {
        module_name: module_name.clone(),
        code,
        debug,
        reference_paths: refs,
        interactive_host,
    })?;

    match outcome {
        RewriteOutcome::NotApplicable => {
            output::notice(&format!(
                "{}: no integration reference, nothing to do",
                module_name
            ));
        }
        RewriteOutcome::Unchanged => {
            output::info(&format!("{}: no eligible call sites, unchanged", module_name));
        }
        RewriteOutcome::Rewritten(binary) => {
            let target = output_path.unwrap_or(image);
            fs::write(&target, &binary.code)
                .with_context(|| format!("writing image {}", target.display()))?;
            if let Some(debug_bytes) = &binary.debug {
                let sidecar = target.with_extension(DEBUG_EXTENSION);
                fs::write(&sidecar, debug_bytes)
                    .with_context(|| format!("writing debug symbols {}", sidecar.display()))?;
            }
            output::success(&format!("{}: call sites rewritten", module_name));
        }
    }
    Ok(())
}

/// Load an entry-point table from a JSON map of encoded signature to
/// native entry address.
fn load_entry_points(path: &PathBuf) -> anyhow::Result<EntryPointTable> {
    let bytes =
        fs::read(path).with_context(|| format!("reading entry points {}", path.display()))?;
    let map: HashMap<String, u64> =
        serde_json::from_slice(&bytes).context("parsing entry-point map")?;

    let table = EntryPointTable::new();
    for (signature, address) in map {
        table.insert(EncodedSignature::from_raw(signature), NativeEntryPoint(address));
    }
    Ok(table)
}
