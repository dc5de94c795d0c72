//! Call-site scanning and patching
//!
//! Given one compiled module image, redirect every managed call whose
//! target is natively compiled and has a finished entry point so it calls
//! through the native entry-point table instead of managed dispatch. The
//! image is written back only if at least one call was redirected.

use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, trace};

use crate::bridge::EntryPointTable;
use crate::target::EncodedSignature;

use super::image::{scan_call_sites, DebugSymbols, ModuleImage, Opcode};
use super::resolver::ModuleResolver;

/// The native-compiler integration module. Images that do not reference it
/// cannot contain eligible call sites and are skipped outright.
pub const INTEROP_MODULE: &str = "brisk_interop";

/// One compiled module handed over by the build pipeline.
#[derive(Debug, Clone)]
pub struct RewriteInput {
    /// Module name, for diagnostics
    pub module_name: String,
    /// Serialized image bytes
    pub code: Vec<u8>,
    /// Optional debug-symbol sidecar bytes
    pub debug: Option<Vec<u8>>,
    /// Folders containing all referenced modules
    pub reference_paths: Vec<PathBuf>,
    /// The module is built for the interactive-host configuration
    pub interactive_host: bool,
}

/// Code + debug-symbol bytes for one compiled module. Owned exclusively by
/// the rewriter for the duration of one `process` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryImage {
    /// Serialized image bytes
    pub code: Vec<u8>,
    /// Regenerated debug-symbol sidecar
    pub debug: Option<Vec<u8>>,
}

/// Result of one rewriter invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteOutcome {
    /// The module does not reference the integration module
    NotApplicable,
    /// No eligible call sites; the caller skips the write-back
    Unchanged,
    /// At least one call site was redirected
    Rewritten(BinaryImage),
}

/// Fatal rewrite failure. Wraps the original cause; no partial output is
/// ever produced. The caller decides whether to fail the build or fall back
/// to the unmodified image.
#[derive(Debug, Error)]
#[error("internal compiler error while rewriting module '{module}'")]
pub struct RewriteError {
    /// Module being processed when the failure occurred
    pub module: String,
    /// Original cause
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

#[derive(Debug, Error)]
#[error("function '{function}' not found in module '{module}'")]
struct UnresolvedFunction {
    module: String,
    function: String,
}

#[derive(Debug, Error)]
#[error("call site references unknown function-reference index {0}")]
struct BadFuncRefIndex(u32);

/// Rewrites call sites against the orchestrator's entry-point table.
pub struct CallSiteRewriter<'a> {
    entry_points: &'a EntryPointTable,
}

struct Patch {
    function_index: usize,
    offset: usize,
    signature: String,
}

impl<'a> CallSiteRewriter<'a> {
    /// Create a rewriter reading the given entry-point table.
    pub fn new(entry_points: &'a EntryPointTable) -> Self {
        CallSiteRewriter { entry_points }
    }

    /// Process one module image per the rewrite contract.
    pub fn process(&self, input: RewriteInput) -> Result<RewriteOutcome, RewriteError> {
        let module = input.module_name.clone();
        self.process_inner(input).map_err(|source| RewriteError {
            module,
            source,
        })
    }

    fn process_inner(
        &self,
        input: RewriteInput,
    ) -> Result<RewriteOutcome, Box<dyn std::error::Error + Send + Sync>> {
        let mut image = ModuleImage::decode(&input.code)?;
        if !image.references_module(INTEROP_MODULE) {
            trace!(module = %image.name, "no interop reference, skipping");
            return Ok(RewriteOutcome::NotApplicable);
        }

        let mut resolver = ModuleResolver::new(input.reference_paths.clone());
        let patches = collect_patches(&image, &mut resolver, self.entry_points)?;
        if patches.is_empty() {
            debug!(module = %image.name, "no eligible call sites");
            return Ok(RewriteOutcome::Unchanged);
        }

        let patched = patches.len();
        for patch in patches {
            let slot = image.intern_native_slot(&patch.signature);
            let code = &mut image.functions[patch.function_index].code;
            code[patch.offset] = Opcode::CallNative as u8;
            code[patch.offset + 1..patch.offset + 5].copy_from_slice(&slot.to_le_bytes());
        }
        debug!(
            module = %image.name,
            patched,
            interactive_host = input.interactive_host,
            "call sites redirected to native entry points"
        );

        let code = image.encode();
        let debug = Some(DebugSymbols::generate(&image)?.to_bytes()?);
        Ok(RewriteOutcome::Rewritten(BinaryImage { code, debug }))
    }
}

/// Find every managed call whose target is natively compiled and has an
/// available entry point.
fn collect_patches(
    image: &ModuleImage,
    resolver: &mut ModuleResolver,
    entry_points: &EntryPointTable,
) -> Result<Vec<Patch>, Box<dyn std::error::Error + Send + Sync>> {
    let mut patches = Vec::new();
    for site in scan_call_sites(image)? {
        if site.opcode != Opcode::CallManaged {
            continue;
        }
        let func_ref = image
            .func_refs
            .get(site.operand as usize)
            .ok_or(BadFuncRefIndex(site.operand))?;

        // Self-references resolve against the image itself
        let target = if func_ref.module == image.name {
            find_function(image, &func_ref.function)
        } else {
            find_function(resolver.resolve(&func_ref.module)?, &func_ref.function)
        };
        let target = target.ok_or_else(|| UnresolvedFunction {
            module: func_ref.module.clone(),
            function: func_ref.function.clone(),
        })?;

        if !target.is_native_compiled() {
            continue;
        }
        let signature = EncodedSignature::from_raw(target.signature.clone());
        if !entry_points.contains(&signature) {
            // Compilation was requested during scheduling but has not
            // finished; leave the managed call in place
            continue;
        }
        patches.push(Patch {
            function_index: site.function_index,
            offset: site.offset,
            signature: target.signature.clone(),
        });
    }
    Ok(patches)
}

fn find_function<'i>(
    image: &'i ModuleImage,
    name: &str,
) -> Option<&'i super::image::FunctionDef> {
    image.functions.iter().find(|f| f.name == name)
}
