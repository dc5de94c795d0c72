//! Native compiler service contract
//!
//! The external ahead-of-time compiler is reached only through the
//! [`CompilerService`] trait. Production embeds the real backend; tests
//! drive the bridge with a deterministic fake.

use dashmap::DashMap;
use thiserror::Error;

use crate::target::EncodedSignature;

/// Handle to one natively compiled entry point, callable without going
/// through managed dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeEntryPoint(pub u64);

/// Error reported by the native compiler backend for a single function.
#[derive(Debug, Error)]
pub enum CompileError {
    /// The backend failed internally
    #[error("native backend error: {0}")]
    Backend(String),
    /// The signature cannot be lowered by this backend
    #[error("unsupported signature: {0}")]
    UnsupportedSignature(String),
}

/// The external native compiler.
///
/// Implementations perform real code generation on their own threads; from
/// the orchestrator's perspective each call is an opaque unit of work.
pub trait CompilerService: Send + Sync + 'static {
    /// Compile one function, returning its native entry point.
    fn compile(
        &self,
        signature: &EncodedSignature,
        options: &str,
    ) -> Result<NativeEntryPoint, CompileError>;

    /// Atomically record `current` as the active compiler version and return
    /// the previously recorded one. An empty string means the native side is
    /// shutting down and there is nothing to reconcile.
    fn recorded_version_exchange(&self, current: &str) -> String;

    /// Best-effort interruption of in-flight compilation. May not stop work
    /// that has already started.
    fn interrupt(&self) {}

    /// The module set is about to be unloaded; member handles held by the
    /// native side become invalid after this returns.
    fn domain_reload(&self) {}
}

/// Append-only table of compiled entry points, keyed by encoded signature.
///
/// A single writer (the bridge worker) appends entries as compilation
/// completes; the rewriter reads concurrently while processing modules.
#[derive(Debug, Default)]
pub struct EntryPointTable {
    entries: DashMap<EncodedSignature, NativeEntryPoint>,
}

impl EntryPointTable {
    /// Empty table.
    pub fn new() -> Self {
        EntryPointTable::default()
    }

    /// Record the entry point for a signature.
    pub fn insert(&self, signature: EncodedSignature, entry: NativeEntryPoint) {
        self.entries.insert(signature, entry);
    }

    /// Look up the entry point for a signature.
    pub fn get(&self, signature: &EncodedSignature) -> Option<NativeEntryPoint> {
        self.entries.get(signature).map(|e| *e.value())
    }

    /// Whether an entry point exists for a signature.
    pub fn contains(&self, signature: &EncodedSignature) -> bool {
        self.entries.contains_key(signature)
    }

    /// Number of recorded entry points.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
