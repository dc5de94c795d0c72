//! Compile targets and codegen option sets
//!
//! A compile target identifies one function (or one instantiable job type)
//! selected for native compilation, together with the codegen options its
//! declaring member resolved to. Targets are produced fresh on every
//! discovery pass and never persisted.

use std::fmt;

use rustc_hash::FxHashMap;

/// Identifies a method or type inside a loaded module.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberId {
    /// Module the member is declared in
    pub module: String,
    /// Fully qualified member name within the module
    pub name: String,
}

impl MemberId {
    /// Create a member identifier.
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        MemberId {
            module: module.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.module, self.name)
    }
}

/// The kind of member a compile target dispatches through.
///
/// Exactly one member backs each target; it is the member used for both
/// option extraction and signature encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetKind {
    /// A static function annotated for native compilation
    StaticMethod(MemberId),
    /// An instantiable job-like type whose execute method is compiled
    JobType(MemberId),
}

/// One function or job type selected for native compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileTarget {
    /// The dispatch-identifying member
    pub kind: TargetKind,
}

impl CompileTarget {
    /// Target backed by a static function.
    pub fn static_method(member: MemberId) -> Self {
        CompileTarget {
            kind: TargetKind::StaticMethod(member),
        }
    }

    /// Target backed by an instantiable job type.
    pub fn job_type(member: MemberId) -> Self {
        CompileTarget {
            kind: TargetKind::JobType(member),
        }
    }

    /// The single member used for option extraction and signature encoding.
    pub fn member(&self) -> &MemberId {
        match &self.kind {
            TargetKind::StaticMethod(m) | TargetKind::JobType(m) => m,
        }
    }

    /// Whether this target is a static function (as opposed to a job type).
    pub fn is_static_method(&self) -> bool {
        matches!(self.kind, TargetKind::StaticMethod(_))
    }
}

/// Keys controlling native code generation for one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionKey {
    /// Target floating-point precision model
    FloatPrecision,
    /// Optimization level passed to the backend
    OptLevel,
    /// Whether the function must be compiled before first dispatch
    Synchronous,
}

impl OptionKey {
    /// Stable wire name used when rendering the option string.
    pub fn as_str(self) -> &'static str {
        match self {
            OptionKey::FloatPrecision => "float-precision",
            OptionKey::OptLevel => "opt-level",
            OptionKey::Synchronous => "synchronous",
        }
    }
}

/// Ordered key-effect pairs controlling codegen.
///
/// Derived from a member's declared annotations; resolution may fail, which
/// excludes the target from the batch (not an error).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionSet {
    entries: Vec<(OptionKey, String)>,
}

impl OptionSet {
    /// Empty option set.
    pub fn new() -> Self {
        OptionSet::default()
    }

    /// Append a key-effect pair, preserving insertion order.
    pub fn push(&mut self, key: OptionKey, value: impl Into<String>) {
        self.entries.push((key, value.into()));
    }

    /// Look up the effect for a key, if present.
    pub fn get(&self, key: OptionKey) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Render the deterministic option string consumed by the compiler.
    pub fn render(&self) -> String {
        let parts: Vec<String> = self
            .entries
            .iter()
            .map(|(k, v)| format!("{}={}", k.as_str(), v))
            .collect();
        parts.join(";")
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Opaque, stable encoding of a function's calling convention and identity.
///
/// Used as the cache/dispatch key between the scheduler and the native
/// compiler. Two signatures are equal iff the underlying function is equal,
/// across recompilations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EncodedSignature(String);

impl EncodedSignature {
    /// Encode a target's member into its dispatch key.
    pub fn encode(target: &CompileTarget) -> Self {
        let member = target.member();
        let prefix = if target.is_static_method() { "fn" } else { "job" };
        EncodedSignature(format!("{}:{}::{}", prefix, member.module, member.name))
    }

    /// Wrap an already-encoded key (e.g. read back from a module image).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        EncodedSignature(raw.into())
    }

    /// The raw key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EncodedSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Annotation table mapping members to their declared codegen options.
///
/// Stand-in for reflection-based attribute scanning; shared between the
/// scheduler and the bridge's options-extractor callback. Lookups are
/// side-effect-free and reentrant.
#[derive(Debug, Default)]
pub struct AnnotationStore {
    options: FxHashMap<MemberId, OptionSet>,
}

impl AnnotationStore {
    /// Empty store.
    pub fn new() -> Self {
        AnnotationStore::default()
    }

    /// Record the declared options for a member.
    pub fn insert(&mut self, member: MemberId, options: OptionSet) {
        self.options.insert(member, options);
    }

    /// Resolve a member's options. `None` excludes the target from a batch.
    pub fn resolve(&self, member: &MemberId) -> Option<OptionSet> {
        self.options.get(member).cloned()
    }
}
