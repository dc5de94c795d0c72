//! Brisk native-compilation orchestrator
//!
//! Development-time layer between a managed build pipeline and an external
//! ahead-of-time native compiler. It decides what to pre-compile eagerly,
//! keeps the on-disk compilation cache consistent across compiler upgrades,
//! gates transitions into interactive execution on compilation completion,
//! and rewrites compiled module images so eligible calls invoke native
//! entry points directly.
//!
//! - **bridge**: the long-lived handle to the native compiler
//! - **scheduler**: eager-compilation policy and submission
//! - **lifecycle**: the host-event-driven state machine
//! - **cache**: version guard over the persistent compilation cache
//! - **progress**: main-thread progress-indicator relay
//! - **rewriter**: call-site rewriting of compiled module images

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod bridge;
pub mod cache;
pub mod config;
pub mod lifecycle;
pub mod progress;
pub mod rewriter;
pub mod scheduler;
pub mod target;

pub use bridge::{
    CompileError, CompilerService, EntryPointTable, NativeEntryPoint, OptionsExtractor,
    ServiceBridge,
};
pub use cache::{CacheError, CacheVersionGuard, GuardOutcome, RestartNotifier};
pub use config::{EnvConfig, HostOptions};
pub use lifecycle::{HostEvent, LifecycleState, Orchestrator};
pub use progress::{ProgressRelay, ProgressSink, ProgressUpdate};
pub use rewriter::{BinaryImage, CallSiteRewriter, RewriteError, RewriteInput, RewriteOutcome};
pub use scheduler::{CodegenProbe, EagerScheduler, TargetDiscoverer};
pub use target::{
    AnnotationStore, CompileTarget, EncodedSignature, MemberId, OptionKey, OptionSet, TargetKind,
};
