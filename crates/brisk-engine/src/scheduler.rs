//! Eager compilation scheduling
//!
//! Decides whether eager compilation should run at all, discovers compile
//! targets, and submits them to the compiler service bridge. Submission is
//! fire-and-forget; completion is observed through progress samples or the
//! bridge's idle wait.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::bridge::{CompilerService, ServiceBridge};
use crate::config::{EnvConfig, HostOptions};
use crate::target::{AnnotationStore, CompileTarget, EncodedSignature};

/// Discovery of eligible compile targets (reflection black box).
///
/// Implementations restrict discovery to modules that can possibly contain
/// eligible functions and exclude test modules.
pub trait TargetDiscoverer {
    /// Produce the current set of eligible targets.
    fn discover(&self) -> Vec<CompileTarget>;
}

/// Capability probe: whether the host has finished generating scripting
/// code. Hosts without the probe are assumed ready.
pub trait CodegenProbe {
    /// True once code generation is complete.
    fn is_codegen_complete(&self) -> bool;
}

/// Policy gates plus the discovery-and-submit pass.
pub struct EagerScheduler {
    config: EnvConfig,
    host: HostOptions,
    annotations: Arc<AnnotationStore>,
}

impl EagerScheduler {
    /// Create a scheduler over the process configuration and the shared
    /// annotation table.
    pub fn new(config: EnvConfig, host: HostOptions, annotations: Arc<AnnotationStore>) -> Self {
        EagerScheduler {
            config,
            host,
            annotations,
        }
    }

    /// The host session facts the policy gates read.
    pub fn host(&self) -> &HostOptions {
        &self.host
    }

    /// Whether the policy gates allow eager compilation at all.
    pub fn eager_compilation_allowed(&self) -> bool {
        if self.config.compilation_disabled {
            return false;
        }
        if self.config.eager_override == Some(false) {
            return false;
        }
        if self.host.batch_mode && self.config.eager_override != Some(true) {
            return false;
        }
        true
    }

    /// Run one eager pass: discover targets, resolve options, and enqueue
    /// each resolvable target on the bridge. No-op when a policy gate fails.
    ///
    /// A per-target option-resolution failure skips that target only; the
    /// pass continues.
    pub fn maybe_trigger_eager_compilation<C: CompilerService>(
        &self,
        discoverer: &dyn TargetDiscoverer,
        bridge: &ServiceBridge<C>,
        probe: Option<&dyn CodegenProbe>,
    ) {
        if !self.eager_compilation_allowed() {
            trace!("eager compilation gated off");
            return;
        }
        // The probe gates progress logging only, never compilation itself
        let log_progress = probe.map_or(true, |p| p.is_codegen_complete());

        let mut submitted = 0usize;
        for target in discoverer.discover() {
            let Some(options) = self.annotations.resolve(target.member()) else {
                trace!(member = %target.member(), "no resolvable options, target excluded");
                continue;
            };
            let signature = EncodedSignature::encode(&target);
            bridge.eager_compile(&signature, &options.render());
            submitted += 1;
        }

        if log_progress {
            debug!(submitted, "eager compilation pass scheduled");
        }
    }
}
