//! Host lifecycle state machine
//!
//! Reacts to host lifecycle events (entering/exiting interactive execution,
//! pre-reload, build notifications, shutdown) and drives the eager
//! scheduler, cancellation, and the synchronous-wait gate. All transitions
//! run on the host's main scheduling thread.

use std::collections::BTreeSet;
use std::path::PathBuf;

use tracing::debug;

use crate::bridge::{CompilerService, ServiceBridge};
use crate::cache::{CacheError, CacheVersionGuard, GuardOutcome, RestartNotifier};
use crate::progress::{ProgressRelay, ProgressSink};
use crate::scheduler::{CodegenProbe, EagerScheduler, TargetDiscoverer};

/// Orchestration state, driven by host events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Nothing scheduled
    Idle,
    /// An eager pass has been submitted and is compiling in the background
    EagerCompiling,
    /// Blocked on the synchronous-compilation gate
    WaitingSynchronously,
    /// A pre-reload cancellation has been issued
    Cancelled,
    /// The bridge has been shut down
    ShuttingDown,
}

/// Host lifecycle events the orchestrator reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    /// The user is entering interactive execution mode
    EnteringInteractive,
    /// The user left interactive execution mode
    ExitedInteractive,
    /// The module set is about to reload; held handles become invalid
    BeforeReload,
    /// One module finished compiling (informational)
    ModuleCompiled,
    /// The whole module-set build finished (informational)
    BuildFinished,
    /// The host process is shutting down
    Shutdown,
}

/// Clears the blocking indicator on every exit path of the synchronous wait.
struct BlockingIndicator<'a> {
    sink: &'a mut dyn ProgressSink,
}

impl<'a> BlockingIndicator<'a> {
    fn begin(sink: &'a mut dyn ProgressSink) -> Self {
        sink.begin("Waiting for compilation to finish");
        BlockingIndicator { sink }
    }
}

impl Drop for BlockingIndicator<'_> {
    fn drop(&mut self) {
        self.sink.clear();
    }
}

/// Ties the bridge, scheduler, and progress relay to host lifecycle events.
pub struct Orchestrator<C: CompilerService> {
    bridge: ServiceBridge<C>,
    scheduler: EagerScheduler,
    relay: ProgressRelay,
    discoverer: Box<dyn TargetDiscoverer>,
    probe: Option<Box<dyn CodegenProbe>>,
    requires_sync: bool,
    in_interactive_at_start: bool,
    state: LifecycleState,
}

impl<C: CompilerService> Orchestrator<C> {
    /// Wire the orchestrator over an initialized bridge. The host session
    /// facts come from the scheduler's [`crate::config::HostOptions`], the
    /// single copy of them in the process.
    pub fn new(
        bridge: ServiceBridge<C>,
        scheduler: EagerScheduler,
        discoverer: Box<dyn TargetDiscoverer>,
        probe: Option<Box<dyn CodegenProbe>>,
    ) -> Self {
        let relay = ProgressRelay::new(bridge.progress_receiver());
        let host = scheduler.host();
        let requires_sync = host.requires_synchronous_compilation;
        let in_interactive_at_start = host.in_interactive_mode;
        Orchestrator {
            bridge,
            scheduler,
            relay,
            discoverer,
            probe,
            requires_sync,
            in_interactive_at_start,
            state: LifecycleState::Idle,
        }
    }

    /// Process-start sequence: version guard first, then one eager pass
    /// unless the host is already mid-interactive-execution or the guard
    /// forced a shutdown.
    pub fn startup(
        &mut self,
        guard: &CacheVersionGuard,
        notifier: &mut dyn RestartNotifier,
    ) -> Result<GuardOutcome, CacheError> {
        let outcome = guard.run(&mut self.bridge, notifier)?;
        if self.bridge.is_shutdown() {
            self.state = LifecycleState::ShuttingDown;
            return Ok(outcome);
        }
        if !self.in_interactive_at_start {
            self.run_eager_pass();
        }
        Ok(outcome)
    }

    /// Dispatch one host event.
    pub fn handle_event(&mut self, event: HostEvent, sink: &mut dyn ProgressSink) {
        if self.state == LifecycleState::ShuttingDown {
            return;
        }
        match event {
            HostEvent::EnteringInteractive => {
                if self.requires_sync {
                    self.state = LifecycleState::WaitingSynchronously;
                    {
                        let _indicator = BlockingIndicator::begin(sink);
                        self.bridge.wait_until_compilation_finished();
                    }
                    self.state = LifecycleState::Idle;
                } else {
                    // Entering interactive execution makes queued eager work
                    // pointless; drop it without blocking
                    self.bridge.clear_eager_queues();
                    self.state = LifecycleState::Idle;
                }
            }
            HostEvent::ExitedInteractive => {
                // Without the synchronous gate, completeness was never
                // guaranteed; re-submit (idempotent at the bridge)
                if !self.requires_sync {
                    self.run_eager_pass();
                }
            }
            HostEvent::BeforeReload => {
                // Must complete before the reload proceeds: handles held by
                // in-flight work become invalid afterwards
                self.bridge.cancel();
                self.relay.force_clear(sink);
                self.bridge.domain_reload_notify();
                self.state = LifecycleState::Cancelled;
            }
            HostEvent::ModuleCompiled | HostEvent::BuildFinished => {
                // Informational only: pending compilation continues
                debug!(?event, "build notification");
            }
            HostEvent::Shutdown => {
                self.shutdown();
            }
        }
    }

    /// Drain pending progress samples on the main scheduling thread.
    pub fn pump_progress(&mut self, sink: &mut dyn ProgressSink) {
        self.relay.pump(sink);
        if self.state == LifecycleState::EagerCompiling && self.bridge.is_idle() {
            self.state = LifecycleState::Idle;
        }
    }

    /// Supply the directories containing all currently loaded reference
    /// modules, deduplicated and sorted for reproducible diagnostics.
    pub fn refresh_search_folders(&self, folders: impl IntoIterator<Item = PathBuf>) {
        let deduped: BTreeSet<PathBuf> = folders.into_iter().collect();
        self.bridge
            .update_search_folders(deduped.into_iter().collect());
    }

    fn run_eager_pass(&mut self) {
        self.state = LifecycleState::EagerCompiling;
        self.scheduler.maybe_trigger_eager_compilation(
            self.discoverer.as_ref(),
            &self.bridge,
            self.probe.as_deref(),
        );
        if self.bridge.is_idle() {
            self.state = LifecycleState::Idle;
        }
    }

    /// Shut the bridge down and stop reacting to events.
    pub fn shutdown(&mut self) {
        self.bridge.shutdown();
        self.state = LifecycleState::ShuttingDown;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// The underlying bridge handle.
    pub fn bridge(&self) -> &ServiceBridge<C> {
        &self.bridge
    }
}
