//! Compiler service bridge
//!
//! The process-wide handle to the native compiler. Owns a single worker
//! thread that drains the eager-compile queue and appends finished entry
//! points to the shared [`EntryPointTable`]. All orchestration calls are
//! non-blocking except [`ServiceBridge::wait_until_compilation_finished`].

mod service;

pub use service::{CompileError, CompilerService, EntryPointTable, NativeEntryPoint};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::progress::ProgressUpdate;
use crate::target::{EncodedSignature, MemberId};

/// Callback queried by the native side per function at dispatch time.
///
/// Must be side-effect-free and reentrant; the bridge retains it for its
/// own lifetime.
pub type OptionsExtractor = Arc<dyn Fn(&MemberId) -> Option<String> + Send + Sync>;

/// Bound of the progress relay channel; intermediate samples past the
/// bound are dropped.
const PROGRESS_CHANNEL_BOUND: usize = 256;

/// One queued compile request.
struct Job {
    signature: EncodedSignature,
    options: String,
    generation: u64,
}

/// Batch counters guarded by one mutex so idle-waiting and progress stay consistent.
#[derive(Default)]
struct Counters {
    /// Jobs enqueued but not yet finished (compiled or skipped)
    pending: usize,
    /// Jobs submitted in the current batch
    submitted: u32,
    /// Jobs finished in the current batch
    completed: u32,
}

struct Shared<C: CompilerService> {
    compiler: C,
    entry_points: Arc<EntryPointTable>,
    counters: Mutex<Counters>,
    idle: Condvar,
    /// Bumped on cancel/clear; queued jobs from older generations never start.
    generation: AtomicU64,
    shutting_down: AtomicBool,
    progress_tx: Sender<ProgressUpdate>,
    search_folders: Mutex<Vec<PathBuf>>,
}

impl<C: CompilerService> Shared<C> {
    /// Mark one job finished, emit a progress sample, and wake idle waiters.
    fn finish_job(&self) {
        let (current, total) = {
            let mut counters = self.counters.lock();
            counters.pending -= 1;
            counters.completed += 1;
            let sample = (counters.completed, counters.submitted);
            if counters.pending == 0 {
                counters.submitted = 0;
                counters.completed = 0;
                self.idle.notify_all();
            }
            sample
        };
        // Best effort: a full or disconnected relay never stalls compilation
        let _ = self.progress_tx.try_send(ProgressUpdate { current, total });
    }
}

/// Long-lived handle to the native compiler process/library.
///
/// There is one bridge per process; components receive it by reference
/// (dependency injection) so the orchestration stays testable with a fake
/// [`CompilerService`].
pub struct ServiceBridge<C: CompilerService> {
    shared: Arc<Shared<C>>,
    job_tx: Option<Sender<Job>>,
    worker: Option<thread::JoinHandle<()>>,
    progress_rx: Receiver<ProgressUpdate>,
    extractor: OptionsExtractor,
    runtime_path: PathBuf,
}

impl<C: CompilerService> ServiceBridge<C> {
    /// Initialize the bridge: spawn the compile worker and retain the
    /// options-extractor callback for the bridge's lifetime.
    pub fn initialize(runtime_path: &Path, compiler: C, extractor: OptionsExtractor) -> Self {
        let (progress_tx, progress_rx) = channel::bounded(PROGRESS_CHANNEL_BOUND);
        let (job_tx, job_rx) = channel::unbounded::<Job>();

        let shared = Arc::new(Shared {
            compiler,
            entry_points: Arc::new(EntryPointTable::new()),
            counters: Mutex::new(Counters::default()),
            idle: Condvar::new(),
            generation: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
            progress_tx,
            search_folders: Mutex::new(Vec::new()),
        });

        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name("brisk-compiler".to_string())
            .spawn(move || Self::worker_loop(worker_shared, job_rx))
            .expect("failed to spawn compiler bridge worker");

        ServiceBridge {
            shared,
            job_tx: Some(job_tx),
            worker: Some(worker),
            progress_rx,
            extractor,
            runtime_path: runtime_path.to_path_buf(),
        }
    }

    /// Worker thread: drain jobs until the queue closes at shutdown.
    fn worker_loop(shared: Arc<Shared<C>>, job_rx: Receiver<Job>) {
        for job in job_rx.iter() {
            let stale = job.generation < shared.generation.load(Ordering::Acquire)
                || shared.shutting_down.load(Ordering::Acquire);
            if !stale {
                match shared.compiler.compile(&job.signature, &job.options) {
                    Ok(entry) => {
                        shared.entry_points.insert(job.signature, entry);
                    }
                    Err(e) => {
                        warn!(signature = %job.signature, error = %e, "eager compile failed");
                    }
                }
            }
            shared.finish_job();
        }
    }

    /// Enqueue one function for eager compilation. Non-blocking; completion
    /// is observed via progress samples or [`Self::wait_until_compilation_finished`].
    pub fn eager_compile(&self, signature: &EncodedSignature, options: &str) {
        if self.shared.shutting_down.load(Ordering::Acquire) {
            return;
        }
        let Some(job_tx) = &self.job_tx else {
            return;
        };

        {
            let mut counters = self.shared.counters.lock();
            counters.pending += 1;
            counters.submitted += 1;
        }
        let job = Job {
            signature: signature.clone(),
            options: options.to_string(),
            generation: self.shared.generation.load(Ordering::Acquire),
        };
        if job_tx.send(job).is_err() {
            // Worker is gone; roll the counters back so waiters don't hang
            let mut counters = self.shared.counters.lock();
            counters.pending -= 1;
            counters.submitted -= 1;
            if counters.pending == 0 {
                self.shared.idle.notify_all();
            }
        }
    }

    /// Cancel all queued and (best effort) in-flight compilation.
    ///
    /// Synchronous from the bridge's perspective: once this returns, no
    /// queued-but-unstarted job from an earlier generation will start.
    pub fn cancel(&self) {
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        self.shared.compiler.interrupt();
        debug!("compilation cancelled");
    }

    /// Drop scheduled-but-not-started work without touching in-flight jobs.
    pub fn clear_eager_queues(&self) {
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        debug!("eager queues cleared");
    }

    /// Block the calling thread until no compilation is pending.
    pub fn wait_until_compilation_finished(&self) {
        let mut counters = self.shared.counters.lock();
        while counters.pending > 0 {
            self.shared.idle.wait(&mut counters);
        }
    }

    /// Whether no compilation is queued or in flight.
    pub fn is_idle(&self) -> bool {
        self.shared.counters.lock().pending == 0
    }

    /// Record `current` as the loaded compiler version on the native side
    /// and return the previously recorded version, or an empty string when
    /// shutting down.
    pub fn version_notify(&self, current: &str) -> String {
        if self.shared.shutting_down.load(Ordering::Acquire) {
            return String::new();
        }
        self.shared.compiler.recorded_version_exchange(current)
    }

    /// The module set is about to reload; cancel everything and let the
    /// native side drop its member handles.
    pub fn domain_reload_notify(&self) {
        self.cancel();
        self.shared.compiler.domain_reload();
        debug!("domain reload notified");
    }

    /// Replace the set of folders the native side searches for reference
    /// modules. Callers supply the set deduplicated and sorted.
    pub fn update_search_folders(&self, folders: Vec<PathBuf>) {
        debug!(count = folders.len(), "search folders updated");
        *self.shared.search_folders.lock() = folders;
    }

    /// The current reference-module search folders.
    pub fn search_folders(&self) -> Vec<PathBuf> {
        self.shared.search_folders.lock().clone()
    }

    /// The shared table of finished native entry points.
    pub fn entry_points(&self) -> Arc<EntryPointTable> {
        self.shared.entry_points.clone()
    }

    /// Receiver half of the progress relay, for the main-thread pump.
    pub fn progress_receiver(&self) -> Receiver<ProgressUpdate> {
        self.progress_rx.clone()
    }

    /// Query the retained options-extractor callback for a member.
    pub fn options_for(&self, member: &MemberId) -> Option<String> {
        (self.extractor)(member)
    }

    /// The runtime path the bridge was initialized with.
    pub fn runtime_path(&self) -> &Path {
        &self.runtime_path
    }

    /// Whether the bridge has been shut down.
    pub fn is_shutdown(&self) -> bool {
        self.shared.shutting_down.load(Ordering::Acquire)
    }

    /// Orderly shutdown: close the queue, let the worker drain, and join it.
    /// Idempotent.
    pub fn shutdown(&mut self) {
        if self.shared.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        self.job_tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        debug!("compiler bridge shut down");
    }
}

impl<C: CompilerService> Drop for ServiceBridge<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use std::sync::atomic::AtomicUsize;

    /// Deterministic fake backend: counts compiles and can block on a gate.
    struct FakeCompiler {
        compiled: AtomicUsize,
        recorded: PlMutex<String>,
        gate: Option<Arc<(PlMutex<bool>, Condvar)>>,
    }

    impl FakeCompiler {
        fn new() -> Self {
            FakeCompiler {
                compiled: AtomicUsize::new(0),
                recorded: PlMutex::new(String::new()),
                gate: None,
            }
        }

        fn gated() -> (Self, Arc<(PlMutex<bool>, Condvar)>) {
            let gate = Arc::new((PlMutex::new(false), Condvar::new()));
            let compiler = FakeCompiler {
                gate: Some(gate.clone()),
                ..FakeCompiler::new()
            };
            (compiler, gate)
        }
    }

    fn open_gate(gate: &Arc<(PlMutex<bool>, Condvar)>) {
        let (lock, cv) = &**gate;
        *lock.lock() = true;
        cv.notify_all();
    }

    impl CompilerService for FakeCompiler {
        fn compile(
            &self,
            _signature: &EncodedSignature,
            _options: &str,
        ) -> Result<NativeEntryPoint, CompileError> {
            if let Some(gate) = &self.gate {
                let (lock, cv) = &**gate;
                let mut open = lock.lock();
                while !*open {
                    cv.wait(&mut open);
                }
            }
            let n = self.compiled.fetch_add(1, Ordering::SeqCst);
            Ok(NativeEntryPoint(0x1000 + n as u64))
        }

        fn recorded_version_exchange(&self, current: &str) -> String {
            std::mem::replace(&mut *self.recorded.lock(), current.to_string())
        }
    }

    fn no_options() -> OptionsExtractor {
        Arc::new(|_| None)
    }

    fn sig(name: &str) -> EncodedSignature {
        EncodedSignature::from_raw(format!("fn:game::{}", name))
    }

    #[test]
    fn test_eager_compile_populates_entry_points() {
        let bridge = ServiceBridge::initialize(
            Path::new("/opt/brisk-runtime/1.0.0"),
            FakeCompiler::new(),
            no_options(),
        );
        bridge.eager_compile(&sig("A"), "");
        bridge.eager_compile(&sig("B"), "");
        bridge.wait_until_compilation_finished();

        let entries = bridge.entry_points();
        assert_eq!(entries.len(), 2);
        assert!(entries.contains(&sig("A")));
        assert!(entries.contains(&sig("B")));
    }

    #[test]
    fn test_cancel_prevents_queued_jobs_from_starting() {
        let (compiler, gate) = FakeCompiler::gated();
        let bridge = ServiceBridge::initialize(
            Path::new("/opt/brisk-runtime/1.0.0"),
            compiler,
            no_options(),
        );

        // First job blocks inside compile(); the rest stay queued
        for i in 0..5 {
            bridge.eager_compile(&sig(&format!("F{}", i)), "");
        }
        // Give the worker time to pick up the first job
        std::thread::sleep(std::time::Duration::from_millis(50));
        bridge.cancel();
        open_gate(&gate);
        bridge.wait_until_compilation_finished();

        // Only the in-flight job ran; the four queued ones were skipped
        assert_eq!(bridge.entry_points().len(), 1);
    }

    #[test]
    fn test_wait_until_idle_returns_immediately_when_idle() {
        let bridge = ServiceBridge::initialize(
            Path::new("/opt/brisk-runtime/1.0.0"),
            FakeCompiler::new(),
            no_options(),
        );
        bridge.wait_until_compilation_finished();
    }

    #[test]
    fn test_version_notify_exchanges_recorded_version() {
        let mut bridge = ServiceBridge::initialize(
            Path::new("/opt/brisk-runtime/1.2.0"),
            FakeCompiler::new(),
            no_options(),
        );
        assert_eq!(bridge.version_notify("1.1.0"), "");
        assert_eq!(bridge.version_notify("1.2.0"), "1.1.0");

        bridge.shutdown();
        // After shutdown there is nothing to reconcile
        assert_eq!(bridge.version_notify("1.3.0"), "");
    }

    #[test]
    fn test_shutdown_is_idempotent_and_stops_submissions() {
        let mut bridge = ServiceBridge::initialize(
            Path::new("/opt/brisk-runtime/1.0.0"),
            FakeCompiler::new(),
            no_options(),
        );
        bridge.shutdown();
        bridge.shutdown();
        assert!(bridge.is_shutdown());

        bridge.eager_compile(&sig("late"), "");
        bridge.wait_until_compilation_finished();
        assert!(bridge.entry_points().is_empty());
    }

    #[test]
    fn test_progress_samples_end_with_completion() {
        let bridge = ServiceBridge::initialize(
            Path::new("/opt/brisk-runtime/1.0.0"),
            FakeCompiler::new(),
            no_options(),
        );
        let rx = bridge.progress_receiver();
        bridge.eager_compile(&sig("A"), "");
        bridge.eager_compile(&sig("B"), "");
        bridge.wait_until_compilation_finished();

        let samples: Vec<ProgressUpdate> = rx.try_iter().collect();
        let last = samples.last().expect("at least one progress sample");
        assert_eq!(last.current, last.total);
    }

    #[test]
    fn test_search_folders_round_trip() {
        let bridge = ServiceBridge::initialize(
            Path::new("/opt/brisk-runtime/1.0.0"),
            FakeCompiler::new(),
            no_options(),
        );
        let folders = vec![PathBuf::from("/a"), PathBuf::from("/b")];
        bridge.update_search_folders(folders.clone());
        assert_eq!(bridge.search_folders(), folders);
    }

    #[test]
    fn test_options_extractor_retained() {
        let extractor: OptionsExtractor = Arc::new(|member: &MemberId| {
            (member.name == "Hot").then(|| "opt-level=2".to_string())
        });
        let bridge = ServiceBridge::initialize(
            Path::new("/opt/brisk-runtime/1.0.0"),
            FakeCompiler::new(),
            extractor,
        );
        assert_eq!(
            bridge.options_for(&MemberId::new("game", "Hot")),
            Some("opt-level=2".to_string())
        );
        assert_eq!(bridge.options_for(&MemberId::new("game", "Cold")), None);
    }
}
