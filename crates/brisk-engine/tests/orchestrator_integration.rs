//! End-to-end orchestration scenarios: startup version drift, batch-mode
//! gating, the synchronous gate, and scheduling feeding the rewriter.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use brisk_engine::cache::{delete_marker_present, CacheVersionGuard};
use brisk_engine::config::ENV_RUNTIME_PATH;
use brisk_engine::rewriter::image::{flags, FunctionDef, ModuleImage, Opcode};
use brisk_engine::rewriter::{scan_call_sites, INTEROP_MODULE};
use brisk_engine::{
    AnnotationStore, CallSiteRewriter, CompileError, CompileTarget, CompilerService, EagerScheduler,
    EncodedSignature, EnvConfig, HostEvent, HostOptions, MemberId, NativeEntryPoint, OptionKey,
    OptionSet, Orchestrator, OptionsExtractor, ProgressSink, RestartNotifier, RewriteInput,
    RewriteOutcome, ServiceBridge, TargetDiscoverer,
};

struct FakeCompiler {
    recorded: Mutex<String>,
    compiled: Arc<AtomicUsize>,
}

impl FakeCompiler {
    fn with_recorded(version: &str) -> (Self, Arc<AtomicUsize>) {
        let compiled = Arc::new(AtomicUsize::new(0));
        (
            FakeCompiler {
                recorded: Mutex::new(version.to_string()),
                compiled: compiled.clone(),
            },
            compiled,
        )
    }
}

impl CompilerService for FakeCompiler {
    fn compile(
        &self,
        _signature: &EncodedSignature,
        _options: &str,
    ) -> Result<NativeEntryPoint, CompileError> {
        let n = self.compiled.fetch_add(1, Ordering::SeqCst);
        Ok(NativeEntryPoint(0x4000 + n as u64))
    }

    fn recorded_version_exchange(&self, current: &str) -> String {
        std::mem::replace(&mut *self.recorded.lock(), current.to_string())
    }
}

struct FixedDiscoverer(Vec<CompileTarget>);

impl TargetDiscoverer for FixedDiscoverer {
    fn discover(&self) -> Vec<CompileTarget> {
        self.0.clone()
    }
}

#[derive(Default)]
struct RecordingNotifier {
    calls: Vec<(String, String)>,
}

impl RestartNotifier for RecordingNotifier {
    fn notify_restart_required(&mut self, previous: &str, current: &str) {
        self.calls.push((previous.to_string(), current.to_string()));
    }
}

#[derive(Default)]
struct NullSink;

impl ProgressSink for NullSink {
    fn begin(&mut self, _label: &str) {}
    fn update(&mut self, _fraction: f32, _label: &str) {}
    fn clear(&mut self) {}
}

fn no_options() -> OptionsExtractor {
    Arc::new(|_| None)
}

fn annotated_targets(names: &[&str]) -> (Arc<AnnotationStore>, Vec<CompileTarget>) {
    let mut store = AnnotationStore::new();
    let mut targets = Vec::new();
    for name in names {
        let member = MemberId::new("game", *name);
        let mut opts = OptionSet::new();
        opts.push(OptionKey::OptLevel, "2");
        store.insert(member.clone(), opts);
        targets.push(CompileTarget::static_method(member));
    }
    (Arc::new(store), targets)
}

fn build_orchestrator(
    recorded_version: &str,
    names: &[&str],
    config: EnvConfig,
    host: HostOptions,
) -> (Orchestrator<FakeCompiler>, Arc<AtomicUsize>) {
    let (compiler, compiled) = FakeCompiler::with_recorded(recorded_version);
    let bridge = ServiceBridge::initialize(
        Path::new("/opt/brisk-runtime/1.2.0/lib"),
        compiler,
        no_options(),
    );
    let (store, targets) = annotated_targets(names);
    let scheduler = EagerScheduler::new(config, host, store);
    let orchestrator =
        Orchestrator::new(bridge, scheduler, Box::new(FixedDiscoverer(targets)), None);
    (orchestrator, compiled)
}

#[test]
fn version_drift_marks_cache_and_halts() {
    let cache_dir = tempfile::tempdir().unwrap();
    let (mut orchestrator, compiled) = build_orchestrator(
        "1.1.0",
        &["A", "B"],
        EnvConfig::default(),
        HostOptions::default(),
    );
    let guard = CacheVersionGuard::new(
        cache_dir.path().to_path_buf(),
        PathBuf::from("/opt/brisk-runtime/1.2.0/lib"),
        false,
    );
    let mut notifier = RecordingNotifier::default();

    orchestrator.startup(&guard, &mut notifier).unwrap();

    assert!(delete_marker_present(cache_dir.path()));
    assert_eq!(notifier.calls, vec![("1.1.0".to_string(), "1.2.0".to_string())]);
    assert!(orchestrator.bridge().is_shutdown());
    // No eager compilation was scheduled after the halt
    assert_eq!(compiled.load(Ordering::SeqCst), 0);
}

#[test]
fn runtime_path_override_from_env_suppresses_restart_on_drift() {
    let cache_dir = tempfile::tempdir().unwrap();
    let (mut orchestrator, compiled) = build_orchestrator(
        "1.1.0",
        &["A"],
        EnvConfig::default(),
        HostOptions::default(),
    );
    // The override path carries the drifted version; the guard derives both
    // the effective runtime path and the overridden flag from it
    let config = EnvConfig::from_lookup(|name| {
        (name == ENV_RUNTIME_PATH).then(|| "/custom/brisk-runtime/1.2.0/lib".to_string())
    });
    let guard = CacheVersionGuard::from_config(
        cache_dir.path().to_path_buf(),
        Path::new("/opt/brisk-runtime/1.2.0/lib"),
        &config,
    );
    let mut notifier = RecordingNotifier::default();

    orchestrator.startup(&guard, &mut notifier).unwrap();
    orchestrator.bridge().wait_until_compilation_finished();

    // Drift still marks the cache, but the override skips the restart and
    // the session continues: the eager pass ran
    assert!(delete_marker_present(cache_dir.path()));
    assert!(notifier.calls.is_empty());
    assert!(!orchestrator.bridge().is_shutdown());
    assert_eq!(compiled.load(Ordering::SeqCst), 1);
}

#[test]
fn batch_mode_without_override_schedules_nothing() {
    let cache_dir = tempfile::tempdir().unwrap();
    let host = HostOptions {
        batch_mode: true,
        ..HostOptions::default()
    };
    let (mut orchestrator, compiled) =
        build_orchestrator("1.2.0", &["A", "B", "C"], EnvConfig::default(), host);
    let guard = CacheVersionGuard::new(
        cache_dir.path().to_path_buf(),
        PathBuf::from("/opt/brisk-runtime/1.2.0/lib"),
        false,
    );

    orchestrator
        .startup(&guard, &mut RecordingNotifier::default())
        .unwrap();
    orchestrator.bridge().wait_until_compilation_finished();

    assert!(!delete_marker_present(cache_dir.path()));
    assert_eq!(compiled.load(Ordering::SeqCst), 0);
}

#[test]
fn synchronous_gate_blocks_until_batch_finishes() {
    let cache_dir = tempfile::tempdir().unwrap();
    let host = HostOptions {
        requires_synchronous_compilation: true,
        ..HostOptions::default()
    };
    let (mut orchestrator, compiled) =
        build_orchestrator("1.2.0", &["A", "B", "C"], EnvConfig::default(), host);
    let guard = CacheVersionGuard::new(
        cache_dir.path().to_path_buf(),
        PathBuf::from("/opt/brisk-runtime/1.2.0/lib"),
        false,
    );

    orchestrator
        .startup(&guard, &mut RecordingNotifier::default())
        .unwrap();
    orchestrator.handle_event(HostEvent::EnteringInteractive, &mut NullSink);

    // The event handler returned only after the whole batch drained
    assert!(orchestrator.bridge().is_idle());
    assert_eq!(compiled.load(Ordering::SeqCst), 3);
}

#[test]
fn scheduled_entry_points_feed_the_rewriter() {
    let cache_dir = tempfile::tempdir().unwrap();
    let modules_dir = tempfile::tempdir().unwrap();
    let (mut orchestrator, _compiled) = build_orchestrator(
        "1.2.0",
        &["Dot"],
        EnvConfig::default(),
        HostOptions::default(),
    );
    let guard = CacheVersionGuard::new(
        cache_dir.path().to_path_buf(),
        PathBuf::from("/opt/brisk-runtime/1.2.0/lib"),
        false,
    );
    orchestrator
        .startup(&guard, &mut RecordingNotifier::default())
        .unwrap();
    orchestrator.bridge().wait_until_compilation_finished();

    // The scheduled target's signature now has a native entry point
    let entries = orchestrator.bridge().entry_points();
    assert_eq!(entries.len(), 1);

    // Referenced module: "game" holding the natively compiled Dot, with the
    // signature the scheduler encoded for it
    let mut game = ModuleImage::new("game");
    game.functions.push(FunctionDef {
        name: "Dot".to_string(),
        signature: "fn:game::Dot".to_string(),
        flags: flags::NATIVE_COMPILED,
        code: vec![Opcode::Return as u8],
    });
    std::fs::write(modules_dir.path().join("game.brm"), game.encode()).unwrap();

    // Caller module with two managed calls into game::Dot
    let mut caller = ModuleImage::new("app");
    caller.add_reference(INTEROP_MODULE);
    caller.add_reference("game");
    let dot = caller.add_func_ref("game", "Dot");
    let mut code = Vec::new();
    code.push(Opcode::CallManaged as u8);
    code.extend_from_slice(&dot.to_le_bytes());
    code.push(Opcode::CallManaged as u8);
    code.extend_from_slice(&dot.to_le_bytes());
    code.push(Opcode::Return as u8);
    caller.functions.push(FunctionDef {
        name: "Main".to_string(),
        signature: "fn:app::Main".to_string(),
        flags: 0,
        code,
    });

    let rewriter = CallSiteRewriter::new(&entries);
    let outcome = rewriter
        .process(RewriteInput {
            module_name: "app".to_string(),
            code: caller.encode(),
            debug: None,
            reference_paths: vec![modules_dir.path().to_path_buf()],
            interactive_host: true,
        })
        .unwrap();

    let RewriteOutcome::Rewritten(binary) = outcome else {
        panic!("expected a rewritten image");
    };
    let rewritten = ModuleImage::decode(&binary.code).unwrap();
    let sites = scan_call_sites(&rewritten).unwrap();
    assert!(sites.iter().all(|s| s.opcode == Opcode::CallNative));
    assert_eq!(sites.len(), 2);
    assert_eq!(rewritten.native_slots, vec!["fn:game::Dot".to_string()]);
}
