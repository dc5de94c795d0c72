//! Compilation-cache version guard
//!
//! Runs once at startup, after the bridge is initialized. A cache written
//! by a different compiler version is unsafe to keep serving; the recovery
//! is a delete marker plus a forced restart, never in-place migration.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::bridge::{CompilerService, ServiceBridge};
use crate::config::EnvConfig;

/// Well-known path segment preceding the runtime version in the loaded
/// runtime path (e.g. `.../brisk-runtime/1.2.0/lib`).
pub const RUNTIME_PATH_MARKER: &str = "brisk-runtime";

/// Zero-byte sentinel file instructing the native compiler to purge the
/// cache on its next cold start.
pub const DELETE_CACHE_MARKER: &str = "DELETE_CACHE";

/// Version reported when the runtime path carries no version segment.
/// Never treated as matching a recorded version.
pub const UNKNOWN_VERSION: &str = "Unknown";

/// Cache guard failure.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Marker file or cache directory could not be created
    #[error("cache marker error: {0}")]
    Io(#[from] io::Error),
}

/// Seam for the blocking "restart required" notification (UI external).
pub trait RestartNotifier {
    /// Tell the user a restart is required because the compiler version changed.
    fn notify_restart_required(&mut self, previous: &str, current: &str);
}

/// What the startup version check decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    /// Versions match; the on-disk cache stays in use
    CacheUsable,
    /// The native side is shutting down; nothing to reconcile
    ShuttingDown,
    /// Version drift detected; the marker was written
    StaleCache {
        /// Version the cache was written by
        previous: String,
        /// Version loaded now
        current: String,
    },
}

/// Extract the runtime version from the loaded runtime path.
///
/// The component following the well-known [`RUNTIME_PATH_MARKER`] segment is
/// the version; a path without the marker yields [`UNKNOWN_VERSION`].
pub fn runtime_version_from_path(path: &Path) -> String {
    let mut components = path.components();
    while let Some(component) = components.next() {
        if component.as_os_str() == RUNTIME_PATH_MARKER {
            if let Some(version) = components.next() {
                return version.as_os_str().to_string_lossy().into_owned();
            }
        }
    }
    UNKNOWN_VERSION.to_string()
}

/// Create the zero-byte delete marker in the cache root. Idempotent: an
/// already-present marker is not an error.
pub fn write_delete_marker(cache_root: &Path) -> Result<(), CacheError> {
    fs::create_dir_all(cache_root)?;
    match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(cache_root.join(DELETE_CACHE_MARKER))
    {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Whether the delete marker is present.
pub fn delete_marker_present(cache_root: &Path) -> bool {
    cache_root.join(DELETE_CACHE_MARKER).exists()
}

/// Default cache root under the user cache directory.
pub fn default_cache_root() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("brisk"))
}

/// Detects drift between the on-disk cache's compiler version and the
/// currently loaded one.
pub struct CacheVersionGuard {
    cache_root: PathBuf,
    runtime_path: PathBuf,
    /// The runtime path came from an explicit configuration override; drift
    /// then skips the restart prompt and shutdown.
    path_overridden: bool,
}

impl CacheVersionGuard {
    /// Create a guard for the given cache root and loaded runtime path.
    pub fn new(cache_root: PathBuf, runtime_path: PathBuf, path_overridden: bool) -> Self {
        CacheVersionGuard {
            cache_root,
            runtime_path,
            path_overridden,
        }
    }

    /// Create a guard from the environment configuration. A configured
    /// runtime-path override replaces `default_runtime_path` and makes
    /// drift recovery skip the restart prompt and shutdown.
    pub fn from_config(
        cache_root: PathBuf,
        default_runtime_path: &Path,
        config: &EnvConfig,
    ) -> Self {
        let (runtime_path, path_overridden) = config.effective_runtime_path(default_runtime_path);
        CacheVersionGuard {
            cache_root,
            runtime_path,
            path_overridden,
        }
    }

    /// Run the startup version check.
    ///
    /// On drift: write the delete marker, then (unless the runtime path was
    /// overridden) raise the restart notification and shut the bridge down.
    pub fn run<C: CompilerService>(
        &self,
        bridge: &mut ServiceBridge<C>,
        notifier: &mut dyn RestartNotifier,
    ) -> Result<GuardOutcome, CacheError> {
        let current = runtime_version_from_path(&self.runtime_path);
        let previous = bridge.version_notify(&current);

        if previous.is_empty() {
            return Ok(GuardOutcome::ShuttingDown);
        }
        if previous == current && current != UNKNOWN_VERSION {
            debug!(version = %current, "compiler cache version matches");
            return Ok(GuardOutcome::CacheUsable);
        }

        info!(%previous, %current, "compiler version changed, marking cache for deletion");
        write_delete_marker(&self.cache_root)?;
        if !self.path_overridden {
            notifier.notify_restart_required(&previous, &current);
            bridge.shutdown();
        }
        Ok(GuardOutcome::StaleCache { previous, current })
    }
}
