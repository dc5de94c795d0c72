//! Environment-level configuration
//!
//! Toggles are read from the process environment once at startup. Host
//! session facts that the environment cannot provide (batch mode, whether
//! synchronous compilation is required) arrive via [`HostOptions`].

use std::path::{Path, PathBuf};

/// Name of the variable that force-disables all native compilation.
pub const ENV_DISABLE_COMPILATION: &str = "BRISK_DISABLE_COMPILATION";
/// Name of the variable enabling extra diagnostics; its numeric value is the verbosity level.
pub const ENV_DEBUG: &str = "BRISK_DEBUG";
/// Name of the eager-compilation override: `0` force-disables, `1` force-enables in batch mode.
pub const ENV_EAGER: &str = "BRISK_EAGER";
/// Name of the runtime-path override variable.
pub const ENV_RUNTIME_PATH: &str = "BRISK_RUNTIME_PATH";

/// Codegen and diagnostics toggles read from the environment.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    /// All native compilation is force-disabled
    pub compilation_disabled: bool,
    /// Extra diagnostics requested
    pub diagnostics: bool,
    /// Diagnostics verbosity level (0 when diagnostics are off)
    pub verbosity: u8,
    /// Eager-compilation override: `Some(false)` disables, `Some(true)`
    /// force-enables even in batch mode, `None` leaves the default policy
    pub eager_override: Option<bool>,
    /// Explicit override of the native runtime path
    pub runtime_path_override: Option<PathBuf>,
}

impl EnvConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let debug = lookup(ENV_DEBUG);
        let verbosity = debug
            .as_deref()
            .and_then(|v| v.parse::<u8>().ok())
            .unwrap_or(if debug.is_some() { 1 } else { 0 });

        let eager_override = match lookup(ENV_EAGER).as_deref() {
            Some("0") => Some(false),
            Some("1") => Some(true),
            _ => None,
        };

        EnvConfig {
            compilation_disabled: lookup(ENV_DISABLE_COMPILATION).is_some(),
            diagnostics: debug.is_some(),
            verbosity,
            eager_override,
            runtime_path_override: lookup(ENV_RUNTIME_PATH).map(PathBuf::from),
        }
    }

    /// The runtime path to load: the explicit override when present,
    /// otherwise the host-provided default. The flag reports whether the
    /// override took effect.
    pub fn effective_runtime_path(&self, default: &Path) -> (PathBuf, bool) {
        match &self.runtime_path_override {
            Some(path) => (path.clone(), true),
            None => (default.to_path_buf(), false),
        }
    }

    /// Log-filter directive for the requested diagnostics verbosity.
    pub fn log_directive(&self) -> &'static str {
        if !self.diagnostics {
            return "brisk=warn";
        }
        match self.verbosity {
            0 | 1 => "brisk=debug",
            _ => "brisk=trace",
        }
    }
}

/// Host session facts supplied by the embedding build pipeline.
#[derive(Debug, Clone, Default)]
pub struct HostOptions {
    /// The host is running unattended (batch/headless)
    pub batch_mode: bool,
    /// Entering interactive execution must block until compilation finishes
    pub requires_synchronous_compilation: bool,
    /// The host is already mid-interactive-execution at process start
    pub in_interactive_mode: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| {
            pairs
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_defaults_when_env_empty() {
        let config = EnvConfig::from_lookup(|_| None);
        assert!(!config.compilation_disabled);
        assert!(!config.diagnostics);
        assert_eq!(config.verbosity, 0);
        assert_eq!(config.eager_override, None);
        assert!(config.runtime_path_override.is_none());
    }

    #[test]
    fn test_debug_verbosity_parsing() {
        let config = EnvConfig::from_lookup(lookup_from(&[(ENV_DEBUG, "3")]));
        assert!(config.diagnostics);
        assert_eq!(config.verbosity, 3);

        // Non-numeric value still enables diagnostics at level 1
        let config = EnvConfig::from_lookup(lookup_from(&[(ENV_DEBUG, "yes")]));
        assert!(config.diagnostics);
        assert_eq!(config.verbosity, 1);
    }

    #[test]
    fn test_eager_override_values() {
        let off = EnvConfig::from_lookup(lookup_from(&[(ENV_EAGER, "0")]));
        assert_eq!(off.eager_override, Some(false));

        let on = EnvConfig::from_lookup(lookup_from(&[(ENV_EAGER, "1")]));
        assert_eq!(on.eager_override, Some(true));

        let other = EnvConfig::from_lookup(lookup_from(&[(ENV_EAGER, "maybe")]));
        assert_eq!(other.eager_override, None);
    }

    #[test]
    fn test_effective_runtime_path_prefers_override() {
        let default = Path::new("/opt/brisk-runtime/1.2.0/lib");

        let plain = EnvConfig::from_lookup(|_| None);
        assert_eq!(
            plain.effective_runtime_path(default),
            (default.to_path_buf(), false)
        );

        let overridden =
            EnvConfig::from_lookup(lookup_from(&[(ENV_RUNTIME_PATH, "/custom/brisk-runtime/9.9.9")]));
        assert_eq!(
            overridden.effective_runtime_path(default),
            (PathBuf::from("/custom/brisk-runtime/9.9.9"), true)
        );
    }

    #[test]
    fn test_log_directive_tracks_verbosity() {
        assert_eq!(EnvConfig::from_lookup(|_| None).log_directive(), "brisk=warn");
        assert_eq!(
            EnvConfig::from_lookup(lookup_from(&[(ENV_DEBUG, "1")])).log_directive(),
            "brisk=debug"
        );
        assert_eq!(
            EnvConfig::from_lookup(lookup_from(&[(ENV_DEBUG, "2")])).log_directive(),
            "brisk=trace"
        );
    }

    #[test]
    fn test_runtime_path_override() {
        let config =
            EnvConfig::from_lookup(lookup_from(&[(ENV_RUNTIME_PATH, "/opt/brisk-runtime/9.9.9")]));
        assert_eq!(
            config.runtime_path_override,
            Some(PathBuf::from("/opt/brisk-runtime/9.9.9"))
        );
    }
}
