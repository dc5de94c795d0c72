//! `brisk cache` — compilation-cache maintenance.

use std::path::PathBuf;

use anyhow::Context;

use brisk_engine::cache::{
    default_cache_root, delete_marker_present, write_delete_marker, DELETE_CACHE_MARKER,
};

use crate::output;

fn resolve_root(root: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    root.or_else(default_cache_root)
        .context("no cache root available; pass --root")
}

/// Mark the cache for deletion on the compiler's next cold start.
pub fn purge(root: Option<PathBuf>) -> anyhow::Result<()> {
    let root = resolve_root(root)?;
    write_delete_marker(&root)
        .with_context(|| format!("marking cache at {}", root.display()))?;
    output::success(&format!(
        "cache at {} marked for deletion ({})",
        root.display(),
        DELETE_CACHE_MARKER
    ));
    Ok(())
}

/// Show the cache location and marker state.
pub fn info(root: Option<PathBuf>) -> anyhow::Result<()> {
    let root = resolve_root(root)?;
    output::info(&format!("cache root: {}", root.display()));
    if delete_marker_present(&root) {
        output::notice("delete marker present: cache will be purged on next compiler start");
    } else {
        output::info("delete marker absent");
    }
    Ok(())
}
