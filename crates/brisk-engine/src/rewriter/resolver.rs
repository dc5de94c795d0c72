//! Reference-module resolution for the rewriter
//!
//! Loads module images referenced by the image being processed, searching
//! the folders supplied by the orchestrator. Folders are deduplicated and
//! sorted at construction for reproducible diagnostics.

use std::collections::BTreeSet;
use std::io;
use std::path::PathBuf;

use rustc_hash::FxHashMap;
use thiserror::Error;

use super::image::{ImageError, ModuleImage};

/// File extension of serialized module images.
pub const IMAGE_EXTENSION: &str = "brm";

/// Resolution failure.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No search folder contains the module
    #[error("module '{module}' not found in search folders: {searched:?}")]
    NotFound {
        /// Module that failed to resolve
        module: String,
        /// Folders that were searched, in order
        searched: Vec<PathBuf>,
    },

    /// Candidate file failed to read
    #[error("failed to read module '{module}': {source}")]
    Io {
        /// Module whose file failed to read
        module: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Candidate file failed to decode
    #[error("failed to decode module '{module}': {source}")]
    Image {
        /// Module whose image failed to decode
        module: String,
        /// Underlying error
        #[source]
        source: ImageError,
    },
}

/// Resolves referenced modules from a set of search folders, caching loads.
pub struct ModuleResolver {
    search_paths: Vec<PathBuf>,
    cache: FxHashMap<String, ModuleImage>,
}

impl ModuleResolver {
    /// Create a resolver. Folders are deduplicated and sorted.
    pub fn new(folders: impl IntoIterator<Item = PathBuf>) -> Self {
        let deduped: BTreeSet<PathBuf> = folders.into_iter().collect();
        ModuleResolver {
            search_paths: deduped.into_iter().collect(),
            cache: FxHashMap::default(),
        }
    }

    /// The folders searched, deduplicated and sorted.
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Insert an already-loaded image, bypassing the search folders.
    pub fn preload(&mut self, image: ModuleImage) {
        self.cache.insert(image.name.clone(), image);
    }

    /// Resolve a module by name, loading and caching its image.
    pub fn resolve(&mut self, module: &str) -> Result<&ModuleImage, ResolveError> {
        if !self.cache.contains_key(module) {
            let image = self.load(module)?;
            self.cache.insert(module.to_string(), image);
        }
        Ok(&self.cache[module])
    }

    fn load(&self, module: &str) -> Result<ModuleImage, ResolveError> {
        let file_name = format!("{}.{}", module, IMAGE_EXTENSION);
        for folder in &self.search_paths {
            let candidate = folder.join(&file_name);
            if !candidate.exists() {
                continue;
            }
            let bytes = std::fs::read(&candidate).map_err(|source| ResolveError::Io {
                module: module.to_string(),
                source,
            })?;
            return ModuleImage::decode(&bytes).map_err(|source| ResolveError::Image {
                module: module.to_string(),
                source,
            });
        }
        Err(ResolveError::NotFound {
            module: module.to_string(),
            searched: self.search_paths.clone(),
        })
    }
}
