//! Alias matching: device modalias to module.
//!
//! The cache is loaded once at daemon start and never changes afterwards,
//! so every alias glob is compiled up front and the matcher can be shared
//! by all workers without locking.

use std::path::PathBuf;

use glob::{MatchOptions, Pattern};
use log::debug;

use crate::config::ModulePaths;
use crate::error::{Error, Result};
use crate::module::{KernelModules, LoadSession, Loader, ModuleCache, ModuleDescriptor};

/// Case-sensitive; `*` and `?` stop at `/` like `fnmatch(3)` with FNM_PATHNAME.
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

struct Entry {
    module: usize,
    patterns: Vec<Pattern>,
}

pub struct Modprobe<K> {
    cache: ModuleCache,
    index: Vec<Entry>,
    paths: ModulePaths,
    loader: Loader<K>,
}

impl<K: KernelModules> Modprobe<K> {
    /// Build a matcher over `cache`. Cached paths resolve against
    /// `paths.install_root`; names resolve under `paths.module_root()`.
    pub fn new(cache: ModuleCache, paths: ModulePaths, kernel: K) -> Self {
        let index = cache
            .iter()
            .enumerate()
            .map(|(module, desc)| Entry {
                module,
                patterns: desc
                    .aliases
                    .iter()
                    .filter_map(|alias| match Pattern::new(alias) {
                        Ok(p) => Some(p),
                        Err(e) => {
                            debug!("modprobe: {}: ignoring alias {:?}: {}", desc.name, alias, e);
                            None
                        }
                    })
                    .collect(),
            })
            .collect();
        let loader = Loader::new(kernel, paths.module_root());

        Self {
            cache,
            index,
            paths,
            loader,
        }
    }

    /// Load the cache for `paths` and build a matcher over it.
    ///
    /// A missing or corrupt cache is logged and yields an empty matcher, so
    /// the daemon keeps running and every lookup reports NotFound.
    pub fn startup(paths: ModulePaths, kernel: K) -> Self {
        let cache = match ModuleCache::load(&paths.module_root()) {
            Ok(cache) => cache,
            Err(e) => {
                log::error!("failed to read kernel module cache: {}", e);
                ModuleCache::default()
            }
        };
        Self::new(cache, paths, kernel)
    }

    pub fn cache(&self) -> &ModuleCache {
        &self.cache
    }

    pub fn loader(&self) -> &Loader<K> {
        &self.loader
    }

    /// First module in cache order with an alias matching `identifier`.
    pub fn lookup(&self, identifier: &str) -> Option<&ModuleDescriptor> {
        self.index
            .iter()
            .find(|entry| {
                entry
                    .patterns
                    .iter()
                    .any(|p| p.matches_with(identifier, MATCH_OPTIONS))
            })
            .map(|entry| &self.cache.modules()[entry.module])
    }

    /// Absolute on-disk location of a cached module.
    pub fn module_path(&self, desc: &ModuleDescriptor) -> PathBuf {
        self.paths.resolve(&desc.path)
    }

    /// Find the module for `identifier` and load it with a fresh session.
    pub fn load_alias(&self, identifier: &str) -> Result<PathBuf> {
        let desc = self
            .lookup(identifier)
            .ok_or_else(|| Error::not_found(format!("module for alias {}", identifier)))?;
        debug!("modprobe: {} -> {}", identifier, desc.name);
        self.load_module(desc)
    }

    /// Load a cached module and its dependencies with a fresh session.
    pub fn load_module(&self, desc: &ModuleDescriptor) -> Result<PathBuf> {
        let path = self.module_path(desc);
        self.loader.load_path(&path, &mut LoadSession::new())?;
        Ok(path)
    }
}
