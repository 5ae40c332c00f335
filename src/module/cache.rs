//! Directory-wide module index (`cache.json`).
//!
//! Built offline by scanning a module root, written once, then loaded
//! read-only by the daemon. A rebuild replaces the file wholesale.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::modinfo::{self, ModuleDescriptor};
use crate::error::{Error, Result};
use crate::walk::walk_files;

pub const CACHE_FILENAME: &str = "cache.json";
pub const MODULE_EXTENSION: &str = "ko";

/// Ordered list of module descriptors for one kernel release.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleCache {
    modules: Vec<ModuleDescriptor>,
}

impl ModuleCache {
    pub fn new(modules: Vec<ModuleDescriptor>) -> Self {
        Self { modules }
    }

    /// Scan `module_root` for `.ko` files and parse each one.
    ///
    /// Files that fail to parse are skipped. Accepted paths have
    /// `install_root` stripped so the cache stays valid when the tree is
    /// later mounted at `/`.
    pub fn scan(module_root: &Path, install_root: &Path) -> Result<Self> {
        let meta = fs::metadata(module_root).map_err(|e| Error::io(module_root, e))?;
        if !meta.is_dir() {
            return Err(Error::not_found(format!("module directory {}", module_root.display())));
        }

        let mut modules = Vec::new();
        let mut skipped = 0usize;
        walk_files(module_root, |path| {
            if path.extension() != Some(OsStr::new(MODULE_EXTENSION)) {
                return ControlFlow::Continue(());
            }
            match modinfo::parse(path) {
                Ok(mut desc) => {
                    desc.path = strip_install_root(path, install_root);
                    modules.push(desc);
                }
                Err(e) => {
                    debug!("cache: skipping {}: {}", path.display(), e);
                    skipped += 1;
                }
            }
            ControlFlow::Continue(())
        });

        info!(
            "cache: indexed {} modules under {} ({} skipped)",
            modules.len(),
            module_root.display(),
            skipped
        );
        Ok(Self { modules })
    }

    /// Serialize to `<module_root>/cache.json`, replacing any previous file.
    pub fn write(&self, module_root: &Path) -> Result<PathBuf> {
        let target = module_root.join(CACHE_FILENAME);
        let tmp = module_root.join(format!(".{}.tmp", CACHE_FILENAME));

        let data = serde_json::to_vec(&self.modules)
            .map_err(|source| Error::io(&target, io::Error::other(source)))?;
        fs::write(&tmp, data).map_err(|e| Error::io(&tmp, e))?;
        fs::rename(&tmp, &target).map_err(|e| Error::io(&target, e))?;

        Ok(target)
    }

    /// Read `<module_root>/cache.json`.
    pub fn load(module_root: &Path) -> Result<Self> {
        let path = module_root.join(CACHE_FILENAME);
        let data = fs::read(&path).map_err(|e| Error::io(&path, e))?;
        let modules = serde_json::from_slice(&data).map_err(|source| Error::Decode {
            path: path.clone(),
            source,
        })?;
        Ok(Self { modules })
    }

    pub fn modules(&self) -> &[ModuleDescriptor] {
        &self.modules
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.modules.iter()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Scan `module_root` and write the result as its cache file.
pub fn build_cache(module_root: &Path, install_root: &Path) -> Result<ModuleCache> {
    let cache = ModuleCache::scan(module_root, install_root)?;
    cache.write(module_root)?;
    Ok(cache)
}

/// Read the cache file of `module_root`.
pub fn load_cache(module_root: &Path) -> Result<ModuleCache> {
    ModuleCache::load(module_root)
}

/// Find `<name>.ko` under `root`, returning the first hit in walk order.
pub fn search(name: &str, root: &Path) -> Result<PathBuf> {
    let wanted = format!("{}.{}", name, MODULE_EXTENSION);
    let mut found = None;

    walk_files(root, |path| {
        if path.file_name() == Some(OsStr::new(&wanted)) {
            found = Some(path.to_path_buf());
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    });

    found.ok_or_else(|| Error::not_found(format!("module {} under {}", name, root.display())))
}

/// Whether the cache is missing or older than any module file.
pub fn needs_rebuild(module_root: &Path) -> bool {
    let cache_time = match modified(&module_root.join(CACHE_FILENAME)) {
        Some(t) => t,
        None => return true,
    };

    let mut stale = false;
    walk_files(module_root, |path| {
        if path.extension() == Some(OsStr::new(MODULE_EXTENSION))
            && modified(path).is_some_and(|t| t > cache_time)
        {
            stale = true;
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    });
    stale
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// `/mnt/sysroot/lib/modules/x/a.ko` with root `/mnt/sysroot` becomes
/// `lib/modules/x/a.ko`.
fn strip_install_root(path: &Path, install_root: &Path) -> String {
    path.strip_prefix(install_root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}
