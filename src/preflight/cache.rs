//! Module tree and cache validation.

use std::path::Path;

use super::CheckResult;
use crate::module::cache::{needs_rebuild, ModuleCache};

/// Check that the module directory for this release exists.
pub fn check_module_root(module_root: &Path) -> CheckResult {
    if module_root.is_dir() {
        CheckResult::pass("Module tree", format!("Found at {}", module_root.display()))
    } else {
        CheckResult::fail(
            "Module tree",
            format!("Not found: {}", module_root.display()),
            "Install kernel modules or pass --root/--kernel",
        )
    }
}

/// Check that the cache decodes and is up to date.
pub fn check_cache(module_root: &Path) -> CheckResult {
    let cache = match ModuleCache::load(module_root) {
        Ok(cache) => cache,
        Err(e) => {
            return CheckResult::fail("Module cache", e.to_string(), "Run: modprobed cache");
        }
    };

    let aliases: usize = cache.iter().map(|m| m.aliases.len()).sum();
    let message = format!("{} modules, {} aliases", cache.len(), aliases);

    if needs_rebuild(module_root) {
        CheckResult::warn(
            "Module cache",
            format!("{} (older than installed modules)", message),
            "Run: modprobed cache --if-stale",
        )
    } else {
        CheckResult::pass("Module cache", message)
    }
}
