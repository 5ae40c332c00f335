//! Dependency-aware module loading.
//!
//! [`Loader::load`] resolves a module by name or path, loads its declared
//! dependencies depth-first, then hands the image to the kernel. The kernel
//! itself sits behind [`KernelModules`] so the resolution logic can run
//! against a stand-in without `CAP_SYS_MODULE`.
//!
//! Insertions that succeeded before a failing step are not rolled back.
//! A module the kernel already has (`EEXIST`) is treated as loaded by
//! default, whereas the bare [`insert`] reports it as an `Os` error.

use std::collections::HashSet;
use std::ffi::{CStr, CString};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bitflags::bitflags;
use log::{debug, info};

use super::cache::search;
use super::modinfo;
use crate::error::{Error, Result};

bitflags! {
    /// Flags for `delete_module(2)`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct UnloadFlags: u32 {
        /// Fail with EWOULDBLOCK instead of waiting for the refcount to drop
        const NONBLOCK = libc::O_NONBLOCK as u32;
        /// Unload even if the module is in use (needs CONFIG_MODULE_FORCE_UNLOAD)
        const FORCE = libc::O_TRUNC as u32;
    }
}

/// The two privileged operations the loader needs.
pub trait KernelModules: Send + Sync {
    /// `init_module(2)`: link `image` into the kernel with `params`.
    fn init_module(&self, image: &[u8], params: &CStr) -> io::Result<()>;

    /// `delete_module(2)`: remove the module called `name`.
    fn delete_module(&self, name: &CStr, flags: UnloadFlags) -> io::Result<()>;
}

/// Direct system calls against the running kernel.
#[derive(Debug, Clone, Copy, Default)]
pub struct Syscalls;

impl KernelModules for Syscalls {
    fn init_module(&self, image: &[u8], params: &CStr) -> io::Result<()> {
        // SAFETY: image and params outlive the call; the kernel copies both.
        let rc = unsafe {
            libc::syscall(
                libc::SYS_init_module,
                image.as_ptr() as *const libc::c_void,
                image.len() as libc::c_ulong,
                params.as_ptr(),
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn delete_module(&self, name: &CStr, flags: UnloadFlags) -> io::Result<()> {
        // SAFETY: name is a valid NUL-terminated string for the whole call.
        let rc = unsafe {
            libc::syscall(
                libc::SYS_delete_module,
                name.as_ptr(),
                flags.bits() as libc::c_uint,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Modules handled during one top-level [`Loader::load`] call.
///
/// Never shared between calls; two concurrent loads may both try to insert
/// the same dependency and rely on the kernel rejecting the second one.
#[derive(Debug, Default)]
pub struct LoadSession {
    loaded: HashSet<PathBuf>,
    resolving: Vec<PathBuf>,
}

impl LoadSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.loaded.contains(path)
    }

    pub fn len(&self) -> usize {
        self.loaded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty()
    }

    fn cycle_through(&self, path: &Path) -> Option<Vec<String>> {
        let start = self.resolving.iter().position(|p| p == path)?;
        let mut chain: Vec<String> = self.resolving[start..].iter().map(|p| module_stem(p)).collect();
        chain.push(module_stem(path));
        Some(chain)
    }
}

fn module_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Resolves and inserts modules found under one search root.
pub struct Loader<K> {
    kernel: K,
    search_root: PathBuf,
    first_time: bool,
}

impl<K: KernelModules> Loader<K> {
    pub fn new(kernel: K, search_root: impl Into<PathBuf>) -> Self {
        Self {
            kernel,
            search_root: search_root.into(),
            first_time: false,
        }
    }

    /// Treat "already loaded" (`EEXIST`) as a failure instead of success.
    pub fn first_time(mut self, first_time: bool) -> Self {
        self.first_time = first_time;
        self
    }

    pub fn search_root(&self) -> &Path {
        &self.search_root
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Load `identifier` and, before it, everything it depends on.
    ///
    /// `identifier` is either an absolute path or a module name looked up
    /// under the search root. Any failure aborts the whole load.
    ///
    /// Unlike [`insert`], an `EEXIST` rejection counts as success here
    /// unless [`Loader::first_time`] is set: the module is already resident.
    pub fn load(&self, identifier: &str, session: &mut LoadSession) -> Result<()> {
        if Path::new(identifier).is_absolute() {
            self.load_path(Path::new(identifier), session)
        } else {
            let path = search(identifier, &self.search_root)?;
            self.load_path(&path, session)
        }
    }

    /// Load the module image at `path` with its dependencies. The path is
    /// used as given, relative or not; only dependencies go through search.
    pub fn load_path(&self, path: &Path, session: &mut LoadSession) -> Result<()> {
        let path = path.to_path_buf();
        if session.contains(&path) {
            return Ok(());
        }
        if let Some(chain) = session.cycle_through(&path) {
            return Err(Error::DependencyCycle { chain });
        }

        let desc = modinfo::parse(&path)?;

        session.resolving.push(path.clone());
        let deps = desc
            .depends
            .iter()
            .try_for_each(|dep| self.load(dep, session));
        session.resolving.pop();
        deps?;

        match insert(&self.kernel, &path, "") {
            Ok(()) => info!("loaded {}", path.display()),
            Err(e) if !self.first_time && e.os_code() == Some(libc::EEXIST) => {
                debug!("{} already loaded", path.display());
            }
            Err(e) => return Err(e),
        }
        session.loaded.insert(path);
        Ok(())
    }
}

/// Read the image at `path` and pass it to `init_module(2)` with `options`.
pub fn insert<K: KernelModules + ?Sized>(kernel: &K, path: &Path, options: &str) -> Result<()> {
    let image = fs::read(path).map_err(|e| Error::io(path, e))?;
    let params = CString::new(options).map_err(|_| Error::InvalidParams(options.to_string()))?;

    kernel.init_module(&image, &params).map_err(|e| Error::Os {
        op: "init_module",
        target: path.display().to_string(),
        code: e.raw_os_error().unwrap_or(libc::EIO),
    })
}

/// Remove the module called `name` from the kernel.
pub fn unload<K: KernelModules + ?Sized>(kernel: &K, name: &str, flags: UnloadFlags) -> Result<()> {
    let c_name = CString::new(name).map_err(|_| Error::not_found(format!("module {:?}", name)))?;

    kernel.delete_module(&c_name, flags).map_err(|e| Error::Os {
        op: "delete_module",
        target: name.to_string(),
        code: e.raw_os_error().unwrap_or(libc::EIO),
    })
}
