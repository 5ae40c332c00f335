//! Paths and tunables.
//!
//! Module trees follow `<install-root>/lib/modules/<kernel-release>`; the
//! cache lives at the top of that directory.
//!
//! # Example
//!
//! ```rust
//! use modprobed::config::ModulePaths;
//!
//! let paths = ModulePaths::new("/mnt/sysroot", "6.12.0");
//! assert_eq!(
//!     paths.cache_file().to_str(),
//!     Some("/mnt/sysroot/lib/modules/6.12.0/cache.json")
//! );
//! ```

use std::ffi::CStr;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::module::cache::CACHE_FILENAME;

pub const MODULES_DIR: &str = "lib/modules";

/// Default number of hot-plug workers.
pub const DEFAULT_WORKERS: usize = 10;

/// Pause before asking the kernel to replay device events.
pub const DEFAULT_TRIGGER_DELAY: Duration = Duration::from_millis(100);

/// Root of the kernel device tree written to in trigger mode.
pub const SYSFS_DEVICES: &str = "/sys/devices";

/// Datagram buffer for the uevent socket.
pub const DEFAULT_RECV_BUFFER: usize = 8192;

/// Where the modules for one kernel release live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModulePaths {
    pub install_root: PathBuf,
    pub kernel_release: String,
}

impl ModulePaths {
    pub fn new(install_root: impl Into<PathBuf>, kernel_release: impl Into<String>) -> Self {
        Self {
            install_root: install_root.into(),
            kernel_release: kernel_release.into(),
        }
    }

    /// Paths for the running kernel on the live system.
    pub fn running() -> io::Result<Self> {
        Ok(Self::new("/", kernel_release()?))
    }

    /// `<install_root>/lib/modules/<kernel_release>`
    pub fn module_root(&self) -> PathBuf {
        self.install_root.join(MODULES_DIR).join(&self.kernel_release)
    }

    pub fn cache_file(&self) -> PathBuf {
        self.module_root().join(CACHE_FILENAME)
    }

    /// Turn a cached, install-root relative path back into a real one.
    pub fn resolve(&self, cached: &str) -> PathBuf {
        let cached = Path::new(cached);
        if cached.is_absolute() {
            cached.to_path_buf()
        } else {
            self.install_root.join(cached)
        }
    }
}

/// Release string of the running kernel, as `uname -r` prints it.
pub fn kernel_release() -> io::Result<String> {
    // SAFETY: utsname is plain old data; uname fills it in on success.
    let mut uts: libc::utsname = unsafe { std::mem::zeroed() };
    if unsafe { libc::uname(&mut uts) } != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: the kernel NUL-terminates every utsname field.
    let release = unsafe { CStr::from_ptr(uts.release.as_ptr()) };
    Ok(release.to_string_lossy().into_owned())
}

/// What `submit` does when workers fall behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueuePolicy {
    /// Queue grows without limit. Sustained overload grows memory.
    #[default]
    Unbounded,
    /// At most `capacity` units wait; further submissions are dropped.
    DropWhenFull { capacity: usize },
}

/// Hot-plug daemon settings.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub paths: ModulePaths,
    pub workers: usize,
    pub queue: QueuePolicy,
    /// Ask the kernel to re-announce devices present before startup
    pub trigger: bool,
    pub trigger_delay: Duration,
    pub sysfs_devices: PathBuf,
    pub recv_buffer: usize,
}

impl DaemonConfig {
    pub fn new(paths: ModulePaths) -> Self {
        Self {
            paths,
            workers: DEFAULT_WORKERS,
            queue: QueuePolicy::default(),
            trigger: false,
            trigger_delay: DEFAULT_TRIGGER_DELAY,
            sysfs_devices: PathBuf::from(SYSFS_DEVICES),
            recv_buffer: DEFAULT_RECV_BUFFER,
        }
    }
}
