//! Preflight checks for running the module daemon.
//!
//! Validates the environment BEFORE the daemon starts listening, so a
//! missing cache or missing privilege shows up as a readable report instead
//! of a stream of per-event failures.
//!
//! # Checks Performed
//!
//! - **Module tree**: `<root>/lib/modules/<release>` exists
//! - **Cache**: `cache.json` exists, decodes, and is not older than any module
//! - **Privilege**: effective uid 0 (needed for `init_module(2)`)
//! - **Device tree**: `/sys/devices` exists (trigger mode)
//! - **Uevent socket**: the kernel broadcast socket can be opened
//!
//! # Usage
//!
//! ```rust,ignore
//! use modprobed::preflight::PreflightChecker;
//!
//! let report = PreflightChecker::new(paths).run_all();
//! report.print_summary();
//! if !report.is_ok() {
//!     std::process::exit(1);
//! }
//! ```

mod cache;
mod host;

pub use cache::{check_cache, check_module_root};
pub use host::{check_device_tree, check_privilege, check_uevent_socket};

use std::path::PathBuf;

use crate::config::{ModulePaths, SYSFS_DEVICES};

/// Result of a single preflight check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    /// Name of the check
    pub name: String,
    /// Whether the check passed
    pub passed: bool,
    /// Human-readable message
    pub message: String,
    /// Optional suggestion for fixing the issue
    pub suggestion: Option<String>,
}

impl CheckResult {
    /// Create a passing check result.
    pub fn pass(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: message.into(),
            suggestion: None,
        }
    }

    /// Create a failing check result.
    pub fn fail(
        name: impl Into<String>,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: message.into(),
            suggestion: Some(suggestion.into()),
        }
    }

    /// Create a warning check result (passes but with a suggestion).
    pub fn warn(
        name: impl Into<String>,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: message.into(),
            suggestion: Some(suggestion.into()),
        }
    }

    /// Status tag shown in the summary.
    pub fn status(&self) -> &'static str {
        match (self.passed, &self.suggestion) {
            (false, _) => "[FAIL]",
            (true, Some(_)) => "[WARN]",
            (true, None) => "[OK]",
        }
    }
}

/// Comprehensive preflight report.
#[derive(Debug, Default)]
pub struct PreflightReport {
    /// All check results
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    /// Check if all preflight checks passed.
    pub fn is_ok(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    /// Get all failing checks.
    pub fn errors(&self) -> Vec<&CheckResult> {
        self.checks.iter().filter(|c| !c.passed).collect()
    }

    /// Get count of passing checks.
    pub fn passed_count(&self) -> usize {
        self.checks.iter().filter(|c| c.passed).count()
    }

    /// Get total check count.
    pub fn total_count(&self) -> usize {
        self.checks.len()
    }

    /// Print a summary of the preflight checks.
    pub fn print_summary(&self) {
        println!("=== Preflight Check Results ===\n");

        for check in &self.checks {
            println!("{} {}: {}", check.status(), check.name, check.message);
            if let Some(suggestion) = &check.suggestion {
                println!("     Suggestion: {}", suggestion);
            }
        }

        println!();
        if self.is_ok() {
            println!("All preflight checks passed ({}/{})", self.passed_count(), self.total_count());
        } else {
            println!(
                "Preflight checks failed: {} of {} passed",
                self.passed_count(),
                self.total_count()
            );
        }
    }
}

/// Preflight checker for one kernel release's module tree.
pub struct PreflightChecker {
    paths: ModulePaths,
    devices: PathBuf,
}

impl PreflightChecker {
    pub fn new(paths: ModulePaths) -> Self {
        Self {
            paths,
            devices: PathBuf::from(SYSFS_DEVICES),
        }
    }

    /// Use a different device tree root (tests, chroots).
    pub fn with_devices(mut self, devices: impl Into<PathBuf>) -> Self {
        self.devices = devices.into();
        self
    }

    /// Checks that only look at files.
    pub fn run_offline(&self) -> PreflightReport {
        let module_root = self.paths.module_root();
        let mut report = PreflightReport::default();
        report.checks.push(check_module_root(&module_root));
        report.checks.push(check_cache(&module_root));
        report.checks.push(check_device_tree(&self.devices));
        report
    }

    /// Run all preflight checks and return a comprehensive report.
    pub fn run_all(&self) -> PreflightReport {
        let mut report = self.run_offline();
        report.checks.push(check_privilege());
        report.checks.push(check_uevent_socket());
        report
    }
}
