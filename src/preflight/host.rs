//! Host capability checks.

use std::path::Path;

use super::CheckResult;
use crate::uevent::UeventSocket;

/// Check for root; `init_module(2)` needs CAP_SYS_MODULE.
pub fn check_privilege() -> CheckResult {
    // SAFETY: geteuid has no preconditions.
    let euid = unsafe { libc::geteuid() };
    if euid == 0 {
        CheckResult::pass("Privilege", "Running as root")
    } else {
        CheckResult::fail(
            "Privilege",
            format!("Running as uid {} (module insertion will be rejected)", euid),
            "Run as root",
        )
    }
}

/// Check the kernel device tree used by trigger mode.
pub fn check_device_tree(devices: &Path) -> CheckResult {
    if devices.is_dir() {
        CheckResult::pass("Device tree", format!("Found at {}", devices.display()))
    } else {
        CheckResult::fail(
            "Device tree",
            format!("Not found: {}", devices.display()),
            "Mount sysfs on /sys",
        )
    }
}

/// Check that the uevent broadcast socket can be opened.
pub fn check_uevent_socket() -> CheckResult {
    match UeventSocket::open() {
        Ok(_) => CheckResult::pass("Uevent socket", "NETLINK_KOBJECT_UEVENT available"),
        Err(e) => CheckResult::fail(
            "Uevent socket",
            format!("Cannot open: {}", e),
            "Check that the kernel has CONFIG_NET and netlink support",
        ),
    }
}
