//! Coldplug: replay `add` events for devices that appeared before the daemon.

use std::fs;
use std::ops::ControlFlow;
use std::path::Path;

use log::{debug, info};

use crate::walk::walk_files;

const UEVENT_FILE: &str = "uevent";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TriggerSummary {
    pub written: usize,
    pub failed: usize,
}

/// Write `add` into every `uevent` file under `devices_root`.
///
/// Best effort: a file that cannot be written is counted and skipped.
pub fn trigger_add(devices_root: &Path) -> TriggerSummary {
    let mut summary = TriggerSummary::default();

    walk_files(devices_root, |path| {
        if path.file_name().is_some_and(|name| name == UEVENT_FILE) {
            match fs::write(path, super::ACTION_ADD) {
                Ok(()) => summary.written += 1,
                Err(e) => {
                    debug!("trigger: {}: {}", path.display(), e);
                    summary.failed += 1;
                }
            }
        }
        ControlFlow::Continue(())
    });

    info!(
        "trigger: requested add for {} devices under {} ({} failed)",
        summary.written,
        devices_root.display(),
        summary.failed
    );
    summary
}
