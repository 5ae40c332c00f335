//! Hot-plug daemon: uevent socket -> worker pool -> modprobe.
//!
//! This is the one place the module cache is loaded. The resulting
//! [`Modprobe`] is immutable and shared by every worker through an `Arc`.

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, info, warn};

use crate::config::DaemonConfig;
use crate::module::{KernelModules, Syscalls};
use crate::modprobe::Modprobe;
use crate::pool::{SubmitError, Submitter, WorkerPool};
use crate::uevent::{self, trigger, HotplugEvent, UeventSocket};

/// Handle one event: load the driver for a newly added device.
///
/// Events other than `add`, events without a modalias and modaliases no
/// cached module claims are not failures.
pub fn handle_event<K: KernelModules>(modprobe: &Modprobe<K>, event: &HotplugEvent) -> crate::Result<()> {
    if !event.is_add() {
        debug!("{}: ignoring {} event", event.device_path, event.action);
        return Ok(());
    }
    let Some(alias) = event.modalias() else {
        debug!("{}: no modalias", event.device_path);
        return Ok(());
    };

    let Some(desc) = modprobe.lookup(alias) else {
        debug!(
            "{}: no module for {} (subsystem {})",
            event.device_path,
            alias,
            event.subsystem().unwrap_or("?")
        );
        return Ok(());
    };

    let path = modprobe.load_module(desc)?;
    debug!("{}: loaded {}", event.device_path, path.display());
    Ok(())
}

/// Queue `event` for a worker. Never blocks; returns whether it was queued.
pub fn dispatch<K>(modprobe: &Arc<Modprobe<K>>, submitter: &Submitter, event: HotplugEvent) -> bool
where
    K: KernelModules + 'static,
{
    let modprobe = modprobe.clone();
    let device_path = event.device_path.clone();
    match submitter.submit(Box::new(move || handle_event(&modprobe, &event))) {
        Ok(()) => true,
        // QueueFull is already logged and counted by the pool.
        Err(SubmitError::QueueFull) => false,
        Err(SubmitError::Closed) => {
            warn!("{}: event lost, worker pool is shut down", device_path);
            false
        }
    }
}

/// Run the daemon until the process is killed.
pub async fn run(config: DaemonConfig) -> Result<()> {
    let modprobe = Arc::new(Modprobe::startup(config.paths.clone(), Syscalls));
    info!(
        "loaded {} cached modules for {}",
        modprobe.cache().len(),
        config.paths.kernel_release
    );

    let mut pool = WorkerPool::new(config.workers, config.queue);
    pool.start();
    let submitter = pool.submitter();

    let mut socket = UeventSocket::open().context("failed to open uevent socket")?;
    info!("listening for uevents with {} workers", pool.size());

    if config.trigger {
        let delay = config.trigger_delay;
        let devices = config.sysfs_devices.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tokio::task::spawn_blocking(move || trigger::trigger_add(&devices)).await;
        });
    }

    let recv_buffer = config.recv_buffer;
    tokio::task::spawn_blocking(move || {
        uevent::serve(&mut socket, recv_buffer, |event| {
            dispatch(&modprobe, &submitter, event);
        })
    })
    .await
    .context("uevent receive loop terminated")?;

    pool.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModulePaths, QueuePolicy};
    use crate::module::build_cache;
    use crate::testutil::{write_module, RecordingKernel};
    use tempfile::tempdir;

    fn modprobe(root: &std::path::Path) -> Modprobe<RecordingKernel> {
        let paths = ModulePaths::new(root, "6.12.0");
        let module_root = paths.module_root();
        write_module(&module_root, "soundcore", &[], &[]);
        write_module(&module_root, "snd_hda", &["soundcore"], &["pci:v00008086d*sv*sd*bc04sc03i*"]);
        write_module(&module_root, "broken_dep", &["nowhere"], &["usb:v9999*"]);
        build_cache(&module_root, root).unwrap();
        Modprobe::startup(paths, RecordingKernel::new())
    }

    fn event(datagram: &[u8]) -> HotplugEvent {
        HotplugEvent::parse(datagram).unwrap()
    }

    #[test]
    fn test_add_event_loads_driver() {
        let dir = tempdir().unwrap();
        let mp = modprobe(dir.path());

        handle_event(
            &mp,
            &event(b"add@/devices/pci0000:00/0000:00:1f.3\0SUBSYSTEM=pci\0MODALIAS=pci:v00008086d0000A348sv0sd0bc04sc03i00\0"),
        )
        .unwrap();

        assert_eq!(mp.loader().kernel().inserted(), vec!["soundcore", "snd_hda"]);
    }

    #[test]
    fn test_ignored_events() {
        let dir = tempdir().unwrap();
        let mp = modprobe(dir.path());

        handle_event(&mp, &event(b"remove@/devices/x\0MODALIAS=pci:v00008086d1sv0sd0bc04sc03i0\0")).unwrap();
        handle_event(&mp, &event(b"add@/devices/virtual/net/lo\0SUBSYSTEM=net\0")).unwrap();
        handle_event(&mp, &event(b"add@/devices/y\0MODALIAS=acpi:UNKNOWN:\0")).unwrap();

        assert!(mp.loader().kernel().inserted().is_empty());
    }

    #[test]
    fn test_resolution_failure_is_reported() {
        let dir = tempdir().unwrap();
        let mp = modprobe(dir.path());

        let err = handle_event(&mp, &event(b"add@/devices/usb1\0MODALIAS=usb:v9999p0001\0")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dispatch_through_pool() {
        let dir = tempdir().unwrap();
        let mp = Arc::new(modprobe(dir.path()));

        let mut pool = WorkerPool::new(2, QueuePolicy::Unbounded);
        pool.start();
        let submitter = pool.submitter();
        assert!(dispatch(
            &mp,
            &submitter,
            event(b"add@/devices/a\0MODALIAS=pci:v00008086d00000001sv0sd0bc04sc03i00\0"),
        ));
        assert!(dispatch(&mp, &submitter, event(b"add@/devices/b\0MODALIAS=usb:v9999p1\0")));
        drop(submitter);

        let stats = pool.shutdown().await;
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(mp.loader().kernel().inserted(), vec!["soundcore", "snd_hda"]);
    }

    #[test]
    fn test_dispatch_after_pool_is_gone() {
        let dir = tempdir().unwrap();
        let mp = Arc::new(modprobe(dir.path()));

        let pool = WorkerPool::new(2, QueuePolicy::Unbounded);
        let submitter = pool.submitter();
        drop(pool);

        let queued = dispatch(
            &mp,
            &submitter,
            event(b"add@/devices/a\0MODALIAS=pci:v00008086d00000001sv0sd0bc04sc03i00\0"),
        );
        assert!(!queued);
        assert!(mp.loader().kernel().inserted().is_empty());
    }
}
