//! Kernel module management for a minimal Linux userspace.
//!
//! Indexes `.modinfo` metadata of installed modules into `cache.json`,
//! loads modules with their dependencies, and drives a hot-plug daemon
//! that maps kernel uevent modaliases to drivers.

pub mod config;
pub mod daemon;
pub mod error;
pub mod modprobe;
pub mod module;
pub mod pool;
pub mod preflight;
pub mod uevent;
pub mod walk;

#[cfg(test)]
mod testutil;

pub use error::{Error, Result};
