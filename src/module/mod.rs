//! Kernel module metadata, cache and loading.
//!
//! # Pipeline
//!
//! ```text
//! *.ko --(elf + modinfo)--> ModuleDescriptor --(cache)--> cache.json
//!                                                     |
//! alias/name --------------------------------> Loader::load --> init_module(2)
//! ```
//!
//! - `elf`: bounds-checked section lookup in ELF32/ELF64 images
//! - `modinfo`: `.modinfo` key/value extraction into [`ModuleDescriptor`]
//! - `cache`: build, write, load and search a module root
//! - `loader`: dependency-ordered insertion and removal

pub mod cache;
pub mod elf;
pub mod loader;
pub mod modinfo;

pub use cache::{build_cache, load_cache, search, ModuleCache};
pub use loader::{insert, unload, KernelModules, LoadSession, Loader, Syscalls, UnloadFlags};
pub use modinfo::{parse, ModuleDescriptor};
