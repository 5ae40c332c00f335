//! modprobed CLI
//!
//! Kernel module loader and hot-plug daemon for a minimal Linux system.
//! Modules are indexed once into `cache.json`; the daemon matches device
//! modaliases against that index and loads drivers with their dependencies.
//!
//! # Usage
//!
//! ```bash
//! # Index installed modules for the running kernel
//! modprobed cache
//!
//! # Same, for a mounted sysroot, only if something changed
//! modprobed --root /mnt/sysroot --kernel 6.12.0 cache --if-stale
//!
//! # Load a module and everything it depends on
//! modprobed load e1000e
//!
//! # Which module would handle this device?
//! modprobed modprobe pci:v00008086d000010D3sv00008086sd00000001bc02sc00i00 --dry-run
//!
//! # Run the hot-plug daemon, replaying devices that already exist
//! modprobed daemon --trigger
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;
use std::path::PathBuf;

use modprobed::config::{self, DaemonConfig, ModulePaths, QueuePolicy, DEFAULT_WORKERS};
use modprobed::modprobe::Modprobe;
use modprobed::module::{self, LoadSession, Loader, Syscalls, UnloadFlags};
use modprobed::preflight::PreflightChecker;

#[derive(Parser)]
#[command(name = "modprobed")]
#[command(author, version, about = "Kernel module loader and hot-plug daemon", long_about = None)]
struct Cli {
    /// Install root containing lib/modules
    #[arg(long, global = true, default_value = "/")]
    root: PathBuf,

    /// Kernel release (default: the running kernel)
    #[arg(long, global = true)]
    kernel: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a module (by name or path) and its dependencies
    Load {
        name: String,

        /// Fail if the kernel already has the module
        #[arg(long)]
        first_time: bool,
    },

    /// Remove a module from the kernel
    Unload {
        name: String,

        /// Remove even if in use
        #[arg(long)]
        force: bool,

        /// Do not wait for the module to become unused
        #[arg(long)]
        nonblock: bool,
    },

    /// Show the metadata of an installed module
    Info { name: String },

    /// Rebuild cache.json for the selected kernel
    Cache {
        /// Only rebuild when a module is newer than the cache
        #[arg(long)]
        if_stale: bool,
    },

    /// Load the module claiming a device alias
    Modprobe {
        alias: String,

        /// Print the matching module without loading it
        #[arg(long)]
        dry_run: bool,
    },

    /// Listen for kernel uevents and load drivers for new devices
    Daemon {
        /// Number of worker tasks
        #[arg(short, long, default_value_t = DEFAULT_WORKERS)]
        parallel: usize,

        /// Replay add events for devices present at startup
        #[arg(long)]
        trigger: bool,

        /// Bound the work queue and drop events once it is full
        #[arg(long)]
        queue_capacity: Option<usize>,
    },

    /// Check that this system can run the daemon
    Check,
}

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(if cli.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .parse_default_env()
        .init();

    let result = module_paths(&cli).and_then(|paths| match cli.command {
        Commands::Load { name, first_time } => cmd_load(&paths, &name, first_time),
        Commands::Unload {
            name,
            force,
            nonblock,
        } => cmd_unload(&name, force, nonblock),
        Commands::Info { name } => cmd_info(&paths, &name),
        Commands::Cache { if_stale } => cmd_cache(&paths, if_stale),
        Commands::Modprobe { alias, dry_run } => cmd_modprobe(paths, &alias, dry_run),
        Commands::Daemon {
            parallel,
            trigger,
            queue_capacity,
        } => cmd_daemon(paths, parallel, trigger, queue_capacity),
        Commands::Check => cmd_check(paths),
    });

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn module_paths(cli: &Cli) -> Result<ModulePaths> {
    let release = match &cli.kernel {
        Some(release) => release.clone(),
        None => config::kernel_release().context("failed to read running kernel release")?,
    };
    // Cached paths are joined back onto the root, so it must not depend on cwd.
    let root = std::path::absolute(&cli.root)
        .with_context(|| format!("invalid --root {}", cli.root.display()))?;
    Ok(ModulePaths::new(root, release))
}

fn cmd_load(paths: &ModulePaths, name: &str, first_time: bool) -> Result<()> {
    let loader = Loader::new(Syscalls, paths.module_root()).first_time(first_time);
    let mut session = LoadSession::new();
    loader
        .load(name, &mut session)
        .with_context(|| format!("failed to load {}", name))?;
    println!("{}: {} module(s) loaded or resident", name, session.len());
    Ok(())
}

fn cmd_unload(name: &str, force: bool, nonblock: bool) -> Result<()> {
    let mut flags = UnloadFlags::empty();
    flags.set(UnloadFlags::FORCE, force);
    flags.set(UnloadFlags::NONBLOCK, nonblock);
    module::unload(&Syscalls, name, flags).with_context(|| format!("failed to unload {}", name))?;
    Ok(())
}

fn cmd_info(paths: &ModulePaths, name: &str) -> Result<()> {
    let path = module::search(name, &paths.module_root())?;
    let desc = module::parse(&path)?;

    println!("name:     {}", desc.name);
    println!("license:  {}", desc.license);
    for alias in &desc.aliases {
        println!("alias:    {}", alias);
    }
    println!("depends:  {}", desc.depends.join(","));
    println!("path:     {}", path.display());
    Ok(())
}

fn cmd_cache(paths: &ModulePaths, if_stale: bool) -> Result<()> {
    let module_root = paths.module_root();
    if !module_root.is_dir() {
        bail!(
            "No modules installed for {} (expected {})",
            paths.kernel_release,
            module_root.display()
        );
    }

    if if_stale && !module::cache::needs_rebuild(&module_root) {
        println!("[SKIP] {} is up to date", paths.cache_file().display());
        return Ok(());
    }

    let cache = module::build_cache(&module_root, &paths.install_root)?;
    println!(
        "Wrote {} ({} modules)",
        paths.cache_file().display(),
        cache.len()
    );
    Ok(())
}

fn cmd_modprobe(paths: ModulePaths, alias: &str, dry_run: bool) -> Result<()> {
    let cache = module::load_cache(&paths.module_root())?;
    let modprobe = Modprobe::new(cache, paths, Syscalls);

    if dry_run {
        let Some(desc) = modprobe.lookup(alias) else {
            bail!("No module matches {}", alias);
        };
        println!("{} -> {} ({})", alias, desc.name, modprobe.module_path(desc).display());
        return Ok(());
    }

    let path = modprobe.load_alias(alias)?;
    println!("{} -> {}", alias, path.display());
    Ok(())
}

fn cmd_daemon(
    paths: ModulePaths,
    parallel: usize,
    trigger: bool,
    queue_capacity: Option<usize>,
) -> Result<()> {
    if parallel == 0 {
        bail!("--parallel must be at least 1");
    }

    let mut config = DaemonConfig::new(paths);
    config.workers = parallel;
    config.trigger = trigger;
    if let Some(capacity) = queue_capacity {
        config.queue = QueuePolicy::DropWhenFull { capacity };
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(modprobed::daemon::run(config))
}

fn cmd_check(paths: ModulePaths) -> Result<()> {
    let report = PreflightChecker::new(paths).run_all();
    report.print_summary();
    if !report.is_ok() {
        bail!("{} preflight check(s) failed", report.errors().len());
    }
    Ok(())
}
