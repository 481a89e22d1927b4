//! `blocksyncd`: the backup daemon binary. Loads config,
//! installs logging, constructs the `BackupService`, and then blocks
//! forever — the actual request framing is an external IPC layer this
//! binary does not implement.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use blocksync::config::Config;
use blocksync::logging;
use blocksync::manager::UnsyncedSectorManager;
use blocksync::service::BackupService;
use blocksync::tracer::kernel::KernelTracer;

/// Incremental block-level backup daemon.
#[derive(Debug, Parser)]
#[command(name = "blocksyncd", version, about)]
struct Args {
    /// Path to the daemon's TOML configuration file.
    #[arg(long, default_value = "/etc/blocksync/blocksyncd.toml")]
    config: PathBuf,

    /// Override the IPC socket path from the config file.
    #[arg(long)]
    ipc_socket_path: Option<PathBuf>,

    /// Increase log verbosity (repeatable). Ignored if `RUST_LOG` is set.
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease log verbosity (repeatable). Ignored if `RUST_LOG` is set.
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    quiet: u8,

    /// Stay attached to the controlling terminal instead of daemonizing.
    #[arg(long)]
    foreground: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    logging::init(args.verbose as i8 - args.quiet as i8);

    let mut config = Config::load(&args.config)?;
    if let Some(socket_path) = args.ipc_socket_path {
        config.ipc_socket_path = socket_path;
    }

    if !args.foreground {
        tracing::info!("blocksyncd starting (background mode is delegated to the service supervisor)");
    }

    let tracer = Arc::new(KernelTracer::new(&config.tracer_node_dir));
    let manager = Arc::new(UnsyncedSectorManager::new(tracer));
    let service = Arc::new(BackupService::new(manager, config.device_lock_dir.clone()));

    tracing::info!(
        ipc_socket_path = %config.ipc_socket_path.display(),
        "blocksyncd ready; awaiting requests on the external IPC layer",
    );

    // The request framing itself lives outside this core;
    // a production binary would hand `service` to that listener here.
    let _ = service;
    std::thread::park();
    Ok(())
}
