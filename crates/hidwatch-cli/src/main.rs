//! hidwatch - list and watch hot-pluggable HID devices.
//!
//! Thin front end over `hidwatch-core`: probes for hotplug support, prints
//! the present hidraw devices, and follows attach/detach events until
//! interrupted.

#[cfg(target_os = "linux")]
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hidwatch")]
#[command(about = "Live registry of hot-pluggable HID devices")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Where sysfs is mounted
    #[arg(long, global = true)]
    sysfs_root: Option<PathBuf>,

    /// Kernel subsystem to watch
    #[arg(long, global = true)]
    subsystem: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report whether hotplug monitoring works on this host
    Probe,
    /// Print the devices present right now
    List {
        /// One JSON object per line
        #[arg(long)]
        json: bool,
        /// Read and print device info
        #[arg(long)]
        info: bool,
    },
    /// Print the present devices, then every attach and detach
    Watch {
        /// One JSON object per line
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(args: &Args) {
    // Logs go to stderr; stdout carries device output only.
    let level = if args.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false);
    if args.log_json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    #[cfg(target_os = "linux")]
    {
        linux::run(args).await
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = args.command;
        anyhow::bail!("hidwatch only supports Linux hosts")
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use super::{Args, Command};
    use crate::output::{self, DeviceLine};
    use anyhow::{Context, Result};
    use hidwatch_core::backend::{LinuxBackend, LinuxBackendConfig};
    use hidwatch_core::{DeviceManager, HotplugBackend, MonitorStatus};
    use tokio::sync::broadcast::error::RecvError;
    use tracing::{error, info, warn};

    pub async fn run(args: Args) -> Result<()> {
        let mut config = LinuxBackendConfig::new();
        if let Some(root) = args.sysfs_root {
            config = config.with_sysfs_root(root);
        }
        if let Some(subsystem) = args.subsystem {
            config = config.with_subsystem(subsystem);
        }
        let backend = LinuxBackend::new(config);

        match args.command {
            Command::Probe => probe(&backend),
            Command::List { json, info } => list(backend, json, info),
            Command::Watch { json } => watch(backend, json).await,
        }
    }

    fn probe(backend: &LinuxBackend) -> Result<()> {
        let supported = backend
            .is_supported()
            .context("Failed to probe for hotplug support")?;
        println!("{}", if supported { "supported" } else { "unsupported" });
        Ok(())
    }

    fn list(backend: LinuxBackend, json: bool, with_info: bool) -> Result<()> {
        let manager = DeviceManager::new(backend)?;
        if !with_info {
            for id in manager.device_ids() {
                println!("{}", output::render_id(&id, json)?);
            }
            return Ok(());
        }

        // Devices that fail to load are still listed, without info.
        for id in manager.device_ids() {
            let device = manager.open(&id);
            let line = DeviceLine {
                id: &id,
                info: device.as_deref().and_then(|d| d.info()),
            };
            println!("{}", output::render_device(&line, json)?);
        }
        Ok(())
    }

    async fn watch(backend: LinuxBackend, json: bool) -> Result<()> {
        let manager = DeviceManager::new(backend)?;
        let mut changes = manager.registry().subscribe_changes();
        let mut status = manager.registry().subscribe_status();

        for id in manager.device_ids() {
            println!("{}", output::render_id(&id, json)?);
        }

        let monitor = manager.start()?;
        info!("Watching for device changes, press Ctrl-C to exit");

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                signal = &mut shutdown => {
                    signal.context("Failed to listen for Ctrl-C")?;
                    info!("Shutdown signal received, stopping monitor");
                    monitor.stop();
                    break;
                }
                change = changes.recv() => match change {
                    Ok(change) => println!("{}", output::render_change(&change, json)?),
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Missed {} device changes, printing the current set", missed);
                        for id in manager.device_ids() {
                            println!("{}", output::render_id(&id, json)?);
                        }
                    }
                    Err(RecvError::Closed) => break,
                },
                Ok(_) = status.wait_for(MonitorStatus::is_faulted) => {
                    error!("Device monitor faulted, device list is stale");
                    break;
                }
            }
        }

        let report = tokio::task::spawn_blocking(move || monitor.join())
            .await
            .context("Device monitor task failed")??;
        info!(
            "Device monitor stopped ({} added, {} removed, {} unreadable)",
            report.added, report.removed, report.unreadable
        );
        Ok(())
    }
}
