//! Basic usage example - list the present HID devices and print changes
//! for a few seconds.

#[cfg(not(target_os = "linux"))]
fn main() {
    println!("This example needs a Linux host.");
}

#[cfg(target_os = "linux")]
fn main() -> hidwatch_core::Result<()> {
    use hidwatch_core::backend::LinuxBackend;
    use hidwatch_core::{DeviceManager, HotplugBackend};
    use std::time::{Duration, Instant};
    use tokio::sync::broadcast::error::TryRecvError;

    let seconds: u64 = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(10);

    let backend = LinuxBackend::default();
    if !backend.is_supported()? {
        println!("Hotplug monitoring is not available on this host.");
        return Ok(());
    }

    let manager = DeviceManager::new(backend)?;
    let devices = manager.devices();
    if devices.is_empty() {
        println!("No HID devices found.");
    } else {
        println!("Found {} devices:", devices.len());
        for device in &devices {
            match device.info() {
                Some(info) => println!("  - {} ({})", info.name, info.devnode.display()),
                None => println!("  - {}", device.syspath().display()),
            }
        }
    }

    let mut changes = manager.registry().subscribe_changes();
    let monitor = manager.start()?;
    println!("Watching for {} seconds...", seconds);

    let deadline = Instant::now() + Duration::from_secs(seconds);
    while Instant::now() < deadline && !monitor.is_finished() {
        match changes.try_recv() {
            Ok(change) => println!("  {:?} {}", change.kind, change.device),
            Err(TryRecvError::Empty) => std::thread::sleep(Duration::from_millis(100)),
            Err(_) => break,
        }
    }

    monitor.stop();
    let report = monitor.join()?;
    println!("{} added, {} removed", report.added, report.removed);
    Ok(())
}
