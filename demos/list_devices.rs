//! Example: List DRM devices
//!
//! This example enumerates the DRM device nodes of the system and shows
//! which driver and PCI device each one belongs to.
//!
//! Run with: cargo run --example list_devices

#[cfg(target_os = "linux")]
fn main() -> gpu_clients::Result<()> {
    use gpu_clients::linux::discover_devices;

    println!("DRM Device Discovery");
    println!("====================");
    println!();

    match discover_devices() {
        Ok(devices) => {
            println!("Found {} DRM node(s):", devices.len());
            println!();

            for device in &devices {
                let kind = if device.is_render_node() { "render" } else { "primary" };
                println!("{} ({} node, minor {})", device.name, kind, device.minor);
                println!("  Device Node: {}", device.devnode);

                if let Some(ref driver) = device.driver {
                    println!("  Driver:      {}", driver);
                }
                if let Some(ref pci) = device.pci_address {
                    println!("  PCI Address: {}", pci);
                }
                if let (Some(vendor), Some(id)) = (device.vendor_id, device.device_id) {
                    println!("  PCI ID:      {:04x}:{:04x}", vendor, id);
                }

                println!();
            }
        }
        Err(e) => {
            eprintln!("Error discovering DRM devices: {}", e);

            if e.is_device_missing() {
                eprintln!();
                eprintln!("No DRM device found. Make sure:");
                eprintln!("  1. A GPU driver is loaded (check with: ls /dev/dri)");
                eprintln!("  2. sysfs is mounted (/sys/class/drm exists)");
            }

            return Err(e);
        }
    }

    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!("{}", gpu_clients::platform_support_status());
}
