//! DRM device discovery through sysfs

use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};
use crate::types::DeviceInfo;

use super::procfs::DRM_MAJOR;

/// Base path for DRM class devices
pub const DRM_CLASS_PATH: &str = "/sys/class/drm";

/// List the DRM device nodes of this system, ordered by minor
pub fn discover_devices() -> Result<Vec<DeviceInfo>> {
    discover_devices_in(Path::new(DRM_CLASS_PATH))
}

/// List DRM device nodes below a sysfs class directory
pub fn discover_devices_in(class_path: &Path) -> Result<Vec<DeviceInfo>> {
    if !class_path.exists() {
        return Err(Error::NoDeviceFound);
    }

    let entries = fs::read_dir(class_path).map_err(|e| {
        if e.kind() == io::ErrorKind::PermissionDenied {
            Error::permission_denied(&e)
        } else {
            Error::NoDeviceFound
        }
    })?;

    let mut devices = Vec::new();

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();

        // Skip connectors (card0-HDMI-A-1) and the version file
        if !(name.starts_with("card") || name.starts_with("renderD")) || name.contains('-') {
            continue;
        }

        match read_device_info(&entry.path(), &name) {
            Ok(device) => devices.push(device),
            Err(e) => debug!(node = %name, error = %e, "skipping DRM node"),
        }
    }

    if devices.is_empty() {
        return Err(Error::NoDeviceFound);
    }

    devices.sort_by_key(|d| d.minor);
    Ok(devices)
}

/// Read one DRM node's information from sysfs
fn read_device_info(node_path: &Path, name: &str) -> Result<DeviceInfo> {
    let dev_path = node_path.join("dev");
    let dev = fs::read_to_string(&dev_path)
        .map_err(|e| Error::sysfs(&dev_path, format!("failed to read dev: {}", e)))?;
    let minor = parse_dev(&dev).ok_or_else(|| Error::sysfs(&dev_path, "not a DRM device"))?;

    let device_path = node_path.join("device");

    let vendor_id = read_hex_id(&device_path.join("vendor"));
    let device_id = read_hex_id(&device_path.join("device"));

    // The device symlink ends in the bus address, e.g. ../../../0000:00:02.0
    let pci_address = fs::read_link(&device_path)
        .ok()
        .and_then(|target| target.file_name().map(|n| n.to_string_lossy().to_string()))
        .filter(|addr| is_pci_address(addr));

    let driver = fs::read_link(device_path.join("driver"))
        .ok()
        .and_then(|target| target.file_name().map(|n| n.to_string_lossy().to_string()));

    Ok(DeviceInfo {
        name: name.to_string(),
        minor,
        devnode: format!("/dev/dri/{}", name),
        driver,
        pci_address,
        vendor_id,
        device_id,
    })
}

/// Parse a "major:minor" dev file, accepting only the DRM major
fn parse_dev(dev: &str) -> Option<u32> {
    let (major, minor) = dev.trim().split_once(':')?;
    if major.parse::<u32>().ok()? != DRM_MAJOR {
        return None;
    }
    minor.parse().ok()
}

fn read_hex_id(path: &Path) -> Option<u16> {
    let s = fs::read_to_string(path).ok()?;
    parse_hex_or_dec(s.trim()).and_then(|v| u16::try_from(v).ok())
}

/// Parse a hex (0x...) or decimal number
fn parse_hex_or_dec(s: &str) -> Option<u64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

/// Matches "dddd:bb:dd.f"
fn is_pci_address(s: &str) -> bool {
    let parts: Vec<&str> = s.split([':', '.']).collect();
    parts.len() == 4
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_hexdigit()))
}
