//! Storage usage aggregation across the devices of one customer.

use crate::error::storage_error;
use crate::scanner::{bytes_to_megabytes, scan};
use crate::VaultResult;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use vault_types::DeviceNumber;

/// Usage of a single device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct DeviceUsage {
    pub device: DeviceNumber,
    pub bytes: u64,
}

/// Total usage of a customer plus the per-device breakdown, ascending by device.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct UsageReport {
    pub total_bytes: u64,
    pub devices: Vec<DeviceUsage>,
}

impl UsageReport {
    pub fn total_megabytes(&self) -> f64 {
        bytes_to_megabytes(self.total_bytes)
    }
}

/// Device numbers found directly under `customer_root`, ascending.
///
/// Entries whose names are not device numbers are ignored. A missing or unreadable root has no
/// devices.
pub fn devices(customer_root: &Path) -> VaultResult<Vec<DeviceNumber>> {
    let read_dir = match fs::read_dir(customer_root) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            tracing::warn!(path = %customer_root.display(), error = %e, "cannot read customer root");
            return Ok(Vec::new());
        }
    };

    let mut found = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(storage_error(customer_root))?;
        let Some(device) = entry.file_name().to_str().and_then(|n| n.parse().ok()) else {
            continue;
        };
        if entry.file_type().map_err(storage_error(entry.path()))?.is_dir() {
            found.push(device);
        }
    }
    found.sort();
    Ok(found)
}

/// Bytes used by `device`. Zero for a device that has never uploaded.
pub fn usage(customer_root: &Path, device: DeviceNumber) -> VaultResult<u64> {
    Ok(scan(&customer_root.join(device.to_string()))?
        .iter()
        .map(|entry| entry.total_bytes())
        .sum())
}

/// Bytes used by every device of the customer.
pub fn total_usage(customer_root: &Path) -> VaultResult<u64> {
    Ok(usage_report(customer_root)?.total_bytes)
}

pub fn usage_report(customer_root: &Path) -> VaultResult<UsageReport> {
    let devices = devices(customer_root)?
        .into_iter()
        .map(|device| {
            Ok(DeviceUsage {
                device,
                bytes: usage(customer_root, device)?,
            })
        })
        .collect::<VaultResult<Vec<_>>>()?;

    Ok(UsageReport {
        total_bytes: devices.iter().map(|d| d.bytes).sum(),
        devices,
    })
}
