//! Input device enumeration and selection.

use std::fmt;

use serde::{Deserialize, Serialize};

#[cfg(feature = "audio-cpal")]
use crate::error::{Result, VoxError};

/// An input device as listed for the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
    /// Likely captures system output rather than a microphone.
    pub is_loopback_like: bool,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if self.is_default {
            write!(f, " (default)")?;
        }
        if self.is_loopback_like {
            write!(f, " [loopback]")?;
        }
        Ok(())
    }
}

const LOOPBACK_HINTS: &[&str] = &[
    "stereo mix",
    "what u hear",
    "loopback",
    "monitor of",
    "wave out",
];

/// Name-based guess for devices that record system output.
pub fn is_loopback_like_name(name: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    LOOPBACK_HINTS.iter().any(|hint| lowered.contains(hint))
}

/// Order devices for display: microphones before loopbacks, default first,
/// then by name.
pub fn sort_for_display(devices: &mut [DeviceInfo]) {
    devices.sort_by_key(|d| (d.is_loopback_like, !d.is_default, d.name.to_ascii_lowercase()));
}

/// Every input device the default host exposes.
///
/// Enumeration failures are logged and yield an empty list.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let devices = match host.input_devices() {
        Ok(devices) => devices,
        Err(e) => {
            tracing::warn!("failed to enumerate input devices: {e}");
            return Vec::new();
        }
    };

    let mut list: Vec<DeviceInfo> = devices
        .filter_map(|device| device.name().ok())
        .map(|name| DeviceInfo {
            is_default: default_name.as_deref() == Some(name.as_str()),
            is_loopback_like: is_loopback_like_name(&name),
            name,
        })
        .collect();
    sort_for_display(&mut list);
    list
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    Vec::new()
}

/// Pick an input device: the preferred name if present, else the host
/// default, else the first input device.
///
/// # Errors
/// `VoxError::DeviceAcquisition` when the host has no input device at all.
#[cfg(feature = "audio-cpal")]
pub fn resolve_input_device(preferred: Option<&str>) -> Result<cpal::Device> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    if let Some(wanted) = preferred {
        let found = host
            .input_devices()
            .map_err(|e| VoxError::DeviceAcquisition(e.to_string()))?
            .find(|device| device.name().map(|n| n == wanted).unwrap_or(false));
        match found {
            Some(device) => return Ok(device),
            None => tracing::warn!(device = wanted, "preferred input device not found, falling back"),
        }
    }

    if let Some(device) = host.default_input_device() {
        return Ok(device);
    }
    tracing::warn!("no default input device, falling back to first available input");
    host.input_devices()
        .map_err(|e| VoxError::DeviceAcquisition(e.to_string()))?
        .next()
        .ok_or_else(|| VoxError::DeviceAcquisition("no input device available".into()))
}
