//! Audio device enumeration and selection
//!
//! Devices are enumerated once at startup into fixed-shape descriptors
//! with explicit direction capabilities, then selected by name with a
//! deterministic first-device fallback for names that no longer exist
//! (unplugged hardware, renamed PipeWire nodes).

use crate::error::DeviceError;
use cpal::traits::{DeviceTrait, HostTrait};

/// A fixed-shape snapshot of one host audio device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Position in the enumeration order
    pub index: usize,
    /// Host-reported display name
    pub name: String,
    /// Channel count of the default input config, 0 if not input-capable
    pub max_input_channels: u16,
    /// Channel count of the default output config, 0 if not output-capable
    pub max_output_channels: u16,
}

impl DeviceDescriptor {
    pub fn is_input(&self) -> bool {
        self.max_input_channels > 0
    }

    pub fn is_output(&self) -> bool {
        self.max_output_channels > 0
    }
}

/// Query the host audio API for all devices. Called once at startup.
pub fn enumerate_devices() -> Result<Vec<DeviceDescriptor>, DeviceError> {
    let host = cpal::default_host();
    let devices = host
        .devices()
        .map_err(|e| DeviceError::Enumeration(e.to_string()))?;

    let mut descriptors = Vec::new();
    for (index, device) in devices.enumerate() {
        let name = device.name().unwrap_or_else(|_| "unknown".to_string());
        let max_input_channels = device
            .default_input_config()
            .map(|c| c.channels())
            .unwrap_or(0);
        let max_output_channels = device
            .default_output_config()
            .map(|c| c.channels())
            .unwrap_or(0);

        tracing::debug!(
            "Device {}: {} (in: {}, out: {})",
            index,
            name,
            max_input_channels,
            max_output_channels
        );

        descriptors.push(DeviceDescriptor {
            index,
            name,
            max_input_channels,
            max_output_channels,
        });
    }

    Ok(descriptors)
}

/// Input-capable view of an enumeration
pub fn input_devices(devices: &[DeviceDescriptor]) -> Vec<&DeviceDescriptor> {
    devices.iter().filter(|d| d.is_input()).collect()
}

/// Output-capable view of an enumeration
pub fn output_devices(devices: &[DeviceDescriptor]) -> Vec<&DeviceDescriptor> {
    devices.iter().filter(|d| d.is_output()).collect()
}

/// Resolve a persisted device name against an enumerated list.
///
/// An empty or unknown name falls back to the first device in the list,
/// so a profile saved on different hardware still selects something
/// deterministic. Fails only when the list itself is empty.
pub fn resolve_by_name<'a>(
    name: &str,
    devices: &[&'a DeviceDescriptor],
    direction: &'static str,
) -> Result<&'a DeviceDescriptor, DeviceError> {
    if let Some(found) = devices.iter().find(|d| d.name == name) {
        return Ok(found);
    }
    if !name.is_empty() {
        tracing::warn!(
            "{} device '{}' not found, falling back to first available",
            direction,
            name
        );
    }
    devices
        .first()
        .copied()
        .ok_or(DeviceError::NoDevices(direction))
}

/// Look up the underlying cpal device for a descriptor, by name.
pub(crate) fn find_cpal_device(
    descriptor: &DeviceDescriptor,
    direction: &'static str,
) -> Result<cpal::Device, DeviceError> {
    let host = cpal::default_host();
    host.devices()
        .map_err(|e| DeviceError::Enumeration(e.to_string()))?
        .find(|d| {
            d.name()
                .map(|n| n == descriptor.name)
                .unwrap_or(false)
        })
        .ok_or_else(|| DeviceError::OpenFailed {
            direction,
            name: descriptor.name.clone(),
            reason: "device disappeared since enumeration".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(index: usize, name: &str, inputs: u16, outputs: u16) -> DeviceDescriptor {
        DeviceDescriptor {
            index,
            name: name.to_string(),
            max_input_channels: inputs,
            max_output_channels: outputs,
        }
    }

    #[test]
    fn test_direction_filters() {
        let devices = vec![
            descriptor(0, "mic", 2, 0),
            descriptor(1, "speakers", 0, 2),
            descriptor(2, "duplex", 2, 2),
        ];
        let inputs = input_devices(&devices);
        let outputs = output_devices(&devices);
        assert_eq!(
            inputs.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
            vec!["mic", "duplex"]
        );
        assert_eq!(
            outputs.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
            vec!["speakers", "duplex"]
        );
    }

    #[test]
    fn test_resolve_exact_name() {
        let devices = vec![descriptor(0, "a", 2, 0), descriptor(1, "b", 2, 0)];
        let view = input_devices(&devices);
        assert_eq!(resolve_by_name("b", &view, "input").unwrap().name, "b");
    }

    #[test]
    fn test_resolve_missing_name_falls_back_to_first() {
        let devices = vec![descriptor(0, "a", 2, 0), descriptor(1, "b", 2, 0)];
        let view = input_devices(&devices);
        assert_eq!(resolve_by_name("gone", &view, "input").unwrap().name, "a");
        assert_eq!(resolve_by_name("", &view, "input").unwrap().name, "a");
    }

    #[test]
    fn test_resolve_empty_list_errors() {
        let view: Vec<&DeviceDescriptor> = Vec::new();
        assert!(resolve_by_name("x", &view, "input").is_err());
    }
}
