//! Output device discovery and selection.
//!
//! Devices are always queried live, never cached, so a device plugged in
//! after startup is visible on the next enumeration.

use crate::backend::{AudioBackend, DeviceTarget, OutputDevice};
use crate::error::Result;
use std::sync::Arc;

#[derive(Clone)]
pub struct DeviceRegistry {
    backend: Arc<dyn AudioBackend>,
}

impl DeviceRegistry {
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        DeviceRegistry { backend }
    }

    /// Output-capable devices in host order.
    pub fn enumerate(&self) -> Result<Vec<OutputDevice>> {
        let devices = self.backend.devices()?;
        Ok(devices
            .into_iter()
            .filter(|d| d.max_output_channels > 0)
            .collect())
    }

    /// Find the device named exactly `name`.
    ///
    /// Never fails: an unset name, an unknown name or a failed enumeration
    /// all fall back to the system default, with a warning for the latter two.
    pub fn resolve(&self, name: Option<&str>) -> DeviceTarget {
        let Some(name) = name else {
            return DeviceTarget::SystemDefault;
        };

        match self.enumerate() {
            Ok(devices) => match devices.into_iter().find(|d| d.name == name) {
                Some(device) => DeviceTarget::Named(device),
                None => {
                    tracing::warn!(device = name, "selected output device not present, using system default");
                    DeviceTarget::SystemDefault
                }
            },
            Err(e) => {
                tracing::warn!(device = name, error = %e, "device enumeration failed, using system default");
                DeviceTarget::SystemDefault
            }
        }
    }
}
