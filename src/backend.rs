//! Audio subsystem boundary.
//!
//! `AudioBackend` is the only place that touches the sound card. The rodio
//! implementation enumerates devices through rodio's bundled cpal and streams
//! fully decoded clips through a `Sink`.

use crate::decode::Clip;
use crate::error::{Error, Result};
use rodio::buffer::SamplesBuffer;
use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::{OutputStream, Sink};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// How often a streaming wait loop checks for completion or a halt request.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// An audio device as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDevice {
    /// Position in the host's device list.
    pub index: usize,
    pub name: String,
    pub max_output_channels: u16,
}

/// Where a clip is streamed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceTarget {
    Named(OutputDevice),
    /// Whatever output the OS currently designates as default.
    SystemDefault,
}

impl fmt::Display for DeviceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceTarget::Named(device) => write!(f, "{}", device.name),
            DeviceTarget::SystemDefault => write!(f, "system default"),
        }
    }
}

/// How a blocking stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    Completed,
    Halted,
}

pub trait AudioBackend: Send + Sync {
    /// Every device the host reports, queried live, including ones with no
    /// output channels.
    fn devices(&self) -> Result<Vec<OutputDevice>>;

    /// Stream `clip` to `target` and block until it finishes or `halt` is set.
    fn stream(&self, target: &DeviceTarget, clip: Clip, halt: &AtomicBool) -> Result<StreamEnd>;
}

/// Real output through rodio.
#[derive(Debug, Default, Clone, Copy)]
pub struct RodioBackend;

impl AudioBackend for RodioBackend {
    fn devices(&self) -> Result<Vec<OutputDevice>> {
        let host = rodio::cpal::default_host();
        let devices = host
            .devices()
            .map_err(|e| Error::Device(format!("Cannot enumerate devices: {}", e)))?;

        Ok(devices
            .enumerate()
            .filter_map(|(index, device)| {
                let name = device.name().ok()?;
                let max_output_channels = device
                    .supported_output_configs()
                    .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
                    .unwrap_or(0);
                Some(OutputDevice {
                    index,
                    name,
                    max_output_channels,
                })
            })
            .collect())
    }

    fn stream(&self, target: &DeviceTarget, clip: Clip, halt: &AtomicBool) -> Result<StreamEnd> {
        // The stream must stay alive until the sink drains.
        let (_stream, handle) = match target {
            DeviceTarget::SystemDefault => OutputStream::try_default(),
            DeviceTarget::Named(wanted) => {
                let device = find_output_device(&wanted.name)?;
                OutputStream::try_from_device(&device)
            }
        }
        .map_err(|e| Error::Output(format!("Failed to open audio output: {}", e)))?;

        let sink = Sink::try_new(&handle)
            .map_err(|e| Error::Output(format!("Failed to create audio sink: {}", e)))?;
        sink.append(SamplesBuffer::new(clip.channels, clip.sample_rate, clip.samples));
        sink.play();

        loop {
            if halt.load(Ordering::Relaxed) {
                sink.stop();
                return Ok(StreamEnd::Halted);
            }
            if sink.empty() {
                return Ok(StreamEnd::Completed);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

fn find_output_device(name: &str) -> Result<rodio::cpal::Device> {
    let host = rodio::cpal::default_host();
    host.output_devices()
        .map_err(|e| Error::Device(format!("Cannot enumerate output devices: {}", e)))?
        .find(|d| d.name().map(|n| n == name).unwrap_or(false))
        .ok_or_else(|| Error::Device(format!("Output device '{}' disappeared", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_display() {
        let named = DeviceTarget::Named(OutputDevice {
            index: 3,
            name: "USB Speakers".into(),
            max_output_channels: 2,
        });
        assert_eq!(named.to_string(), "USB Speakers");
        assert_eq!(DeviceTarget::SystemDefault.to_string(), "system default");
    }

    #[test]
    fn rodio_enumeration_succeeds_or_fails_gracefully() {
        // CI machines frequently have no sound card.
        match RodioBackend.devices() {
            Ok(devices) => {
                assert!(devices.windows(2).all(|w| w[0].index < w[1].index));
            }
            Err(e) => assert!(e.to_string().contains("Cannot enumerate")),
        }
    }
}
