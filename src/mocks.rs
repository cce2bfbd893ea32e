//! Controllable stand-ins for the sound card and the wall clock, plus small
//! fixtures for tests. Compiled for unit tests and for the `test-support`
//! feature used by the integration tests.

use crate::backend::{AudioBackend, DeviceTarget, OutputDevice, StreamEnd};
use crate::clock::Clock;
use crate::decode::Clip;
use crate::error::{Error, Result};
use chrono::{NaiveDate, NaiveDateTime};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// One call to [`AudioBackend::stream`] as seen by the fake.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamedClip {
    pub target: DeviceTarget,
    pub clip: Clip,
    pub end: StreamEnd,
}

/// In-memory audio backend that records every stream instead of playing it.
pub struct FakeBackend {
    devices: Mutex<Vec<OutputDevice>>,
    streams: Mutex<Vec<StreamedClip>>,
    fail_enumeration: AtomicBool,
    fail_output: AtomicBool,
    hold_until_halted: AtomicBool,
    in_flight: Mutex<usize>,
}

impl FakeBackend {
    pub fn new() -> Self {
        FakeBackend {
            devices: Mutex::new(Vec::new()),
            streams: Mutex::new(Vec::new()),
            fail_enumeration: AtomicBool::new(false),
            fail_output: AtomicBool::new(false),
            hold_until_halted: AtomicBool::new(false),
            in_flight: Mutex::new(0),
        }
    }

    /// A backend reporting the given `(name, max_output_channels)` devices.
    pub fn with_devices(devices: &[(&str, u16)]) -> Self {
        let backend = Self::new();
        for (name, channels) in devices {
            backend.add_device(name, *channels);
        }
        backend
    }

    pub fn add_device(&self, name: &str, max_output_channels: u16) {
        let mut devices = self.devices.lock().unwrap_or_else(PoisonError::into_inner);
        let index = devices.len();
        devices.push(OutputDevice {
            index,
            name: name.to_string(),
            max_output_channels,
        });
    }

    pub fn set_enumeration_failure(&self, fail: bool) {
        self.fail_enumeration.store(fail, Ordering::Relaxed);
    }

    pub fn set_output_failure(&self, fail: bool) {
        self.fail_output.store(fail, Ordering::Relaxed);
    }

    /// When set, streams never complete on their own; they end only when halted.
    pub fn hold_until_halted(&self, hold: bool) {
        self.hold_until_halted.store(hold, Ordering::Relaxed);
    }

    /// Streams that have finished, in completion order.
    pub fn streams(&self) -> Vec<StreamedClip> {
        self.streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of streams currently blocked inside `stream`.
    pub fn in_flight(&self) -> usize {
        *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for FakeBackend {
    fn devices(&self) -> Result<Vec<OutputDevice>> {
        if self.fail_enumeration.load(Ordering::Relaxed) {
            return Err(Error::Device("Cannot enumerate devices: fake failure".into()));
        }
        Ok(self
            .devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn stream(&self, target: &DeviceTarget, clip: Clip, halt: &AtomicBool) -> Result<StreamEnd> {
        if self.fail_output.load(Ordering::Relaxed) {
            return Err(Error::Output("Failed to open audio output: fake failure".into()));
        }

        *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        let end = loop {
            if halt.load(Ordering::Relaxed) {
                break StreamEnd::Halted;
            }
            if !self.hold_until_halted.load(Ordering::Relaxed) {
                break StreamEnd::Completed;
            }
            thread::sleep(Duration::from_millis(5));
        };
        *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner) -= 1;

        self.streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(StreamedClip {
                target: target.clone(),
                clip,
                end,
            });
        Ok(end)
    }
}

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(now: NaiveDateTime) -> Self {
        ManualClock {
            now: Mutex::new(now),
        }
    }

    /// A clock at `hour:minute:second` on an arbitrary fixed date.
    pub fn at(hour: u32, minute: u32, second: u32) -> Self {
        Self::new(fixed_date().and_hms_opt(hour, minute, second).unwrap_or_default())
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn set_time(&self, hour: u32, minute: u32, second: u32) {
        let date = self.now().date();
        if let Some(now) = date.and_hms_opt(hour, minute, second) {
            self.set(now);
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        if let Ok(delta) = chrono::Duration::from_std(by) {
            *now += delta;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn fixed_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 2).unwrap_or_default()
}

/// Write a minimal 16-bit PCM WAV file.
pub fn write_test_wav(path: &Path, channels: u16, sample_rate: u32, samples: &[i16]) {
    let data_len = (samples.len() * 2) as u32;
    let block_align = channels * 2;
    let byte_rate = sample_rate * block_align as u32;

    let mut bytes = Vec::with_capacity(44 + data_len as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVE");
    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&channels.to_le_bytes());
    bytes.extend_from_slice(&sample_rate.to_le_bytes());
    bytes.extend_from_slice(&byte_rate.to_le_bytes());
    bytes.extend_from_slice(&block_align.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    for s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }

    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if let Err(e) = fs::write(path, bytes) {
        panic!("cannot write test wav {}: {}", path.display(), e);
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}
