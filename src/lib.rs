//! audio_scheduler: daily audio playback at fixed times of day.
//!
//! A persisted time→file schedule drives a one-second polling loop. Each due
//! entry plays a notification cue and then its file on the selected output
//! device, and every outcome is appended to an audit log.
//! The CLI consumes this crate through [`AudioScheduler`].

pub mod app;
pub mod audit;
pub mod backend;
pub mod clock;
pub mod config;
pub mod decode;
pub mod device;
pub mod error;
pub mod logging;
pub mod playback;
pub mod schedule;
pub mod scheduler;

mod persist;

#[cfg(any(test, feature = "test-support"))]
pub mod mocks;

pub use app::{AudioScheduler, PlaySource};
pub use error::{Error, Result};
