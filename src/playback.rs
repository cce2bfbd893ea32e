//! Playback engine: cue, decode, volume, device, stream, audit.
//!
//! Every request runs on its own thread. The engine keeps no queue: when a
//! new request claims the output, the stream it replaces is halted, which is
//! how a single-stream sound card behaves anyway.

use crate::audit::AuditLog;
use crate::backend::{AudioBackend, DeviceTarget, StreamEnd};
use crate::decode::Clip;
use crate::device::DeviceRegistry;
use crate::error::{Error, Result};
use std::fmt;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

/// Linear gain in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Volume(f32);

impl Volume {
    pub const MUTE: Volume = Volume(0.0);
    pub const FULL: Volume = Volume(1.0);

    /// Clamp `value` into range. Non-finite input is rejected.
    pub fn new(value: f32) -> Result<Self> {
        if !value.is_finite() {
            return Err(Error::InvalidVolume);
        }
        Ok(Volume(value.clamp(0.0, 1.0)))
    }

    pub fn get(self) -> f32 {
        self.0
    }
}

impl Default for Volume {
    fn default() -> Self {
        Volume(0.8)
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.0}%", self.0 * 100.0)
    }
}

/// One playback attempt, owned by the thread executing it.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackRequest {
    pub file: PathBuf,
    pub volume: Volume,
    /// Selected output device name; `None` means system default.
    pub device: Option<String>,
}

/// How a playback attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Played { device: String },
    /// Halted by `stop()` or superseded by a later request.
    Stopped,
    Failed(String),
}

/// Handle to a spawned playback; dropping it detaches.
pub struct PlaybackTask {
    done: mpsc::Receiver<PlaybackOutcome>,
}

impl PlaybackTask {
    /// Block until the playback ends. `None` if its thread panicked.
    pub fn wait(self) -> Option<PlaybackOutcome> {
        self.done.recv().ok()
    }
}

/// Halt request shared between the engine and one playback thread.
#[derive(Default)]
struct HaltSignal {
    halt: AtomicBool,
    /// Set when the halt came from `stop()` rather than a newer request.
    stopped: AtomicBool,
}

struct ActiveStream {
    id: u64,
    signal: Arc<HaltSignal>,
}

pub struct PlaybackEngine {
    backend: Arc<dyn AudioBackend>,
    devices: DeviceRegistry,
    audit: AuditLog,
    cue_path: PathBuf,
    active: Mutex<Option<ActiveStream>>,
    next_id: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PlaybackEngine {
    pub fn new(backend: Arc<dyn AudioBackend>, audit: AuditLog, cue_path: impl Into<PathBuf>) -> Self {
        PlaybackEngine {
            devices: DeviceRegistry::new(backend.clone()),
            backend,
            audit,
            cue_path: cue_path.into(),
            active: Mutex::new(None),
            next_id: AtomicU64::new(1),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn cue_path(&self) -> &Path {
        &self.cue_path
    }

    /// True while some request holds the output.
    pub fn is_playing(&self) -> bool {
        self.active.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Run `request` on a new thread without waiting for it.
    pub fn spawn(self: &Arc<Self>, request: PlaybackRequest) -> Result<PlaybackTask> {
        let (tx, rx) = mpsc::channel();
        let engine = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("playback".into())
            .spawn(move || {
                let outcome = engine.play(&request);
                let _ = tx.send(outcome);
            })
            .map_err(|source| Error::Spawn {
                name: "playback",
                source,
            })?;

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
        Ok(PlaybackTask { done: rx })
    }

    /// Execute `request` on the calling thread. Never fails: every error is
    /// written to the audit log and reported in the outcome.
    pub fn play(&self, request: &PlaybackRequest) -> PlaybackOutcome {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let signal = self.claim(id);
        tracing::debug!(id, file = %request.file.display(), volume = %request.volume, "playback started");

        let outcome = self.run(request, &signal.halt);
        self.release(id);

        match &outcome {
            PlaybackOutcome::Played { device } => {
                self.audit
                    .append(&format!("Played: {} on {}", request.file.display(), device));
            }
            PlaybackOutcome::Failed(message) => {
                tracing::error!(file = %request.file.display(), "{}", message);
                self.audit.append(&format!("Error: {}", message));
            }
            PlaybackOutcome::Stopped => {
                tracing::debug!(id, file = %request.file.display(), "playback halted");
                if signal.stopped.load(Ordering::Relaxed) {
                    self.audit.append("Audio stopped");
                }
            }
        }
        outcome
    }

    /// Halt the active stream, if any. Returns whether something was playing.
    ///
    /// `Audio stopped` is logged by the playback thread once its stream has
    /// actually ended halted, so a stream that drained just before the stop
    /// request is recorded as played instead.
    pub fn stop(&self) -> bool {
        // Flags are set under the lock; `release` takes it before the
        // playback thread reads them.
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        match active.take() {
            Some(stream) => {
                stream.signal.stopped.store(true, Ordering::Relaxed);
                stream.signal.halt.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Halt the active stream and join every outstanding playback thread.
    pub fn shutdown(&self) {
        if let Some(stream) = self.active.lock().unwrap_or_else(PoisonError::into_inner).take() {
            stream.signal.halt.store(true, Ordering::Relaxed);
        }
        let tasks = mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in tasks {
            if handle.join().is_err() {
                tracing::error!("playback thread panicked");
            }
        }
    }

    fn run(&self, request: &PlaybackRequest, halt: &AtomicBool) -> PlaybackOutcome {
        let target = self.devices.resolve(request.device.as_deref());

        if let Err(e) = self.play_cue(&target, request.volume, halt) {
            tracing::warn!(cue = %self.cue_path.display(), error = %e, "notification cue failed");
            self.audit.append(&format!("Cue error: {}", e));
        }
        if halt.load(Ordering::Relaxed) {
            return PlaybackOutcome::Stopped;
        }

        let mut clip = match Clip::decode(&request.file) {
            Ok(clip) => clip,
            Err(e) => return PlaybackOutcome::Failed(e.to_string()),
        };
        clip.scale(request.volume.get());
        if halt.load(Ordering::Relaxed) {
            return PlaybackOutcome::Stopped;
        }

        match self.backend.stream(&target, clip, halt) {
            Ok(StreamEnd::Completed) => PlaybackOutcome::Played {
                device: target.to_string(),
            },
            Ok(StreamEnd::Halted) => PlaybackOutcome::Stopped,
            Err(e) => PlaybackOutcome::Failed(e.to_string()),
        }
    }

    fn play_cue(&self, target: &DeviceTarget, volume: Volume, halt: &AtomicBool) -> Result<()> {
        let mut cue = Clip::decode(&self.cue_path)?;
        cue.scale(volume.get());
        self.backend.stream(target, cue, halt).map(|_| ())
    }

    /// Take the output for request `id`, halting whoever held it.
    fn claim(&self, id: u64) -> Arc<HaltSignal> {
        let signal = Arc::new(HaltSignal::default());
        let previous = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(ActiveStream {
                id,
                signal: signal.clone(),
            });
        if let Some(previous) = previous {
            tracing::info!(superseded = previous.id, by = id, "new playback supersedes active stream");
            previous.signal.halt.store(true, Ordering::Relaxed);
        }
        signal
    }

    fn release(&self, id: u64) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.as_ref().is_some_and(|s| s.id == id) {
            *active = None;
        }
    }
}
