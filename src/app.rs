//! AudioScheduler: the control surface over the schedule, the device
//! selection, the playback engine and the tick loop.
//!
//! The CLI and the integration tests drive the scheduler only through these
//! methods, so validation lives in one place.

use crate::audit::AuditLog;
use crate::backend::{AudioBackend, OutputDevice, RodioBackend};
use crate::clock::{Clock, SystemClock};
use crate::config::{AppConfig, Settings};
use crate::error::{Error, Result};
use crate::playback::{PlaybackEngine, PlaybackRequest, PlaybackTask, Volume};
use crate::schedule::{Schedule, ScheduleEntry, ScheduleStore, TimeOfDay};
use crate::scheduler::{Job, JobHandler, JobScheduler, SchedulerHandle};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// What `test_play` should play.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaySource {
    File(PathBuf),
    /// The file scheduled at this time.
    Entry(TimeOfDay),
}

/// Output preferences read by every new playback request.
struct OutputPrefs {
    volume: RwLock<Volume>,
    device: RwLock<Option<String>>,
}

impl OutputPrefs {
    fn request(&self, file: PathBuf) -> PlaybackRequest {
        PlaybackRequest {
            file,
            volume: *self.volume.read().unwrap_or_else(PoisonError::into_inner),
            device: self.device.read().unwrap_or_else(PoisonError::into_inner).clone(),
        }
    }
}

/// Turns due jobs into playback threads.
struct Dispatcher {
    engine: Arc<PlaybackEngine>,
    prefs: Arc<OutputPrefs>,
}

impl JobHandler for Dispatcher {
    fn fire(&self, job: &Job) {
        let request = self.prefs.request(job.file.clone());
        if let Err(e) = self.engine.spawn(request) {
            tracing::error!(time = %job.time, error = %e, "cannot dispatch scheduled playback");
        }
    }
}

pub struct AudioScheduler {
    config: AppConfig,
    store: ScheduleStore,
    schedule: Mutex<Schedule>,
    settings_lock: Mutex<()>,
    prefs: Arc<OutputPrefs>,
    engine: Arc<PlaybackEngine>,
    scheduler: Arc<JobScheduler>,
    ticker: Mutex<Option<SchedulerHandle>>,
}

impl AudioScheduler {
    /// Open the scheduler on the real sound card and the local clock.
    pub fn open(config: AppConfig) -> Self {
        Self::with_parts(config, Arc::new(RodioBackend), Arc::new(SystemClock))
    }

    /// Build from explicit parts. Loads the persisted schedule and device
    /// selection and registers one job per entry; the tick loop is not
    /// started until [`start`](Self::start).
    pub fn with_parts(config: AppConfig, backend: Arc<dyn AudioBackend>, clock: Arc<dyn Clock>) -> Self {
        let store = ScheduleStore::new(config.schedule_path());
        let schedule = store.load();
        let settings = Settings::load(&config.settings_path());

        let prefs = Arc::new(OutputPrefs {
            volume: RwLock::new(config.volume),
            device: RwLock::new(settings.selected_device),
        });
        let audit = AuditLog::new(config.log_path());
        let engine = Arc::new(PlaybackEngine::new(backend, audit, config.cue_path.clone()));
        let dispatcher = Dispatcher {
            engine: engine.clone(),
            prefs: prefs.clone(),
        };
        let scheduler = Arc::new(JobScheduler::new(Arc::new(dispatcher), clock, config.tick_period));
        scheduler.register_all(&schedule);

        tracing::info!(
            data_dir = %config.data_dir.display(),
            entries = schedule.len(),
            "audio scheduler opened"
        );

        AudioScheduler {
            config,
            store,
            schedule: Mutex::new(schedule),
            settings_lock: Mutex::new(()),
            prefs,
            engine,
            scheduler,
            ticker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    // ── Schedule ────────────────────────────────────────────────────────────

    /// Schedule `file` daily at `time` ("HH:MM"), replacing any file already
    /// at that time. Returns the replaced file.
    pub fn add(&self, time: &str, file: impl AsRef<Path>) -> Result<Option<PathBuf>> {
        let time: TimeOfDay = time.parse()?;
        self.insert(time, file.as_ref())
    }

    /// Like [`add`](Self::add) with hour and minute entered separately.
    pub fn add_parts(&self, hour: &str, minute: &str, file: impl AsRef<Path>) -> Result<Option<PathBuf>> {
        let time = TimeOfDay::from_parts(hour, minute)?;
        self.insert(time, file.as_ref())
    }

    /// Remove the entry at `time`. Removing an absent time is a no-op.
    pub fn remove(&self, time: &str) -> Result<Option<PathBuf>> {
        let time: TimeOfDay = time.parse()?;
        let removed = self.mutate(|schedule| Ok(schedule.remove(time)))?;
        if removed.is_some() {
            tracing::info!(%time, "schedule entry removed");
        }
        Ok(removed)
    }

    /// Entries in chronological order.
    pub fn list(&self) -> Vec<ScheduleEntry> {
        self.lock_schedule().list()
    }

    /// Number of registered daily jobs.
    pub fn job_count(&self) -> usize {
        self.scheduler.job_count()
    }

    fn insert(&self, time: TimeOfDay, file: &Path) -> Result<Option<PathBuf>> {
        let previous = self.mutate(|schedule| schedule.upsert(time, file))?;
        match &previous {
            Some(old) => tracing::info!(%time, file = %file.display(), replaced = %old.display(), "schedule entry replaced"),
            None => tracing::info!(%time, file = %file.display(), "schedule entry added"),
        }
        Ok(previous)
    }

    /// Apply `change` to a copy of the schedule, persist the copy, then commit
    /// it and re-register the jobs, all under the schedule lock. Memory is
    /// left untouched when the change or the save fails.
    fn mutate<T>(&self, change: impl FnOnce(&mut Schedule) -> Result<T>) -> Result<T> {
        let mut schedule = self.lock_schedule();
        let mut next = schedule.clone();
        let value = change(&mut next)?;
        if next != *schedule {
            self.store.save(&next)?;
            *schedule = next;
            self.scheduler.register_all(&schedule);
        }
        Ok(value)
    }

    fn lock_schedule(&self) -> std::sync::MutexGuard<'_, Schedule> {
        self.schedule.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Playback ────────────────────────────────────────────────────────────

    /// Play a file, or the file scheduled at a time, right now on a new
    /// thread. The file must exist.
    pub fn test_play(&self, source: PlaySource) -> Result<PlaybackTask> {
        let file = match source {
            PlaySource::File(file) => file,
            PlaySource::Entry(time) => self
                .lock_schedule()
                .get(time)
                .map(Path::to_path_buf)
                .ok_or_else(|| Error::NoEntry(time.to_string()))?,
        };
        if !file.is_file() {
            return Err(Error::FileNotFound(file));
        }
        tracing::info!(file = %file.display(), "test play");
        self.engine.spawn(self.prefs.request(file))
    }

    /// Halt whatever is playing. Returns whether anything was.
    pub fn stop(&self) -> bool {
        self.engine.stop()
    }

    pub fn is_playing(&self) -> bool {
        self.engine.is_playing()
    }

    // ── Output ──────────────────────────────────────────────────────────────

    /// Output-capable devices, queried live.
    pub fn devices(&self) -> Result<Vec<OutputDevice>> {
        self.engine.devices().enumerate()
    }

    pub fn selected_device(&self) -> Option<String> {
        self.prefs.device.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Select the output device by name, or the system default with `None`.
    /// The name is not checked against the current devices; a stale name
    /// falls back to the default at playback time. Persisted on change; the
    /// selection is only switched once the save succeeded.
    pub fn set_device(&self, name: Option<String>) -> Result<()> {
        let name = name.filter(|n| !n.is_empty());
        let _guard = self.settings_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.selected_device() == name {
            return Ok(());
        }
        let settings = Settings {
            selected_device: name.clone(),
        };
        settings.save(&self.config.settings_path())?;
        *self.prefs.device.write().unwrap_or_else(PoisonError::into_inner) = name.clone();
        tracing::info!(device = name.as_deref().unwrap_or("system default"), "output device selected");
        Ok(())
    }

    /// Set the volume for future playbacks. Clamped to [0, 1]; NaN is rejected.
    pub fn set_volume(&self, value: f32) -> Result<Volume> {
        let volume = Volume::new(value)?;
        *self.prefs.volume.write().unwrap_or_else(PoisonError::into_inner) = volume;
        tracing::debug!(%volume, "volume set");
        Ok(volume)
    }

    pub fn volume(&self) -> Volume {
        *self.prefs.volume.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn save_settings(&self) -> Result<()> {
        let _guard = self.settings_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let settings = Settings {
            selected_device: self.selected_device(),
        };
        settings.save(&self.config.settings_path())
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Start the tick loop. Calling it again while running does nothing.
    pub fn start(&self) -> Result<()> {
        let mut ticker = self.ticker.lock().unwrap_or_else(PoisonError::into_inner);
        if ticker.as_ref().is_some_and(SchedulerHandle::is_running) {
            return Ok(());
        }
        *ticker = Some(self.scheduler.spawn()?);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(SchedulerHandle::is_running)
    }

    /// Stop the tick loop, halt and join playback, then persist the device
    /// selection.
    pub fn shutdown(&self) -> Result<()> {
        if let Some(mut ticker) = self.ticker.lock().unwrap_or_else(PoisonError::into_inner).take() {
            ticker.stop();
        }
        self.engine.shutdown();
        self.save_settings()?;
        tracing::info!("audio scheduler shut down");
        Ok(())
    }

    pub fn audit(&self) -> &AuditLog {
        self.engine.audit()
    }

    pub fn scheduler(&self) -> &Arc<JobScheduler> {
        &self.scheduler
    }
}
