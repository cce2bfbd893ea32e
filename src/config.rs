use crate::error::Result;
use crate::persist;
use crate::playback::Volume;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SCHEDULE_FILE: &str = "schedule.json";
pub const SETTINGS_FILE: &str = "config.json";
pub const LOG_FILE: &str = "log.txt";
pub const CUE_FILE: &str = "notification_sound.mp3";

/// Scheduler polling period.
pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Runtime configuration. Nothing here is persisted.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Directory holding the schedule, settings and audit log.
    pub data_dir: PathBuf,
    /// Notification cue played before every file.
    pub cue_path: PathBuf,
    /// Initial playback volume.
    pub volume: Volume,
    pub tick_period: Duration,
}

impl AppConfig {
    /// Defaults rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        AppConfig {
            cue_path: data_dir.join(CUE_FILE),
            data_dir,
            volume: Volume::default(),
            tick_period: TICK_PERIOD,
        }
    }

    /// `<platform data dir>/audio-scheduler`, or the working directory when
    /// the platform has none.
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .map(|d| d.join("audio-scheduler"))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn schedule_path(&self) -> PathBuf {
        self.data_dir.join(SCHEDULE_FILE)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join(SETTINGS_FILE)
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join(LOG_FILE)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new(Self::default_data_dir())
    }
}

/// Persisted user settings (`config.json`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Last chosen output device. May name a device that is no longer present.
    #[serde(default)]
    pub selected_device: Option<String>,
}

impl Settings {
    /// Load settings, tolerating a missing or malformed file.
    pub fn load(path: &Path) -> Self {
        persist::load_json_or_default(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        persist::save_json_atomic(path, self)
    }
}
