use crate::error::{Error, Result};
use crate::persist;
use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// A time of day at minute resolution, always rendered as zero-padded "HH:MM".
///
/// Ordering is chronological, which matches the lexicographic order of the
/// rendered keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    /// Build from numeric parts. Returns `None` when out of range.
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(TimeOfDay {
            hour: hour as u8,
            minute: minute as u8,
        })
    }

    /// Validate hour and minute entered as separate strings, e.g. `"7"` and `"5"`.
    ///
    /// Both parts must be non-empty and ASCII digits only.
    pub fn from_parts(hour: &str, minute: &str) -> Result<Self> {
        if hour.is_empty() || minute.is_empty() {
            return Err(Error::EmptyTime);
        }
        let raw = format!("{}:{}", hour, minute);
        let digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
        if !digits(hour) || !digits(minute) {
            return Err(Error::InvalidTime(raw));
        }
        // Digit strings too long for u32 are out of range as well.
        let h = hour.parse::<u32>().ok();
        let m = minute.parse::<u32>().ok();
        h.zip(m)
            .and_then(|(h, m)| TimeOfDay::new(h, m))
            .ok_or(Error::TimeOutOfRange(raw))
    }

    /// The minute of the day that `time` falls in.
    pub fn of(time: &NaiveTime) -> Self {
        TimeOfDay {
            hour: time.hour() as u8,
            minute: time.minute() as u8,
        }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = Error;

    /// Parse "HH:MM". Unpadded parts such as "7:05" are accepted.
    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::EmptyTime);
        }
        let (hour, minute) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidTime(s.to_string()))?;
        TimeOfDay::from_parts(hour, minute)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(t: TimeOfDay) -> String {
        t.to_string()
    }
}

/// One row of the schedule as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub time: TimeOfDay,
    pub file: PathBuf,
}

impl ScheduleEntry {
    /// File name without directories, falling back to the full path.
    pub fn file_name(&self) -> String {
        self.file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.file.display().to_string())
    }
}

impl fmt::Display for ScheduleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.time, self.file_name())
    }
}

/// The time→file mapping. At most one file per time of day.
///
/// Persisted as a flat JSON object: `{"07:00": "/music/wake.mp3"}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schedule {
    entries: BTreeMap<TimeOfDay, PathBuf>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the file at `time`. Returns the file it replaced.
    pub fn upsert(&mut self, time: TimeOfDay, file: impl Into<PathBuf>) -> Result<Option<PathBuf>> {
        let file = file.into();
        if file.as_os_str().is_empty() {
            return Err(Error::EmptyPath);
        }
        Ok(self.entries.insert(time, file))
    }

    /// Remove the entry at `time`; absent keys are a no-op.
    pub fn remove(&mut self, time: TimeOfDay) -> Option<PathBuf> {
        self.entries.remove(&time)
    }

    pub fn get(&self, time: TimeOfDay) -> Option<&Path> {
        self.entries.get(&time).map(PathBuf::as_path)
    }

    /// Entries in chronological order.
    pub fn list(&self) -> Vec<ScheduleEntry> {
        self.iter()
            .map(|(time, file)| ScheduleEntry {
                time,
                file: file.to_path_buf(),
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TimeOfDay, &Path)> {
        self.entries.iter().map(|(t, f)| (*t, f.as_path()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// File-backed persistence for the [`Schedule`].
#[derive(Debug, Clone)]
pub struct ScheduleStore {
    path: PathBuf,
}

impl ScheduleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ScheduleStore { path: path.into() }
    }

    /// Load the persisted schedule. Missing or malformed files yield an empty one.
    pub fn load(&self) -> Schedule {
        let schedule: Schedule = persist::load_json_or_default(&self.path);
        tracing::debug!(path = %self.path.display(), entries = schedule.len(), "schedule loaded");
        schedule
    }

    /// Replace the persisted schedule with `schedule`.
    pub fn save(&self, schedule: &Schedule) -> Result<()> {
        persist::save_json_atomic(&self.path, schedule)
    }
}
