use chrono::Local;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub message: String,
}

/// Append-only record of playback outcomes, one `"<timestamp> - <message>"`
/// line per event. Lines are never rewritten or removed.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        AuditLog {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `message` stamped with the current local time.
    ///
    /// Failures to write are reported through tracing only. Line breaks in `message` are escaped so
    /// each entry stays on one line.
    pub fn append(&self, message: &str) {
        let message = message.replace('\r', "\\r").replace('\n', "\\n");
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string();
        tracing::info!(target: "audio_scheduler::audit", "{}", message);

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            let _ = fs::create_dir_all(parent);
        }
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| writeln!(file, "{} - {}", timestamp, message));
        if let Err(e) = written {
            tracing::error!(path = %self.path.display(), error = %e, "cannot write audit log");
        }
    }

    /// Every entry in file order. A missing file reads as empty.
    pub fn entries(&self) -> Vec<LogEntry> {
        let content = fs::read_to_string(&self.path).unwrap_or_default();
        content.lines().filter_map(parse_line).collect()
    }

    /// The last `n` entries.
    pub fn tail(&self, n: usize) -> Vec<LogEntry> {
        let mut entries = self.entries();
        let skip = entries.len().saturating_sub(n);
        entries.drain(..skip);
        entries
    }
}

fn parse_line(line: &str) -> Option<LogEntry> {
    let (timestamp, message) = line.split_once(" - ")?;
    Some(LogEntry {
        timestamp: timestamp.to_string(),
        message: message.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn temp_log() -> (AuditLog, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("logs").join("log.txt"));
        (log, dir)
    }

    #[test]
    fn append_writes_timestamped_lines() {
        let (log, _dir) = temp_log();
        log.append("Played: a.wav on Speakers");
        log.append("Error: boom");

        let content = fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" - Played: a.wav on Speakers"));

        let entries = log.entries();
        assert_eq!(entries[1].message, "Error: boom");
        assert!(
            NaiveDateTime::parse_from_str(&entries[0].timestamp, "%Y-%m-%d %H:%M:%S%.6f").is_ok(),
            "unexpected timestamp {}",
            entries[0].timestamp
        );
    }

    #[test]
    fn append_never_rewrites_existing_lines() {
        let (log, _dir) = temp_log();
        log.append("first");
        let before = fs::read_to_string(log.path()).unwrap();
        log.append("second");
        let after = fs::read_to_string(log.path()).unwrap();
        assert!(after.starts_with(&before));
    }

    #[test]
    fn messages_may_contain_separator() {
        let (log, _dir) = temp_log();
        log.append("Played: Artist - Song.mp3 on Speakers");
        assert_eq!(log.entries()[0].message, "Played: Artist - Song.mp3 on Speakers");
    }

    #[test]
    fn line_breaks_are_escaped() {
        let (log, _dir) = temp_log();
        log.append("Error: cannot open\n/music/a.wav\r\nretry");
        log.append("next");

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "Error: cannot open\\n/music/a.wav\\r\\nretry");
        assert_eq!(entries[1].message, "next");
    }

    #[test]
    fn tail_returns_most_recent() {
        let (log, _dir) = temp_log();
        for i in 0..5 {
            log.append(&format!("event {}", i));
        }
        let tail: Vec<String> = log.tail(2).into_iter().map(|e| e.message).collect();
        assert_eq!(tail, vec!["event 3", "event 4"]);
        assert_eq!(log.tail(50).len(), 5);
    }

    #[test]
    fn missing_file_reads_empty() {
        let (log, _dir) = temp_log();
        assert!(log.entries().is_empty());
    }

    #[test]
    fn clones_share_the_file() {
        let (log, _dir) = temp_log();
        let other = log.clone();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let log = other.clone();
                std::thread::spawn(move || log.append(&format!("thread {}", i)))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(log.entries().len(), 4);
    }
}
