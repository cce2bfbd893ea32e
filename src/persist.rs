//! JSON file helpers shared by the schedule and settings stores.

use crate::error::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Load JSON from a file, returning the default value when the file is
/// missing, unreadable or malformed.
///
/// A file that exists but cannot be read or parsed (including one that is not
/// valid UTF-8) is renamed to `<name>.corrupt`, so the next save does not
/// overwrite the only copy of the user's data.
pub(crate) fn load_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return T::default(),
        Err(e) => {
            set_aside(path, "unreadable state file, starting empty", &e);
            return T::default();
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(e) => {
            set_aside(path, "corrupt state file, starting empty", &e);
            T::default()
        }
    }
}

fn set_aside(path: &Path, what: &str, error: &dyn std::fmt::Display) {
    let aside = sibling(path, ".corrupt");
    tracing::warn!(
        path = %path.display(),
        moved_to = %aside.display(),
        error = %error,
        "{}",
        what
    );
    if let Err(e) = fs::rename(path, &aside) {
        tracing::error!(path = %path.display(), error = %e, "could not move state file aside");
    }
}

/// Serialize `value` and replace `path` with it atomically: the JSON is
/// written and synced to a sibling temporary file which is then renamed over
/// the target.
pub(crate) fn save_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    let tmp = sibling(path, ".tmp");
    let written = fs::File::create(&tmp).and_then(|mut file| {
        file.write_all(json.as_bytes())?;
        file.sync_all()
    });
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(Error::io(&tmp, e));
    }

    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        Error::io(path, e)
    })
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("state"));
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    type Map = BTreeMap<String, String>;

    #[test]
    fn missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Map = load_json_or_default(&dir.path().join("nope.json"));
        assert!(loaded.is_empty());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let mut map = Map::new();
        map.insert("k".into(), "v".into());

        save_json_atomic(&path, &map).unwrap();
        let loaded: Map = load_json_or_default(&path);
        assert_eq!(loaded, map);
        assert!(!dir.path().join("nested").join("state.json.tmp").exists());
    }

    #[test]
    fn corrupt_file_is_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "not valid json{{{").unwrap();

        let loaded: Map = load_json_or_default(&path);
        assert!(loaded.is_empty());
        assert!(!path.exists());
        let aside = dir.path().join("state.json.corrupt");
        assert_eq!(fs::read_to_string(aside).unwrap(), "not valid json{{{");
    }

    #[test]
    fn non_utf8_file_is_moved_aside_and_survives_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schedule.json");
        let latin1: &[u8] = b"{\"07:00\": \"caf\xe9.wav\"}";
        fs::write(&path, latin1).unwrap();

        let loaded: Map = load_json_or_default(&path);
        assert!(loaded.is_empty());
        let aside = dir.path().join("schedule.json.corrupt");
        assert_eq!(fs::read(&aside).unwrap(), latin1);

        let mut map = Map::new();
        map.insert("08:00".into(), "b.wav".into());
        save_json_atomic(&path, &map).unwrap();
        assert_eq!(fs::read(&aside).unwrap(), latin1);
        assert_eq!(load_json_or_default::<Map>(&path), map);
    }

    #[test]
    fn unreadable_file_is_moved_aside_before_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        // A directory in place of the file fails to read with something other than NotFound.
        fs::create_dir(&path).unwrap();
        fs::write(path.join("keep.txt"), "user data").unwrap();

        let loaded: Map = load_json_or_default(&path);
        assert!(loaded.is_empty());
        let aside = dir.path().join("state.json.corrupt");
        assert_eq!(fs::read_to_string(aside.join("keep.txt")).unwrap(), "user data");

        save_json_atomic(&path, &Map::new()).unwrap();
        assert!(aside.join("keep.txt").exists());
    }

    #[test]
    fn save_replaces_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{\"old\": \"value\"}").unwrap();

        let mut map = Map::new();
        map.insert("new".into(), "value".into());
        save_json_atomic(&path, &map).unwrap();

        let loaded: Map = load_json_or_default(&path);
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains_key("new"));
    }
}
