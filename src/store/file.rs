//! File-backed state store.

use super::StateStore;
use crate::error::{MonitorError, Result};
use crate::record::{ObservationState, Record};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const SLOT_VERSION: u32 = 1;

/// On-disk envelope around the observation state.
#[derive(Serialize, Deserialize)]
struct Slot {
    version: u32,
    #[serde(flatten)]
    state: ObservationState,
}

/// State store persisting to a single JSON file.
///
/// Writes go to a sibling temporary file which is synced and then renamed
/// over the slot, so a crash leaves either the old or the new state on disk.
///
/// A file that holds a bare record instead of the versioned envelope is
/// accepted as a record with an unknown change time.
///
/// # Examples
///
/// ```rust,no_run
/// use pollwatch::store::{FileStateStore, StateStore};
///
/// let store = FileStateStore::new("./lastKnownData.json");
/// let previous = store.load().ok().flatten();
/// ```
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    /// Create a store for the slot at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the slot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn decode(&self, contents: &str) -> Result<Option<ObservationState>> {
        let value: Value = serde_json::from_str(contents).map_err(|e| {
            MonitorError::Persistence(format!(
                "corrupt state file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let is_envelope = matches!(
            &value,
            Value::Object(map)
                if map.get("version").is_some_and(Value::is_u64) && map.contains_key("lastRecord")
        );

        match value {
            Value::Null => Ok(None),
            Value::Object(_) if is_envelope => {
                let slot: Slot = serde_json::from_value(value).map_err(|e| {
                    MonitorError::Persistence(format!(
                        "corrupt state file {}: {}",
                        self.path.display(),
                        e
                    ))
                })?;
                if slot.version > SLOT_VERSION {
                    return Err(MonitorError::Persistence(format!(
                        "state file {} has unsupported version {}",
                        self.path.display(),
                        slot.version
                    )));
                }
                Ok(Some(slot.state))
            }
            Value::Object(map) => Ok(Some(ObservationState::with_record(Record::from(map)))),
            _ => Err(MonitorError::Persistence(format!(
                "state file {} does not hold a JSON object",
                self.path.display()
            ))),
        }
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<Option<ObservationState>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(MonitorError::Persistence(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        if contents.trim().is_empty() {
            return Ok(None);
        }
        self.decode(&contents)
    }

    fn save(&self, state: &ObservationState) -> Result<()> {
        let slot = Slot {
            version: SLOT_VERSION,
            state: state.clone(),
        };
        let bytes = serde_json::to_vec(&slot)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    MonitorError::Persistence(format!(
                        "failed to create {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let temp = self.temp_path();
        let write = || -> std::io::Result<()> {
            let mut file = File::create(&temp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&temp, &self.path)
        };

        write().map_err(|e| {
            let _ = fs::remove_file(&temp);
            MonitorError::Persistence(format!("failed to write {}: {}", self.path.display(), e))
        })
    }

    fn name(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStateStore::new(temp_dir.path().join("state.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStateStore::new(temp_dir.path().join("state.json"));

        let state = ObservationState {
            last_record: Some(Record::new().with_field("temp", 21.5)),
            last_change_time: Some(Utc::now()),
        };
        store.save(&state).unwrap();

        assert_eq!(store.load().unwrap(), Some(state));
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn test_overwrite_keeps_single_slot() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStateStore::new(temp_dir.path().join("state.json"));

        store
            .save(&ObservationState::with_record(Record::new().with_field("v", 1)))
            .unwrap();
        store
            .save(&ObservationState::with_record(Record::new().with_field("v", 2)))
            .unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.last_record.unwrap().get("v"), Some(&json!(2)));
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStateStore::new(temp_dir.path().join("nested/dir/state.json"));
        store.save(&ObservationState::default()).unwrap();
        assert!(store.path().exists());
    }

    #[test]
    fn test_bare_record_file_is_accepted() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("lastKnownData.json");
        fs::write(&path, r#"{"time":"2024-01-01T00:00:00Z","temp":19.0}"#).unwrap();

        let loaded = FileStateStore::new(&path).load().unwrap().unwrap();
        let record = loaded.last_record.unwrap();
        assert_eq!(record.get("temp"), Some(&json!(19.0)));
        assert!(loaded.last_change_time.is_none());
    }

    #[test]
    fn test_record_with_envelope_like_fields_stays_a_record() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("lastKnownData.json");
        fs::write(&path, r#"{"version":"2.1.0","lastRecord":"boot","uptime":42}"#).unwrap();

        let loaded = FileStateStore::new(&path).load().unwrap().unwrap();
        let record = loaded.last_record.unwrap();
        assert_eq!(record.get("version"), Some(&json!("2.1.0")));
        assert_eq!(record.get("lastRecord"), Some(&json!("boot")));
        assert_eq!(record.len(), 3);
        assert!(loaded.last_change_time.is_none());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();

        let result = FileStateStore::new(&path).load();
        assert!(matches!(result, Err(MonitorError::Persistence(_))));
    }

    #[test]
    fn test_null_and_empty_files_are_empty() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.json");

        fs::write(&path, "null").unwrap();
        assert!(FileStateStore::new(&path).load().unwrap().is_none());

        fs::write(&path, "  \n").unwrap();
        assert!(FileStateStore::new(&path).load().unwrap().is_none());
    }

    #[test]
    fn test_save_into_unwritable_location_fails() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, "file, not a directory").unwrap();

        let store = FileStateStore::new(blocker.join("state.json"));
        let result = store.save(&ObservationState::default());
        assert!(matches!(result, Err(MonitorError::Persistence(_))));
    }
}
