//! Key/value settings stores the device registry persists into.
//!
//! Values are opaque strings. A write replaces the whole value of one key;
//! readers never see a partially written value.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Mutex;

use log::{debug, warn};
use serde_json::Value;

use crate::error::{Error, Result};

/// Directory name under the user's config dir.
pub const APP_DIR_NAME: &str = "keylight-control";
/// File name of the default settings file.
pub const SETTINGS_FILE_NAME: &str = "settings.json";

pub trait SettingsStore: Send + Sync {
    /// `None` when the key was never written.
    fn get_string(&self, key: &str) -> Result<Option<String>>;

    fn set_string(&self, key: &str, value: &str) -> Result<()>;
}

/// In-memory store, for tests and for embedding the registry in a process
/// that persists elsewhere.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn with_value(key: &str, value: &str) -> Self {
        let store = MemoryStore::new();
        store.lock().insert(key.to_string(), value.to_string());
        store
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        match self.values.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl SettingsStore for MemoryStore {
    fn get_string(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock().get(key).cloned())
    }

    fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

impl<T: SettingsStore + ?Sized> SettingsStore for std::sync::Arc<T> {
    fn get_string(&self, key: &str) -> Result<Option<String>> {
        (**self).get_string(key)
    }

    fn set_string(&self, key: &str, value: &str) -> Result<()> {
        (**self).set_string(key, value)
    }
}

/// Settings kept as one JSON object (`{"key": "value", ...}`) in a file.
///
/// Every write goes to a temp file next to the target, is synced and then
/// renamed over it.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileStore {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// `<config dir>/keylight-control/settings.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join(SETTINGS_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A file that is not a JSON object reads as empty; the next write
    /// replaces it. Non-string values are handed out as their JSON text.
    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(self.error(format!("failed to read: {}", e))),
        };
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        let object = match serde_json::from_str::<Value>(&contents) {
            Ok(Value::Object(object)) => object,
            Ok(other) => {
                warn!(
                    "{}: expected a JSON object, found {}, treating as empty",
                    self.path.display(),
                    json_kind(&other)
                );
                return Ok(BTreeMap::new());
            }
            Err(e) => {
                warn!(
                    "{}: not a settings file ({}), treating as empty",
                    self.path.display(),
                    e
                );
                return Ok(BTreeMap::new());
            }
        };

        Ok(object
            .into_iter()
            .map(|(key, value)| match value {
                Value::String(text) => (key, text),
                other => (key, other.to_string()),
            })
            .collect())
    }

    fn write_all(&self, values: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| self.error(format!("failed to create directory: {}", e)))?;
            }
        }

        let serialized = serde_json::to_string_pretty(values)
            .map_err(|e| self.error(format!("failed to serialize: {}", e)))?;
        let temp_path = self
            .path
            .with_extension(format!("json.{}.tmp", process::id()));

        let written = File::create(&temp_path).and_then(|mut file| {
            file.write_all(serialized.as_bytes())?;
            file.sync_all()
        });
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(self.error(format!("failed to write temp file: {}", e)));
        }

        fs::rename(&temp_path, &self.path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            self.error(format!("failed to replace settings file: {}", e))
        })?;
        debug!("Wrote settings to {}", self.path.display());
        Ok(())
    }

    fn error(&self, message: String) -> Error {
        Error::Settings {
            path: self.path.display().to_string(),
            message,
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl SettingsStore for FileStore {
    fn get_string(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_all()?.remove(key))
    }

    fn set_string(&self, key: &str, value: &str) -> Result<()> {
        let _guard = match self.write_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut values = self.read_all()?;
        values.insert(key.to_string(), value.to_string());
        self.write_all(&values)
    }
}
