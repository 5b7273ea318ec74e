//! Durable local preferences: the id of the last opened project.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Storage for the single "last opened project" value.
///
/// Callers inside the session treat every error as "nothing stored".
pub trait PreferenceStore: Send + Sync {
    fn get_project_id(&self) -> Result<Option<String>>;
    fn set_project_id(&self, id: Option<&str>) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrefsFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    project_id: Option<String>,
    /// Keys written by other tools are carried through untouched.
    #[serde(flatten)]
    other: serde_json::Map<String, serde_json::Value>,
}

/// Stores preferences as a JSON file.
pub struct FilePreferences {
    path: PathBuf,
}

impl FilePreferences {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// `<data_dir>/preferences.json`
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join("preferences.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(&self) -> Result<PrefsFile> {
        if !self.path.exists() {
            return Ok(PrefsFile::default());
        }
        let data = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&data)?)
    }

    fn write_file(&self, file: &PrefsFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(file)?;
        // Atomic replace.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl PreferenceStore for FilePreferences {
    fn get_project_id(&self) -> Result<Option<String>> {
        Ok(self.read_file()?.project_id.filter(|id| !id.is_empty()))
    }

    fn set_project_id(&self, id: Option<&str>) -> Result<()> {
        // Unreadable file: start over.
        let mut file = self.read_file().unwrap_or_default();
        file.project_id = id.map(str::to_string);
        self.write_file(&file)
    }
}

/// In-memory preferences with switchable failure, for tests.
#[derive(Default)]
pub struct MemoryPreferences {
    project_id: Mutex<Option<String>>,
    failing: AtomicBool,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_project_id(id: &str) -> Self {
        Self {
            project_id: Mutex::new(Some(id.to_string())),
            failing: AtomicBool::new(false),
        }
    }

    /// Make every read and write fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Stored value, bypassing failure injection.
    pub fn stored(&self) -> Option<String> {
        self.project_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::message("preference storage unavailable"));
        }
        Ok(())
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get_project_id(&self) -> Result<Option<String>> {
        self.check()?;
        Ok(self.stored())
    }

    fn set_project_id(&self, id: Option<&str>) -> Result<()> {
        self.check()?;
        *self.project_id.lock().unwrap_or_else(|e| e.into_inner()) = id.map(str::to_string);
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_prefs_roundtrip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = FilePreferences::in_dir(&dir.path().join("nested"));

        assert_eq!(prefs.get_project_id().unwrap(), None);
        prefs.set_project_id(Some("p1")).unwrap();
        assert_eq!(prefs.get_project_id().unwrap().as_deref(), Some("p1"));

        // New instance reads from disk
        let reopened = FilePreferences::new(prefs.path().to_path_buf());
        assert_eq!(reopened.get_project_id().unwrap().as_deref(), Some("p1"));

        prefs.set_project_id(None).unwrap();
        assert_eq!(reopened.get_project_id().unwrap(), None);
    }

    #[test]
    fn file_prefs_keep_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");
        fs::write(&path, r#"{"theme":"dark","projectId":"old"}"#).unwrap();

        let prefs = FilePreferences::new(path.clone());
        prefs.set_project_id(Some("new")).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["theme"], "dark");
        assert_eq!(raw["projectId"], "new");
    }

    #[test]
    fn corrupt_file_reads_as_error_and_is_replaced_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");
        fs::write(&path, "{not json").unwrap();

        let prefs = FilePreferences::new(path);
        assert!(prefs.get_project_id().is_err());
        prefs.set_project_id(Some("p2")).unwrap();
        assert_eq!(prefs.get_project_id().unwrap().as_deref(), Some("p2"));
    }

    #[test]
    fn memory_prefs_failure_switch() {
        let prefs = MemoryPreferences::with_project_id("p1");
        prefs.set_failing(true);
        assert!(prefs.get_project_id().is_err());
        assert!(prefs.set_project_id(None).is_err());
        assert_eq!(prefs.stored().as_deref(), Some("p1"));
    }
}
