//! Snapshot backends: a JSON file on disk and an in-memory slot.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{DoseError, Result};
use crate::store::{Snapshot, SnapshotBackend};

/// Single JSON document on disk, replaced atomically via temp file + rename.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sibling temp file, so the final rename stays on one filesystem.
    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "state.json".to_string());
        self.path.with_file_name(format!(".{name}.tmp"))
    }
}

impl SnapshotBackend for FileBackend {
    fn read(&self) -> Result<Option<Snapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path).map_err(|e| DoseError::storage(&self.path, e))?;
        let snapshot: Snapshot = serde_json::from_str(&content)?;
        Ok(Some(snapshot))
    }

    fn write(&self, snapshot: &Snapshot) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| DoseError::storage(parent, e))?;
        }

        let json = serde_json::to_string_pretty(snapshot)?;
        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).map_err(|e| DoseError::storage(&temp_path, e))?;
            file.write_all(json.as_bytes())
                .map_err(|e| DoseError::storage(&temp_path, e))?;
            file.sync_all().map_err(|e| DoseError::storage(&temp_path, e))?;
        }

        // Atomic on POSIX.
        fs::rename(&temp_path, &self.path).map_err(|e| DoseError::storage(&self.path, e))?;
        Ok(())
    }
}

/// Holds the serialized snapshot in memory. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    raw: Mutex<Option<String>>,
    fail_writes: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with arbitrary stored content, corrupt or not.
    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self {
            raw: Mutex::new(Some(raw.into())),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make subsequent writes fail with a storage error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl SnapshotBackend for MemoryBackend {
    fn read(&self) -> Result<Option<Snapshot>> {
        let raw = self.raw.lock().unwrap_or_else(|e| e.into_inner());
        match raw.as_deref() {
            None => Ok(None),
            Some(s) => Ok(Some(serde_json::from_str(s)?)),
        }
    }

    fn write(&self, snapshot: &Snapshot) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DoseError::storage(
                "<memory>",
                std::io::Error::other("simulated write failure"),
            ));
        }
        let json = serde_json::to_string(snapshot)?;
        *self.raw.lock().unwrap_or_else(|e| e.into_inner()) = Some(json);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Identity;
    use crate::store::DayRecord;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn sample() -> Snapshot {
        let mut snap = Snapshot {
            subscriber: Some(Identity(11)),
            ..Default::default()
        };
        let rec: DayRecord = [("evening".to_string(), true)].into_iter().collect();
        snap.history
            .insert(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), rec);
        snap
    }

    #[test]
    fn missing_file_reads_none() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::new(dir.path().join("state.json"));
        assert!(backend.read().unwrap().is_none());
    }

    #[test]
    fn write_then_read_file() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::new(dir.path().join("nested").join("state.json"));
        backend.write(&sample()).unwrap();

        assert_eq!(backend.read().unwrap(), Some(sample()));
        // No temp file left behind.
        assert!(!dir.path().join("nested").join(".state.json.tmp").exists());
    }

    #[test]
    fn corrupt_file_is_an_error_not_a_panic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{\"subscriber_id\": ").unwrap();
        let backend = FileBackend::new(&path);
        assert!(matches!(backend.read(), Err(DoseError::Serde { .. })));
        assert_eq!(crate::store::load(&backend), Snapshot::default());
    }

    #[test]
    fn reads_legacy_document_without_history() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{"subscriber_id": 77}"#).unwrap();
        let snap = FileBackend::new(&path).read().unwrap().unwrap();
        assert_eq!(snap.subscriber, Some(Identity(77)));
        assert!(snap.history.is_empty());
    }

    #[test]
    fn memory_backend_can_fail_writes() {
        let backend = MemoryBackend::new();
        backend.fail_writes(true);
        assert!(backend.write(&sample()).is_err());
        backend.fail_writes(false);
        backend.write(&sample()).unwrap();
        assert_eq!(backend.read().unwrap(), Some(sample()));
    }
}
