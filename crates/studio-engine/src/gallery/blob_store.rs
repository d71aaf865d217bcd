use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use studio_contracts::error::{StudioError, StudioResult};

/// Binary store keyed by generated ids.
pub trait BlobStore: Send + Sync {
    fn put(&self, id: &str, data: &[u8]) -> StudioResult<()>;
    fn get(&self, id: &str) -> StudioResult<Option<Vec<u8>>>;
    /// Returns whether a blob was actually removed.
    fn delete(&self, id: &str) -> StudioResult<bool>;
    fn estimate_size(&self) -> StudioResult<u64>;
}

/// One file per blob under a directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    dir: PathBuf,
}

impl FsBlobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> StudioResult<PathBuf> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
        if !valid {
            return Err(StudioError::Validation(format!("invalid blob id '{id}'")));
        }
        Ok(self.dir.join(format!("{id}.bin")))
    }
}

fn storage_error(action: &str, path: &Path, err: std::io::Error) -> StudioError {
    StudioError::Storage(format!("failed to {action} {}: {err}", path.display()))
}

impl BlobStore for FsBlobStore {
    fn put(&self, id: &str, data: &[u8]) -> StudioResult<()> {
        let path = self.path_for(id)?;
        fs::create_dir_all(&self.dir).map_err(|err| storage_error("create", &self.dir, err))?;
        fs::write(&path, data).map_err(|err| storage_error("write", &path, err))
    }

    fn get(&self, id: &str) -> StudioResult<Option<Vec<u8>>> {
        let path = self.path_for(id)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == IoErrorKind::NotFound => Ok(None),
            Err(err) => Err(storage_error("read", &path, err)),
        }
    }

    fn delete(&self, id: &str) -> StudioResult<bool> {
        let path = self.path_for(id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == IoErrorKind::NotFound => Ok(false),
            Err(err) => Err(storage_error("delete", &path, err)),
        }
    }

    fn estimate_size(&self) -> StudioResult<u64> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == IoErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(storage_error("list", &self.dir, err)),
        };
        Ok(entries
            .filter_map(Result::ok)
            .filter_map(|entry| entry.metadata().ok())
            .filter(|meta| meta.is_file())
            .map(|meta| meta.len())
            .sum())
    }
}

/// In-process store with an optional byte quota. Records every successful
/// deletion so callers can check that each blob is released once.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    deletions: Mutex<Vec<String>>,
    quota: Option<u64>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota: u64) -> Self {
        Self {
            quota: Some(quota),
            ..Self::default()
        }
    }

    pub fn deletions(&self) -> Vec<String> {
        self.deletions
            .lock()
            .map(|deletions| deletions.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|blobs| blobs.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn blobs(&self) -> StudioResult<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.blobs
            .lock()
            .map_err(|_| StudioError::Storage("blob store lock poisoned".to_string()))
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, id: &str, data: &[u8]) -> StudioResult<()> {
        let mut blobs = self.blobs()?;
        if let Some(quota) = self.quota {
            let used: u64 = blobs
                .iter()
                .filter(|(key, _)| key.as_str() != id)
                .map(|(_, bytes)| bytes.len() as u64)
                .sum();
            if used + data.len() as u64 > quota {
                return Err(StudioError::Storage(format!(
                    "quota exceeded ({} of {quota} bytes used)",
                    used
                )));
            }
        }
        blobs.insert(id.to_string(), data.to_vec());
        Ok(())
    }

    fn get(&self, id: &str) -> StudioResult<Option<Vec<u8>>> {
        Ok(self.blobs()?.get(id).cloned())
    }

    fn delete(&self, id: &str) -> StudioResult<bool> {
        let removed = self.blobs()?.remove(id).is_some();
        if removed {
            if let Ok(mut deletions) = self.deletions.lock() {
                deletions.push(id.to_string());
            }
        }
        Ok(removed)
    }

    fn estimate_size(&self) -> StudioResult<u64> {
        Ok(self.blobs()?.values().map(|bytes| bytes.len() as u64).sum())
    }
}
