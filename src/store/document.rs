use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use super::StoreError;

/// A JSON document holding a map of key -> record.
///
/// `snapshot` reads are lock-free: the atomic-replace write discipline
/// guarantees any read sees a complete document. Mutations take an exclusive
/// flock on `<path>.flock` around the whole load/modify/replace cycle.
pub struct DocumentStore<T> {
    path: PathBuf,
    _marker: PhantomData<T>,
}

impl<T: Serialize + DeserializeOwned> DocumentStore<T> {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the full document. A missing file is an empty store.
    pub fn snapshot(&self) -> Result<BTreeMap<String, T>, StoreError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    /// Load, apply `f`, and atomically replace the document.
    ///
    /// The document is rewritten only when `f` succeeds. Errors from `f`
    /// leave the file untouched.
    pub fn mutate<R>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, T>) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let _guard = self.acquire_flock()?;
        let mut map = self.snapshot()?;
        let result = f(&mut map)?;
        self.replace(&map)?;
        Ok(result)
    }

    /// Atomically replace the document: write a temp file in the same
    /// directory, then rename over the target.
    fn replace(&self, map: &BTreeMap<String, T>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(map)?;
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn acquire_flock(&self) -> Result<FlockGuard, StoreError> {
        let lock_path = self.path.with_extension("json.flock");
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        file.lock_exclusive()?;
        Ok(FlockGuard { file })
    }
}

/// Releases the flock on drop (closing the descriptor drops the lock).
struct FlockGuard {
    file: std::fs::File,
}

impl Drop for FlockGuard {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}
