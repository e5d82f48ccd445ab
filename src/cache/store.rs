//! On-disk result cache.
//!
//! Each entry lives at `<root>/<key>.json`. Writes go to a temp file in
//! the same directory and are renamed into place, so a reader sees either
//! the previous entry or the complete new one. The temp file is removed
//! on every failure path when its guard drops.

use std::collections::HashMap;
use std::fs;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::key::CacheKey;
use crate::error::CacheError;
use crate::runner::InvocationResult;

/// Durable store of invocation results keyed by [`CacheKey`].
///
/// Writes to one key are serialized within the process; reads and writes
/// to distinct keys run concurrently.
#[derive(Debug)]
pub struct ResultCache {
    root: PathBuf,
    write_locks: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
}

impl ResultCache {
    /// Opens a cache rooted at `root`. The directory is created lazily.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the entry for `key`.
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{}.json", key.as_str()))
    }

    /// Returns the stored result for `key`, if any.
    pub fn lookup(&self, key: &CacheKey) -> Result<Option<InvocationResult>, CacheError> {
        let path = self.entry_path(key);
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(path, e)),
        };

        let result: InvocationResult = serde_json::from_slice(&content)
            .map_err(|source| CacheError::Corrupt {
                path: path.clone(),
                source,
            })?;

        if &result.key != key {
            warn!(
                path = %path.display(),
                stored = %result.key,
                "Cache entry key does not match its file name"
            );
            return Err(CacheError::KeyMismatch {
                expected: key.to_string(),
                actual: result.key.to_string(),
            });
        }

        debug!(key = %key.short(), "Cache hit");
        Ok(Some(result))
    }

    /// Stores `result` under `key`.
    ///
    /// Fails with [`CacheError::Conflict`] if an entry exists and `force` is
    /// not set. With `force`, the existing entry is replaced atomically.
    pub fn store(
        &self,
        key: &CacheKey,
        result: &InvocationResult,
        force: bool,
    ) -> Result<(), CacheError> {
        if &result.key != key {
            return Err(CacheError::KeyMismatch {
                expected: key.to_string(),
                actual: result.key.to_string(),
            });
        }

        let lock = self.key_lock(key);
        let outcome = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.write_entry(key, result, force)
        };
        drop(lock);
        self.release_key_lock(key);
        outcome
    }

    /// Removes the entry for `key`. Returns whether an entry existed.
    pub fn remove(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let path = self.entry_path(key);
        let lock = self.key_lock(key);
        let outcome = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            match fs::remove_file(&path) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
                Err(e) => Err(CacheError::io(path, e)),
            }
        };
        drop(lock);
        self.release_key_lock(key);
        outcome
    }

    fn write_entry(
        &self,
        key: &CacheKey,
        result: &InvocationResult,
        force: bool,
    ) -> Result<(), CacheError> {
        let path = self.entry_path(key);
        if !force && path.exists() {
            return Err(CacheError::Conflict {
                key: key.to_string(),
            });
        }

        fs::create_dir_all(&self.root).map_err(|e| CacheError::io(&self.root, e))?;

        let mut temp =
            NamedTempFile::new_in(&self.root).map_err(|e| CacheError::io(&self.root, e))?;
        let temp_path = temp.path().to_path_buf();
        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, result)?;
            writer.flush().map_err(|e| CacheError::io(&temp_path, e))?;
        }
        temp.as_file()
            .sync_all()
            .map_err(|e| CacheError::io(&temp_path, e))?;

        if force {
            temp.persist(&path)
                .map_err(|e| CacheError::io(&path, e.error))?;
        } else {
            // A concurrent process may have stored the key after the check above.
            temp.persist_noclobber(&path).map_err(|e| {
                if e.error.kind() == ErrorKind::AlreadyExists {
                    CacheError::Conflict {
                        key: key.to_string(),
                    }
                } else {
                    CacheError::io(&path, e.error)
                }
            })?;
        }

        debug!(key = %key.short(), path = %path.display(), force, "Stored cache entry");
        Ok(())
    }

    fn key_lock(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        let mut locks = self
            .write_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.entry(key.clone()).or_default().clone()
    }

    fn release_key_lock(&self, key: &CacheKey) {
        let mut locks = self
            .write_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigOptions;
    use crate::runner::InvocationStatus;
    use std::time::Duration;
    use tempfile::TempDir;

    fn sample(index: u64, payload: &str) -> (CacheKey, InvocationResult) {
        let config = ConfigOptions::new()
            .with_task("demo")
            .with_data_file("demo/data.json")
            .with_model("gpt-4o")
            .with_index(index)
            .resolve()
            .unwrap();
        let key = CacheKey::for_config(&config);
        let result = InvocationResult::new(
            &config,
            key.clone(),
            InvocationStatus::Success,
            payload,
            Duration::from_millis(100),
        );
        (key, result)
    }

    #[test]
    fn test_lookup_missing() {
        let dir = TempDir::new().unwrap();
        let cache = ResultCache::open(dir.path().join("cache"));
        let (key, _) = sample(0, "42");
        assert!(cache.lookup(&key).unwrap().is_none());
    }

    #[test]
    fn test_store_then_lookup() {
        let dir = TempDir::new().unwrap();
        let cache = ResultCache::open(dir.path().join("cache"));
        let (key, result) = sample(0, "42");

        cache.store(&key, &result, false).unwrap();
        let loaded = cache.lookup(&key).unwrap().expect("entry should exist");
        assert_eq!(loaded, result);
        assert_eq!(loaded.status, InvocationStatus::Success);
    }

    #[test]
    fn test_conflict_without_force() {
        let dir = TempDir::new().unwrap();
        let cache = ResultCache::open(dir.path());
        let (key, first) = sample(0, "42");
        let (_, second) = sample(0, "43");

        cache.store(&key, &first, false).unwrap();
        let err = cache.store(&key, &second, false).unwrap_err();
        assert!(matches!(err, CacheError::Conflict { .. }));
        assert_eq!(cache.lookup(&key).unwrap().unwrap().payload, "42");

        cache.store(&key, &second, true).unwrap();
        assert_eq!(cache.lookup(&key).unwrap().unwrap().payload, "43");
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let cache = ResultCache::open(dir.path());
        let (key, result) = sample(0, "42");

        cache.store(&key, &result, false).unwrap();
        let _ = cache.store(&key, &result, false);

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec![format!("{}.json", key)]);
    }

    #[test]
    fn test_corrupt_entry() {
        let dir = TempDir::new().unwrap();
        let cache = ResultCache::open(dir.path());
        let (key, _) = sample(0, "42");
        fs::write(cache.entry_path(&key), "{ not json").unwrap();

        assert!(matches!(
            cache.lookup(&key),
            Err(CacheError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_key_mismatch_rejected() {
        let dir = TempDir::new().unwrap();
        let cache = ResultCache::open(dir.path());
        let (key, _) = sample(0, "42");
        let (_, other) = sample(1, "42");

        assert!(matches!(
            cache.store(&key, &other, false),
            Err(CacheError::KeyMismatch { .. })
        ));
    }

    #[test]
    fn test_remove() {
        let dir = TempDir::new().unwrap();
        let cache = ResultCache::open(dir.path());
        let (key, result) = sample(0, "42");

        assert!(!cache.remove(&key).unwrap());
        cache.store(&key, &result, false).unwrap();
        assert!(cache.remove(&key).unwrap());
        assert!(cache.lookup(&key).unwrap().is_none());
    }

    #[test]
    fn test_concurrent_writers_same_key() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(ResultCache::open(dir.path()));
        let (key, result) = sample(0, "42");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let key = key.clone();
                let result = result.clone();
                std::thread::spawn(move || cache.store(&key, &result, false))
            })
            .collect();

        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let stored = outcomes.iter().filter(|o| o.is_ok()).count();
        let conflicts = outcomes
            .iter()
            .filter(|o| matches!(o, Err(CacheError::Conflict { .. })))
            .count();
        assert_eq!(stored, 1);
        assert_eq!(conflicts, 7);
        assert!(cache.write_locks.lock().unwrap().is_empty());
    }
}
