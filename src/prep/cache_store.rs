// The cache directory: one JSON file per fingerprint.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use tempfile::NamedTempFile;

use rollcall_pipeline::cache::{CacheStore, CachedResult};
use rollcall_pipeline::fingerprint::Fingerprint;
use rollcall_pipeline::PipelineError;

#[derive(Debug, Clone)]
pub struct DirCacheStore {
    dir: PathBuf,
}

fn store_error(path: &Path, e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Store {
        message: format!("{}: {}", path.display(), e),
    }
}

impl DirCacheStore {
    /// The directory is created on the first insert.
    pub fn new(dir: &Path) -> DirCacheStore {
        DirCacheStore {
            dir: dir.to_path_buf(),
        }
    }

    fn entry_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.dir.join(format!("{}.json", fingerprint.as_str()))
    }

    fn read_entry(path: &Path) -> Result<Option<CachedResult>, PipelineError> {
        let contents = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(store_error(path, e)),
        };
        let entry: CachedResult =
            serde_json::from_str(&contents).map_err(|e| store_error(path, e))?;
        Ok(Some(entry))
    }

    // A fresh file with a unique name in the cache directory. It is removed
    // when dropped unless it was persisted.
    fn write_temp(&self, entry: &CachedResult) -> Result<NamedTempFile, PipelineError> {
        let js = serde_json::to_string_pretty(entry).map_err(|e| store_error(&self.dir, e))?;
        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|e| store_error(&self.dir, e))?;
        tmp.write_all(js.as_bytes())
            .map_err(|e| store_error(tmp.path(), e))?;
        Ok(tmp)
    }
}

impl CacheStore for DirCacheStore {
    // The entry is written aside and then moved under its final name without
    // replacing an existing file, so readers never see a partial file and
    // only one of two writers wins.
    fn insert_new(&self, entry: CachedResult) -> Result<(), PipelineError> {
        fs::create_dir_all(&self.dir).map_err(|e| store_error(&self.dir, e))?;
        let path = self.entry_path(&entry.fingerprint);
        let tmp = self.write_temp(&entry)?;
        match tmp.persist_noclobber(&path) {
            Ok(_) => {
                debug!("cache: wrote {}", path.display());
                Ok(())
            }
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                Err(PipelineError::DuplicateFingerprint {
                    fingerprint: entry.fingerprint.to_string(),
                })
            }
            Err(e) => Err(store_error(&path, e.error)),
        }
    }

    // Concurrent touches of the same entry may lose an access count. The
    // file is replaced whole, never left partial.
    fn fetch_and_touch(
        &self,
        fingerprint: &Fingerprint,
        now: DateTime<Utc>,
    ) -> Result<Option<CachedResult>, PipelineError> {
        let path = self.entry_path(fingerprint);
        let mut entry = match DirCacheStore::read_entry(&path)? {
            Some(e) => e,
            None => return Ok(None),
        };
        entry.last_accessed = now;
        entry.access_count += 1;
        let tmp = self.write_temp(&entry)?;
        tmp.persist(&path).map_err(|e| store_error(&path, e.error))?;
        Ok(Some(entry))
    }

    fn delete_accessed_before(&self, cutoff: DateTime<Utc>) -> Result<usize, PipelineError> {
        let listing = match fs::read_dir(&self.dir) {
            Ok(l) => l,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(store_error(&self.dir, e)),
        };
        let mut removed = 0;
        for item in listing {
            let path = item.map_err(|e| store_error(&self.dir, e))?.path();
            if path.extension().and_then(|x| x.to_str()) != Some("json") {
                continue;
            }
            // Only files named after a fingerprint belong to the cache.
            let stem = path.file_stem().and_then(|x| x.to_str()).unwrap_or("");
            if Fingerprint::from_hex(stem).is_none() {
                debug!("cache: ignoring {}", path.display());
                continue;
            }
            let entry = match DirCacheStore::read_entry(&path) {
                Ok(Some(e)) => e,
                Ok(None) => continue,
                Err(e) => {
                    warn!("cache: skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if entry.last_accessed < cutoff {
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    // Already evicted by another process.
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(store_error(&path, e)),
                }
            }
        }
        Ok(removed)
    }
}
