//! Write-once persistence of estimation results, keyed by fingerprint.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::*;
use crate::estimator::EstimateOutput;
use crate::fingerprint::{fingerprint, Fingerprint};

/// One persisted computation.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct CachedResult {
    pub fingerprint: Fingerprint,
    /// Sorted.
    pub ballot_ids: Vec<BallotId>,
    pub ballot_count: usize,
    pub params: BTreeMap<String, String>,
    pub result: EstimateOutput,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
}

/// The persistence behind a [`FingerprintCache`].
///
/// Implementations must make `insert_new` atomic: of two concurrent
/// inserts of the same fingerprint, exactly one succeeds.
pub trait CacheStore {
    /// Fails with `DuplicateFingerprint` if an entry exists.
    fn insert_new(&self, entry: CachedResult) -> Result<(), PipelineError>;

    /// Returns the entry after setting its last access to `now` and
    /// incrementing its access count.
    fn fetch_and_touch(
        &self,
        fingerprint: &Fingerprint,
        now: DateTime<Utc>,
    ) -> Result<Option<CachedResult>, PipelineError>;

    /// Removes the entries last accessed strictly before `cutoff`.
    fn delete_accessed_before(&self, cutoff: DateTime<Utc>) -> Result<usize, PipelineError>;
}

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A store that lives as long as the process. Used in tests and for runs
/// without a cache directory.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: Mutex<BTreeMap<Fingerprint, CachedResult>>,
}

impl MemoryCacheStore {
    pub fn new() -> MemoryCacheStore {
        MemoryCacheStore::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> PipelineError {
    PipelineError::Store {
        message: "cache lock poisoned".to_string(),
    }
}

impl CacheStore for MemoryCacheStore {
    fn insert_new(&self, entry: CachedResult) -> Result<(), PipelineError> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        if entries.contains_key(&entry.fingerprint) {
            return Err(PipelineError::DuplicateFingerprint {
                fingerprint: entry.fingerprint.to_string(),
            });
        }
        entries.insert(entry.fingerprint.clone(), entry);
        Ok(())
    }

    fn fetch_and_touch(
        &self,
        fingerprint: &Fingerprint,
        now: DateTime<Utc>,
    ) -> Result<Option<CachedResult>, PipelineError> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        Ok(entries.get_mut(fingerprint).map(|e| {
            e.last_accessed = now;
            e.access_count += 1;
            e.clone()
        }))
    }

    fn delete_accessed_before(&self, cutoff: DateTime<Utc>) -> Result<usize, PipelineError> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        let before = entries.len();
        entries.retain(|_, e| e.last_accessed >= cutoff);
        Ok(before - entries.len())
    }
}

/// Where the answer of [`FingerprintCache::get_or_compute`] came from.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize)]
pub enum CacheOutcome {
    Hit,
    Computed,
    /// Computed, but another writer stored the same fingerprint first. The
    /// stored entry is returned.
    LostRace,
}

pub struct FingerprintCache<S: CacheStore, C: Clock = SystemClock> {
    store: S,
    clock: C,
}

impl<S: CacheStore> FingerprintCache<S, SystemClock> {
    pub fn new(store: S) -> FingerprintCache<S, SystemClock> {
        FingerprintCache {
            store,
            clock: SystemClock,
        }
    }
}

impl<S: CacheStore, C: Clock> FingerprintCache<S, C> {
    pub fn with_clock(store: S, clock: C) -> FingerprintCache<S, C> {
        FingerprintCache { store, clock }
    }

    pub fn backend(&self) -> &S {
        &self.store
    }

    pub fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<CachedResult>, PipelineError> {
        let res = self.store.fetch_and_touch(fingerprint, self.clock.now())?;
        match &res {
            Some(e) => debug!(
                "cache: hit {} (accessed {} times)",
                fingerprint, e.access_count
            ),
            None => debug!("cache: miss {}", fingerprint),
        }
        Ok(res)
    }

    /// Persists a result. Never overwrites: a second store of the same
    /// fingerprint fails with `DuplicateFingerprint`.
    pub fn store(
        &self,
        fingerprint: &Fingerprint,
        ballots: &[BallotId],
        params: &[(String, String)],
        result: EstimateOutput,
    ) -> Result<CachedResult, PipelineError> {
        let mut ballot_ids = ballots.to_vec();
        ballot_ids.sort();
        let now = self.clock.now();
        let entry = CachedResult {
            fingerprint: fingerprint.clone(),
            ballot_count: ballot_ids.len(),
            ballot_ids,
            params: params.iter().cloned().collect(),
            result,
            created_at: now,
            last_accessed: now,
            access_count: 1,
        };
        self.store.insert_new(entry.clone())?;
        info!("cache: stored {} ({} ballots)", fingerprint, entry.ballot_count);
        Ok(entry)
    }

    /// Removes the entries not accessed in the last `days` days.
    pub fn evict_older_than(&self, days: i64) -> Result<usize, PipelineError> {
        let cutoff = self.clock.now() - Duration::days(days);
        let removed = self.store.delete_accessed_before(cutoff)?;
        info!(
            "cache: evicted {} entries not accessed since {}",
            removed, cutoff
        );
        Ok(removed)
    }

    /// Looks up the result of a ballot set, computing and storing it on a
    /// miss.
    pub fn get_or_compute<F>(
        &self,
        ballots: &[BallotId],
        params: &[(String, String)],
        compute: F,
    ) -> Result<(CachedResult, CacheOutcome), PipelineError>
    where
        F: FnOnce() -> Result<EstimateOutput, PipelineError>,
    {
        let fp = fingerprint(ballots, params);
        if let Some(e) = self.lookup(&fp)? {
            return Ok((e, CacheOutcome::Hit));
        }
        let result = compute()?;
        match self.store(&fp, ballots, params, result) {
            Ok(e) => Ok((e, CacheOutcome::Computed)),
            Err(PipelineError::DuplicateFingerprint { .. }) => {
                warn!("cache: {} was stored concurrently, using the stored entry", fp);
                match self.lookup(&fp)? {
                    Some(e) => Ok((e, CacheOutcome::LostRace)),
                    // Evicted in between.
                    None => Err(PipelineError::Store {
                        message: format!("entry {} vanished after a duplicate insert", fp),
                    }),
                }
            }
            Err(e) => Err(e),
        }
    }
}
