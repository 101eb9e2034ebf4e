//! Per-thread result cache
//!
//! Every successful execution is stored under the fingerprint of its
//! statement so export and show-query can reach it later in the thread.
//! The cache holds at most [`CACHE_CAPACITY`] entries; inserting past that
//! evicts the entry with the oldest `created_at`.

use crate::execution::result::Record;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::debug;

pub const CACHE_CAPACITY: usize = 10;

/// Hex characters kept from the statement digest.
pub const FINGERPRINT_LEN: usize = 8;

/// Short hash of a statement's text, used as the result id.
pub fn fingerprint(statement: &str) -> String {
    let digest = Sha256::digest(statement.as_bytes());
    let mut hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex.truncate(FINGERPRINT_LEN);
    hex
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub statement: String,

    pub rows: Vec<Record>,

    /// Column order as returned by the engine.
    #[serde(default)]
    pub columns: Vec<String>,

    pub created_at: DateTime<Utc>,

    /// The question the statement answered.
    pub natural_query: String,

    #[serde(default)]
    pub assumptions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultCache {
    entries: HashMap<String, CacheEntry>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, result_id: &str) -> Option<&CacheEntry> {
        self.entries.get(result_id)
    }

    /// Like [`get`](Self::get), but borrows the stored id as well.
    pub fn entry(&self, result_id: &str) -> Option<(&str, &CacheEntry)> {
        self.entries
            .get_key_value(result_id)
            .map(|(k, v)| (k.as_str(), v))
    }

    pub fn contains(&self, result_id: &str) -> bool {
        self.entries.contains_key(result_id)
    }

    /// Result id to use for `statement`.
    ///
    /// Normally the bare fingerprint. When that slot already holds a
    /// different statement the id gets a numeric suffix (`-1`, `-2`, ...)
    /// so colliding statements never overwrite each other.
    pub fn key_for(&self, statement: &str) -> String {
        let base = fingerprint(statement);
        let mut candidate = base.clone();
        let mut n = 0;
        loop {
            match self.entries.get(&candidate) {
                Some(existing) if existing.statement != statement => {
                    n += 1;
                    candidate = format!("{}-{}", base, n);
                }
                _ => return candidate,
            }
        }
    }

    /// Insert or replace an entry, returning the id evicted to stay within
    /// capacity, if any.
    pub fn insert(&mut self, result_id: String, entry: CacheEntry) -> Option<String> {
        self.entries.insert(result_id, entry);
        let mut evicted = None;
        while self.entries.len() > CACHE_CAPACITY {
            let oldest = self
                .entries
                .iter()
                .min_by(|(ka, a), (kb, b)| a.created_at.cmp(&b.created_at).then_with(|| ka.cmp(kb)))
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    debug!(result_id = %key, "Evicting oldest cache entry");
                    self.entries.remove(&key);
                    evicted = Some(key);
                }
                None => break,
            }
        }
        evicted
    }

    /// Entries ordered newest first.
    pub fn newest_first(&self) -> Vec<(&str, &CacheEntry)> {
        let mut all: Vec<(&str, &CacheEntry)> =
            self.entries.iter().map(|(k, v)| (k.as_str(), v)).collect();
        all.sort_by(|(ka, a), (kb, b)| b.created_at.cmp(&a.created_at).then_with(|| kb.cmp(ka)));
        all
    }

    pub fn most_recent(&self) -> Option<(&str, &CacheEntry)> {
        self.newest_first().into_iter().next()
    }
}

/// Caches for every live thread, keyed by thread id.
///
/// Concurrent turns on one thread are last-writer-wins.
#[derive(Debug, Default)]
pub struct CacheRegistry {
    threads: DashMap<String, ResultCache>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, thread_id: &str) -> Option<ResultCache> {
        self.threads.get(thread_id).map(|c| c.value().clone())
    }

    pub fn put(&self, thread_id: &str, cache: ResultCache) {
        self.threads.insert(thread_id.to_string(), cache);
    }

    pub fn remove(&self, thread_id: &str) {
        self.threads.remove(thread_id);
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }
}
