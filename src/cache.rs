//! Query result cache.
//!
//! In-memory store of result rows keyed by query name plus parameters.
//! Entries live until an explicit clear; there is no TTL. An optional
//! `max_entries` bound stops new keys from being added once full.

use crate::driver::Rows;
use crate::error::{SqlqError, SqlqResult};
use crate::value::Params;
use dashmap::DashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use url::form_urlencoded::byte_serialize;

/// Parameter names that never contribute to a cache key.
pub const RESERVED_KEYS: [&str; 2] = ["_", "q"];

fn encode(s: &str) -> String {
    byte_serialize(s.as_bytes()).collect()
}

/// Canonical cache key for a query invocation.
///
/// `name?k1=v1&k2=v2` with keys sorted and reserved keys dropped, or just
/// `name` when nothing remains.
pub fn cache_key(name: &str, params: &Params) -> String {
    let mut keys: Vec<&String> = params
        .keys()
        .filter(|k| !RESERVED_KEYS.contains(&k.as_str()))
        .collect();
    keys.sort();

    let qs = keys
        .into_iter()
        .map(|k| format!("{}={}", encode(k), encode(&params[k].to_string())))
        .collect::<Vec<_>>()
        .join("&");

    if qs.is_empty() {
        name.to_string()
    } else {
        format!("{}?{}", name, qs)
    }
}

/// Cache configuration
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// `None` leaves the cache unbounded.
    pub max_entries: Option<usize>,
}

/// Thread-safe result cache.
pub struct QueryCache {
    entries: DashMap<String, Rows>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl QueryCache {
    pub fn new(config: CacheConfig) -> Self {
        tracing::debug!(enabled = config.enabled, "query cache initialised");
        Self {
            entries: DashMap::new(),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn get(&self, key: &str) -> Option<Rows> {
        if !self.config.enabled {
            tracing::trace!("query cache not enabled");
            return None;
        }

        match self.entries.get(key) {
            Some(rows) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(rows.value().clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn set(&self, key: &str, rows: Rows) {
        if !self.config.enabled {
            tracing::trace!("query cache not enabled");
            return;
        }

        if let Some(max) = self.config.max_entries {
            if self.entries.len() >= max && !self.entries.contains_key(key) {
                tracing::debug!(key, max, "query cache full, entry dropped");
                return;
            }
        }

        self.entries.insert(key.to_string(), rows);
    }

    pub fn clear(&self) {
        if self.config.enabled {
            self.entries.clear();
            tracing::debug!("query cache cleared");
        }
    }

    /// Keys currently cached, sorted.
    pub fn keys(&self) -> Vec<String> {
        if !self.config.enabled {
            return Vec::new();
        }
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            enabled: self.config.enabled,
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub enabled: bool,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Cache management command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOp {
    Clear,
    Keys,
    Stats,
}

impl FromStr for CacheOp {
    type Err = SqlqError;

    fn from_str(s: &str) -> SqlqResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clear" => Ok(CacheOp::Clear),
            "keys" => Ok(CacheOp::Keys),
            "stats" => Ok(CacheOp::Stats),
            _ => Err(SqlqError::UnknownCacheOperation(s.to_string())),
        }
    }
}

/// Outcome of a cache management command.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheReport {
    Cleared,
    Keys(Vec<String>),
    Stats(CacheStats),
}

impl QueryCache {
    pub fn run(&self, op: CacheOp) -> CacheReport {
        match op {
            CacheOp::Clear => {
                self.clear();
                CacheReport::Cleared
            }
            CacheOp::Keys => CacheReport::Keys(self.keys()),
            CacheOp::Stats => CacheReport::Stats(self.stats()),
        }
    }
}
