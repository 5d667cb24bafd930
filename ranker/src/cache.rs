//! Expiring per-server state carried between ticks
//!
//! Both caches are keyed by server identity and hold an entry for at most one
//! hour. Expired entries are invisible to readers and are dropped by `sweep`,
//! which the runner calls between ticks.
//!
//! Scoring never writes to these caches directly. It returns [`CacheUpdate`]s
//! which the runner applies after every evaluation of the tick has finished.

use log::debug;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Lifetime of trend troughs and jitter draws
pub const CACHE_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Map whose entries expire a fixed time after insertion
#[derive(Debug, Clone)]
pub struct TtlMap<K, V> {
    entries: HashMap<K, Entry<V>>,
    ttl: Duration,
}

impl<K: Eq + Hash, V> TtlMap<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.get_at(key, Instant::now())
    }

    pub fn get_at(&self, key: &K, now: Instant) -> Option<&V> {
        self.entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| &entry.value)
    }

    /// Inserts or replaces, restarting the entry's lifetime
    pub fn insert_at(&mut self, key: K, value: V, now: Instant) {
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: now + self.ttl,
            },
        );
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|entry| entry.value)
    }

    /// Drops expired entries, returning how many were removed
    pub fn sweep(&mut self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }

    /// Number of stored entries, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// State change produced while scoring one server
#[derive(Debug, Clone, PartialEq)]
pub enum CacheUpdate {
    /// New lowest human count for the identity
    Trough { identity: String, humans: u32 },
    /// First jitter draw for an empty server
    Jitter { identity: String, draw: f64 },
    /// Server is no longer empty
    ClearJitter { identity: String },
}

/// Lowest human count seen per server in the trailing hour
#[derive(Debug, Clone)]
pub struct TrendCache {
    troughs: TtlMap<String, u32>,
}

impl TrendCache {
    pub fn new() -> Self {
        Self {
            troughs: TtlMap::new(CACHE_TTL),
        }
    }

    pub fn trough(&self, identity: &str) -> Option<u32> {
        self.troughs.get(&identity.to_string()).copied()
    }

    pub fn trough_at(&self, identity: &str, now: Instant) -> Option<u32> {
        self.troughs.get_at(&identity.to_string(), now).copied()
    }

    /// Update to emit for an observation, if it lowers (or starts) the trough
    pub fn observe(&self, identity: &str, humans: u32, now: Instant) -> Option<CacheUpdate> {
        match self.trough_at(identity, now) {
            Some(trough) if humans >= trough => None,
            _ => Some(CacheUpdate::Trough {
                identity: identity.to_string(),
                humans,
            }),
        }
    }

    pub fn record(&mut self, identity: String, humans: u32, now: Instant) {
        // concurrent evaluations of one identity may both report a trough
        if let Some(trough) = self.trough_at(&identity, now) {
            if humans >= trough {
                return;
            }
        }
        self.troughs.insert_at(identity, humans, now);
    }

    pub fn sweep(&mut self) -> usize {
        self.troughs.sweep()
    }

    pub fn len(&self) -> usize {
        self.troughs.len()
    }
}

impl Default for TrendCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Standard-normal draws held per empty server
#[derive(Debug, Clone)]
pub struct JitterCache {
    draws: TtlMap<String, f64>,
}

impl JitterCache {
    pub fn new() -> Self {
        Self {
            draws: TtlMap::new(CACHE_TTL),
        }
    }

    pub fn draw(&self, identity: &str) -> Option<f64> {
        self.draws.get(&identity.to_string()).copied()
    }

    pub fn draw_at(&self, identity: &str, now: Instant) -> Option<f64> {
        self.draws.get_at(&identity.to_string(), now).copied()
    }

    /// Stores a draw unless a live one exists
    pub fn store(&mut self, identity: String, draw: f64, now: Instant) {
        if self.draw_at(&identity, now).is_none() {
            self.draws.insert_at(identity, draw, now);
        }
    }

    pub fn clear(&mut self, identity: &str) -> bool {
        self.draws.remove(&identity.to_string()).is_some()
    }

    pub fn sweep(&mut self) -> usize {
        self.draws.sweep()
    }

    pub fn len(&self) -> usize {
        self.draws.len()
    }
}

impl Default for JitterCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Applies a tick's updates to the caches
pub fn apply_updates(
    trend: &mut TrendCache,
    jitter: &mut JitterCache,
    updates: impl IntoIterator<Item = CacheUpdate>,
    now: Instant,
) {
    for update in updates {
        match update {
            CacheUpdate::Trough { identity, humans } => trend.record(identity, humans, now),
            CacheUpdate::Jitter { identity, draw } => jitter.store(identity, draw, now),
            CacheUpdate::ClearJitter { identity } => {
                if jitter.clear(&identity) {
                    debug!("Cleared jitter for {}", identity);
                }
            }
        }
    }
}
