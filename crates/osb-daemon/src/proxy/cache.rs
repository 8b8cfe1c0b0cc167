//! TTL route cache for the reverse proxy.
//!
//! Maps a sandbox name to its current target URL. Entries expire on a
//! wall-clock deadline and are explicitly invalidated whenever the lifecycle
//! engine changes a sandbox's port assignments.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use parking_lot::RwLock;

pub const DEFAULT_ROUTE_TTL: Duration = Duration::from_secs(30);

struct CacheEntry {
    target: String,
    expires_at: Instant,
}

pub struct RouteCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl Default for RouteCache {
    fn default() -> Self {
        Self::new(DEFAULT_ROUTE_TTL)
    }
}

impl RouteCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the target iff present and not expired.
    pub fn get(&self, name: &str) -> Option<String> {
        let entries = self.entries.read();
        let entry = entries.get(name)?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        Some(entry.target.clone())
    }

    pub fn set(&self, name: &str, target: &str) {
        self.entries.write().insert(
            name.to_string(),
            CacheEntry {
                target: target.to_string(),
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn invalidate(&self, name: &str) {
        self.entries.write().remove(name);
    }

    /// Drops expired entries; called opportunistically, correctness never
    /// depends on it.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.entries.write().retain(|_, entry| entry.expires_at > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_after_set_returns_target() {
        let cache = RouteCache::new(Duration::from_secs(30));
        cache.set("brave-curie", "http://127.0.0.1:32768");
        assert_eq!(
            cache.get("brave-curie").as_deref(),
            Some("http://127.0.0.1:32768")
        );
        assert!(cache.get("unknown").is_none());
    }

    #[test]
    fn expired_entries_are_never_returned() {
        let cache = RouteCache::new(Duration::from_millis(0));
        cache.set("brave-curie", "http://127.0.0.1:32768");
        assert!(cache.get("brave-curie").is_none());
    }

    #[test]
    fn get_after_invalidate_misses() {
        let cache = RouteCache::new(Duration::from_secs(30));
        cache.set("brave-curie", "http://127.0.0.1:32768");
        cache.invalidate("brave-curie");
        assert!(cache.get("brave-curie").is_none());
    }

    #[test]
    fn sweep_retains_live_entries() {
        let cache = RouteCache::new(Duration::from_secs(30));
        cache.set("live", "http://127.0.0.1:1");
        cache.sweep();
        assert!(cache.get("live").is_some());
    }
}
