//! Process-wide path-to-file cache
//!
//! Path resolution walks one row per segment, so hot lookups cache the
//! resolved file id for ten minutes under the key `"{app-id}-{path}"`.
//! Entries are revalidated with an id lookup on every hit, which keeps
//! stale deletions visible. The map is bounded; the oldest-touched entry is
//! evicted at capacity.

use std::collections::HashMap;
use std::sync::{LazyLock, Mutex, MutexGuard};
use std::time::{Duration, Instant};

const CACHE_TTL: Duration = Duration::from_secs(600);
const CACHE_CAPACITY: usize = 4096;

struct CacheEntry {
    file_id: i64,
    expires_at: Instant,
}

pub struct PathCache {
    entries: HashMap<String, CacheEntry>,
    access_order: Vec<String>,
    capacity: usize,
    ttl: Duration,
}

impl PathCache {
    fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            access_order: Vec::with_capacity(capacity),
            capacity,
            ttl,
        }
    }

    pub fn get(&mut self, key: &str) -> Option<i64> {
        match self.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                if let Some(pos) = self.access_order.iter().position(|k| k == key) {
                    let k = self.access_order.remove(pos);
                    self.access_order.push(k);
                }
                Some(entry.file_id)
            }
            Some(_) => {
                self.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&mut self, key: String, file_id: i64) {
        if self.entries.contains_key(&key) {
            if let Some(entry) = self.entries.get_mut(&key) {
                entry.file_id = file_id;
                entry.expires_at = Instant::now() + self.ttl;
            }
            return;
        }

        while self.entries.len() >= self.capacity && !self.access_order.is_empty() {
            let oldest = self.access_order.remove(0);
            self.entries.remove(&oldest);
        }

        self.entries.insert(
            key.clone(),
            CacheEntry {
                file_id,
                expires_at: Instant::now() + self.ttl,
            },
        );
        self.access_order.push(key);
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.remove(key);
        if let Some(pos) = self.access_order.iter().position(|k| k == key) {
            self.access_order.remove(pos);
        }
    }
}

static PATH_CACHE: LazyLock<Mutex<PathCache>> =
    LazyLock::new(|| Mutex::new(PathCache::new(CACHE_CAPACITY, CACHE_TTL)));

/// Lock the shared cache; a poisoned lock is recovered since entries are
/// only advisory.
pub fn shared() -> MutexGuard<'static, PathCache> {
    PATH_CACHE.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Cache keys are namespaced by the application's external uid, which is
/// unique across every store this process may touch.
pub fn cache_key(app_uid: &str, path: &str) -> String {
    format!("{}-{}", app_uid, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_remove() {
        let mut cache = PathCache::new(8, Duration::from_secs(60));
        cache.put("1-/a".to_string(), 42);
        assert_eq!(cache.get("1-/a"), Some(42));

        cache.remove("1-/a");
        assert_eq!(cache.get("1-/a"), None);
    }

    #[test]
    fn test_ttl_expiry() {
        let mut cache = PathCache::new(8, Duration::from_millis(0));
        cache.put("1-/a".to_string(), 42);
        assert_eq!(cache.get("1-/a"), None);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut cache = PathCache::new(2, Duration::from_secs(60));
        cache.put("a".to_string(), 1);
        cache.put("b".to_string(), 2);
        cache.get("a");
        cache.put("c".to_string(), 3);

        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("c"), Some(3));
    }
}
