/// Lookup Cache - Short-lived username to identity mappings
use crate::identity::ProfileIdentity;
use crate::resolution::normalize_username;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
struct CachedIdentity {
    identity: ProfileIdentity,
    cached_at_ms: u64,
}

/// Username lookup cache
pub struct LookupCache {
    entries: Mutex<HashMap<String, CachedIdentity>>,
    /// TTL for username lookups (default: 10 minutes)
    ttl: Duration,
}

impl LookupCache {
    /// Create a new lookup cache
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: Duration::from_secs(10 * 60),
        }
    }

    /// Set custom TTL
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get cached identity for a username
    pub fn get(&self, username: &str, now_ms: u64) -> Option<ProfileIdentity> {
        let normalized = normalize_username(username);
        let mut entries = self.entries.lock();

        let entry = entries.get(&normalized)?;
        if now_ms.saturating_sub(entry.cached_at_ms) < self.ttl.as_millis() as u64 {
            return Some(entry.identity.clone());
        }

        // Expired
        entries.remove(&normalized);
        None
    }

    /// Cache identity for a username
    pub fn insert(&self, username: &str, identity: ProfileIdentity, now_ms: u64) {
        self.entries.lock().insert(
            normalize_username(username),
            CachedIdentity {
                identity,
                cached_at_ms: now_ms,
            },
        );
    }

    pub fn remove(&self, username: &str) {
        self.entries.lock().remove(&normalize_username(username));
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Drop expired entries
    pub fn cleanup_expired(&self, now_ms: u64) {
        let ttl = self.ttl.as_millis() as u64;
        self.entries
            .lock()
            .retain(|_, entry| now_ms.saturating_sub(entry.cached_at_ms) < ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for LookupCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn identity(name: &str) -> ProfileIdentity {
        ProfileIdentity::new(Uuid::new_v4(), name)
    }

    #[test]
    fn test_cache_and_get_identity() {
        let cache = LookupCache::new();
        let alice = identity("Alice");

        cache.insert("Alice", alice.clone(), 1_000);

        assert_eq!(cache.get("alice", 2_000), Some(alice.clone()));
        // Case-insensitive and trimmed
        assert_eq!(cache.get("  ALICE ", 2_000), Some(alice));
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let cache = LookupCache::new().with_ttl(Duration::from_secs(60));
        cache.insert("bob", identity("bob"), 0);

        assert!(cache.get("bob", 59_999).is_some());
        assert!(cache.get("bob", 60_000).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cleanup_expired() {
        let cache = LookupCache::new().with_ttl(Duration::from_secs(60));
        cache.insert("old", identity("old"), 0);
        cache.insert("new", identity("new"), 50_000);

        cache.cleanup_expired(70_000);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("new", 70_000).is_some());
    }
}
