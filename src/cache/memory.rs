//! In-process cache
//!
//! Implements the [`CacheStore`] contract against process-local maps.
//! Correct for a single replica; the distributed guarantees (cross-replica
//! locks) only hold with the Redis backend.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{CacheError, CacheStore};

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

#[derive(Debug)]
struct SortedSet {
    members: Vec<(f64, String)>,
    expires_at: Option<Instant>,
}

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    sorted: Mutex<HashMap<String, SortedSet>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn live_value(entries: &mut HashMap<String, Entry>, key: &str) -> Option<String> {
        match entries.get(key) {
            Some(e) if e.expires_at > Instant::now() => Some(e.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn live_set<'a>(
        sorted: &'a mut HashMap<String, SortedSet>,
        key: &str,
    ) -> Option<&'a mut SortedSet> {
        let expired = matches!(
            sorted.get(key),
            Some(SortedSet { expires_at: Some(at), .. }) if *at <= Instant::now()
        );
        if expired {
            sorted.remove(key);
        }
        sorted.get_mut(key)
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries.lock().unwrap();
        Ok(Self::live_value(&mut entries, key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let mut entries = self.entries.lock().unwrap();
        if Self::live_value(&mut entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().unwrap().remove(key);
        self.sorted.lock().unwrap().remove(key);
        Ok(())
    }

    async fn sorted_add(&self, key: &str, member: &str, score: f64) -> Result<(), CacheError> {
        let mut sorted = self.sorted.lock().unwrap();
        Self::live_set(&mut sorted, key);
        let set = sorted.entry(key.to_string()).or_insert(SortedSet {
            members: Vec::new(),
            expires_at: None,
        });
        if let Some(existing) = set.members.iter_mut().find(|(_, m)| m == member) {
            existing.0 = score;
        } else {
            set.members.push((score, member.to_string()));
        }
        Ok(())
    }

    async fn sorted_trim_below(&self, key: &str, min_score: f64) -> Result<(), CacheError> {
        let mut sorted = self.sorted.lock().unwrap();
        if let Some(set) = Self::live_set(&mut sorted, key) {
            set.members.retain(|(score, _)| *score >= min_score);
        }
        Ok(())
    }

    async fn sorted_count(&self, key: &str) -> Result<u64, CacheError> {
        let mut sorted = self.sorted.lock().unwrap();
        Ok(Self::live_set(&mut sorted, key).map_or(0, |s| s.members.len() as u64))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        let deadline = Instant::now() + ttl;
        if let Some(entry) = self.entries.lock().unwrap().get_mut(key) {
            entry.expires_at = deadline;
        }
        if let Some(set) = self.sorted.lock().unwrap().get_mut(key) {
            set.expires_at = Some(deadline);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = MemoryCache::new();
        cache.set("k", "v", TTL).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));
        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_if_absent_contention() {
        let cache = MemoryCache::new();
        assert!(cache.set_if_absent("lock", "a", TTL).await.unwrap());
        assert!(!cache.set_if_absent("lock", "b", TTL).await.unwrap());
        assert_eq!(cache.get("lock").await.unwrap(), Some("a".to_string()));
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = MemoryCache::new();
        cache.set("k", "v", Duration::from_millis(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        // expired key can be re-acquired
        assert!(cache.set_if_absent("k", "w", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_sorted_set_window() {
        let cache = MemoryCache::new();
        for (member, score) in [("1000", 1000.0), ("2000", 2000.0), ("3000", 3000.0)] {
            cache.sorted_add("w", member, score).await.unwrap();
        }
        assert_eq!(cache.sorted_count("w").await.unwrap(), 3);

        cache.sorted_trim_below("w", 1500.0).await.unwrap();
        assert_eq!(cache.sorted_count("w").await.unwrap(), 2);

        // same member is re-scored, not duplicated
        cache.sorted_add("w", "2000", 2000.0).await.unwrap();
        assert_eq!(cache.sorted_count("w").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_sorted_set_expiry() {
        let cache = MemoryCache::new();
        cache.sorted_add("w", "1", 1.0).await.unwrap();
        cache.expire("w", Duration::from_millis(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cache.sorted_count("w").await.unwrap(), 0);
    }
}
