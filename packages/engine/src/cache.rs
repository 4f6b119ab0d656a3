use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Key/value cache whose entries expire `ttl` after insertion.
///
/// Owned by whoever needs it (the syncer keeps one for downloaded asset
/// bytes); there is no process-wide instance.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, (Instant, V)>>,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((stored, value)) if stored.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub async fn insert(&self, key: K, value: V) {
        self.entries
            .lock()
            .await
            .insert(key, (Instant::now(), value));
    }

    /// Drop expired entries.
    pub async fn purge(&self) {
        let ttl = self.ttl;
        self.entries
            .lock()
            .await
            .retain(|_, (stored, _)| stored.elapsed() < ttl);
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = TtlCache::new(Duration::from_millis(20));
        cache.insert("a".to_string(), 1u32).await;
        assert_eq!(cache.get(&"a".to_string()).await, Some(1));

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get(&"a".to_string()).await, None);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_zero_ttl_keeps_nothing() {
        let cache = TtlCache::new(Duration::ZERO);
        cache.insert(1u8, "x").await;
        cache.purge().await;
        assert_eq!(cache.len().await, 0);
    }
}
