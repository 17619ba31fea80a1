use std::collections::HashMap;

use chrono::{DateTime, Utc};

/// One cached query result: the ordered article ids plus the topic the
/// query was scoped to (None = covers every topic).
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub ids: Vec<i64>,
    pub topic: Option<String>,
    pub cached_at: DateTime<Utc>,
}

/// Query-result cache keyed by canonical filter signature. Best-effort:
/// lifetime is bounded by explicit invalidation, never a TTL, and any
/// inconsistency resolves by falling through to the store.
#[derive(Debug, Default)]
pub struct QueryCache {
    entries: HashMap<String, CacheEntry>,
    generation: u64,
}

impl QueryCache {
    pub fn get(&self, signature: &str) -> Option<&CacheEntry> {
        self.entries.get(signature)
    }

    /// Current invalidation generation. Callers capture it before
    /// reading the store and hand it back to [`insert`](Self::insert).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Insert a result snapshot taken at generation `as_of`. If an
    /// invalidation ran since, the snapshot may predate a committed
    /// mutation and is discarded instead of cached.
    pub fn insert(&mut self, signature: String, ids: Vec<i64>, topic: Option<String>, as_of: u64) {
        if as_of != self.generation {
            return;
        }
        self.entries.insert(
            signature,
            CacheEntry {
                ids,
                topic,
                cached_at: Utc::now(),
            },
        );
    }

    /// Conservative invalidation. Entries scoped to the affected topic
    /// are dropped, and so are unscoped entries (they may contain any
    /// article). An unknown topic drops everything.
    pub fn invalidate_topic(&mut self, topic: Option<&str>) {
        self.generation += 1;
        match topic {
            Some(topic) => self
                .entries
                .retain(|_, entry| entry.topic.is_some() && entry.topic.as_deref() != Some(topic)),
            None => self.entries.clear(),
        }
    }

    pub fn invalidate_all(&mut self) {
        self.generation += 1;
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_invalidation_drops_matching_and_unscoped_entries() {
        let mut cache = QueryCache::default();
        let gen = cache.generation();
        cache.insert("a".to_string(), vec![1], Some("rust".to_string()), gen);
        cache.insert("b".to_string(), vec![2], Some("news".to_string()), gen);
        cache.insert("c".to_string(), vec![3], None, gen);

        cache.invalidate_topic(Some("rust"));

        assert!(cache.get("a").is_none(), "matching topic survived");
        assert!(cache.get("b").is_some(), "unrelated topic dropped");
        assert!(cache.get("c").is_none(), "unscoped entry survived");
    }

    #[test]
    fn unknown_topic_clears_everything() {
        let mut cache = QueryCache::default();
        let gen = cache.generation();
        cache.insert("a".to_string(), vec![1], Some("rust".to_string()), gen);
        cache.insert("b".to_string(), vec![2], None, gen);

        cache.invalidate_topic(None);
        assert!(cache.is_empty());
    }

    #[test]
    fn snapshot_taken_before_invalidation_is_not_cached() {
        let mut cache = QueryCache::default();

        // A store read snapshotted here races a mutation that commits
        // and invalidates before the snapshot reaches the cache.
        let before = cache.generation();
        cache.invalidate_topic(Some("rust"));

        cache.insert("unread".to_string(), vec![1], None, before);
        assert!(cache.get("unread").is_none(), "stale snapshot was reinstated");

        cache.insert("unread".to_string(), vec![1], None, cache.generation());
        assert!(cache.get("unread").is_some());
    }
}
