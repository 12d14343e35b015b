use std::{
    collections::hash_map::DefaultHasher,
    collections::HashMap,
    hash::{Hash, Hasher},
    sync::Mutex,
    time::{Duration, Instant},
};

use crate::core::types::{IocType, SourceResult, SourceStatus};

const SHARDS: usize = 16;

#[derive(Clone)]
struct CacheEntry {
    result: SourceResult,
    stored_at: Instant,
    ttl: Duration,
}

/// Memoizes per-(source, ioc) results so repeat queries inside the TTL never
/// reach the network. Sharded so a lookup for one key does not contend with
/// unrelated writes.
pub struct ResultCache {
    shards: Vec<Mutex<HashMap<CacheKey, CacheEntry>>>,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    source: String,
    ioc_type: IocType,
    ioc_value: String,
}

impl CacheKey {
    fn new(source: &str, ioc_type: IocType, ioc_value: &str) -> Self {
        Self {
            source: source.to_string(),
            ioc_type,
            // Normalization for lookup only; the query value itself is
            // never rewritten.
            ioc_value: ioc_value.to_lowercase(),
        }
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultCache {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, key: &CacheKey) -> &Mutex<HashMap<CacheKey, CacheEntry>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARDS]
    }

    pub fn get(&self, source: &str, ioc_type: IocType, ioc_value: &str) -> Option<SourceResult> {
        let key = CacheKey::new(source, ioc_type, ioc_value);
        let mut shard = match self.shard(&key).lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match shard.get(&key) {
            Some(entry) if entry.stored_at.elapsed() < entry.ttl => Some(entry.result.clone()),
            Some(_) => {
                shard.remove(&key);
                None
            }
            None => None,
        }
    }

    /// Stores terminal outcomes only. `Skipped` and `NotSupported` are left
    /// out so the next aggregation retries once quota recovers.
    pub fn put(&self, ioc_type: IocType, ioc_value: &str, result: &SourceResult, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        match result.status {
            SourceStatus::Success | SourceStatus::Error => {}
            SourceStatus::Skipped | SourceStatus::NotSupported => return,
        }
        let key = CacheKey::new(&result.source, ioc_type, ioc_value);
        let mut shard = match self.shard(&key).lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        shard.insert(
            key,
            CacheEntry {
                result: result.clone(),
                stored_at: Instant::now(),
                ttl,
            },
        );
    }

    pub fn purge_expired(&self) {
        for shard in &self.shards {
            let mut shard = match shard.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            shard.retain(|_, entry| entry.stored_at.elapsed() < entry.ttl);
        }
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| match s.lock() {
                Ok(guard) => guard.len(),
                Err(poisoned) => poisoned.into_inner().len(),
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success(source: &str, score: f64) -> SourceResult {
        SourceResult {
            source: source.to_string(),
            status: SourceStatus::Success,
            risk_score: Some(score),
            description: "ok".to_string(),
            raw: None,
        }
    }

    #[test]
    fn hit_within_ttl_miss_after_expiry() {
        let cache = ResultCache::new();
        let result = success("otx", 0.4);
        cache.put(IocType::Ip, "1.2.3.4", &result, Duration::from_millis(30));
        assert!(cache.get("otx", IocType::Ip, "1.2.3.4").is_some());
        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get("otx", IocType::Ip, "1.2.3.4").is_none());
    }

    #[test]
    fn key_normalizes_value_case_only() {
        let cache = ResultCache::new();
        let result = success("otx", 0.4);
        cache.put(
            IocType::Domain,
            "Example.COM",
            &result,
            Duration::from_secs(60),
        );
        assert!(cache.get("otx", IocType::Domain, "example.com").is_some());
        assert!(cache.get("otx", IocType::Url, "example.com").is_none());
        assert!(cache
            .get("virustotal", IocType::Domain, "example.com")
            .is_none());
    }

    #[test]
    fn skipped_results_are_not_cached() {
        let cache = ResultCache::new();
        let skipped = SourceResult::skipped("otx", "rate limited");
        cache.put(IocType::Ip, "1.2.3.4", &skipped, Duration::from_secs(60));
        assert!(cache.get("otx", IocType::Ip, "1.2.3.4").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn error_results_are_cached() {
        let cache = ResultCache::new();
        let error = SourceResult::error("otx", "http 500");
        cache.put(IocType::Ip, "1.2.3.4", &error, Duration::from_secs(60));
        let hit = cache.get("otx", IocType::Ip, "1.2.3.4").unwrap();
        assert_eq!(hit.status, SourceStatus::Error);
    }

    #[test]
    fn purge_drops_only_expired_entries() {
        let cache = ResultCache::new();
        cache.put(
            IocType::Ip,
            "1.1.1.1",
            &success("a", 0.1),
            Duration::from_millis(10),
        );
        cache.put(
            IocType::Ip,
            "2.2.2.2",
            &success("b", 0.2),
            Duration::from_secs(60),
        );
        std::thread::sleep(Duration::from_millis(20));
        cache.purge_expired();
        assert_eq!(cache.len(), 1);
        assert!(cache.get("b", IocType::Ip, "2.2.2.2").is_some());
    }
}
