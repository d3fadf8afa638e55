//! Short-lived value cache

use std::time::{Duration, Instant};

use tokio::sync::RwLock;

/// Cached value with TTL
#[derive(Clone, Debug)]
pub struct CachedValue<T> {
    pub value: T,
    pub cached_at: Instant,
    pub ttl: Duration,
}

impl<T> CachedValue<T> {
    pub fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            cached_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

/// Single-slot cache; a miss is the caller's job to fill
pub struct TtlCache<T> {
    ttl: Duration,
    slot: RwLock<Option<CachedValue<T>>>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(None),
        }
    }

    pub async fn get(&self) -> Option<T> {
        self.slot
            .read()
            .await
            .as_ref()
            .filter(|cached| !cached.is_expired())
            .map(|cached| cached.value.clone())
    }

    pub async fn set(&self, value: T) {
        *self.slot.write().await = Some(CachedValue::new(value, self.ttl));
    }

    pub async fn clear(&self) {
        *self.slot.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cache_expiry() {
        let cache = TtlCache::new(Duration::from_millis(50));
        assert_eq!(cache.get().await, None::<f64>);

        cache.set(0.75).await;
        assert_eq!(cache.get().await, Some(0.75));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cache.get().await, None);
    }
}
