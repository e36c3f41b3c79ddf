//! Per-zone write serialisation.
//!
//! Writers to the same zone queue on one async mutex; different zones never share a lock.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
pub struct ZoneLocks {
    slots: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

pub type ZoneGuard = OwnedMutexGuard<()>;

impl ZoneLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keyed by provider and canonical zone name, so the lock can be taken before the
    /// zone has a local row.
    pub async fn lock(&self, provider_id: i64, zone: &str) -> ZoneGuard {
        let key = format!("{provider_id}:{}", zone.trim_end_matches('.').to_ascii_lowercase());
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            // guards and waiters hold a clone; a lone map reference is idle
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            slots.entry(key).or_default().clone()
        };
        slot.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_zone_serialises() {
        let locks = Arc::new(ZoneLocks::new());
        let guard = locks.lock(1, "example.com.").await;

        let other = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = other.lock(1, "EXAMPLE.com").await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn different_zones_do_not_block() {
        let locks = ZoneLocks::new();
        let _a = locks.lock(1, "example.com.").await;
        let b = tokio::time::timeout(Duration::from_millis(200), locks.lock(1, "example.org."))
            .await;
        assert!(b.is_ok());
        let c = tokio::time::timeout(Duration::from_millis(200), locks.lock(2, "example.com."))
            .await;
        assert!(c.is_ok());
    }
}
