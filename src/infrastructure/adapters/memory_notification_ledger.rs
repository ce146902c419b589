use crate::domain::errors::{DomainError, DomainResult};
use crate::ports::order_store_port::NotificationLedgerPort;
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

#[derive(Default)]
struct Recent {
    ids: HashSet<String>,
    order: VecDeque<String>,
}

/// 有界的最近通知ID缓存，超出容量时淘汰最早的记录
pub struct RecentNotificationLedger {
    capacity: usize,
    recent: Mutex<Recent>,
}

impl RecentNotificationLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            recent: Mutex::new(Recent::default()),
        }
    }

    fn lock(&self) -> DomainResult<std::sync::MutexGuard<'_, Recent>> {
        self.recent
            .lock()
            .map_err(|e| DomainError::InternalError(format!("Notification ledger poisoned: {}", e)))
    }
}

#[async_trait]
impl NotificationLedgerPort for RecentNotificationLedger {
    async fn contains(&self, resource_id: &str) -> DomainResult<bool> {
        Ok(self.lock()?.ids.contains(resource_id))
    }

    async fn record(&self, resource_id: &str) -> DomainResult<()> {
        let mut recent = self.lock()?;
        if !recent.ids.insert(resource_id.to_string()) {
            return Ok(());
        }
        recent.order.push_back(resource_id.to_string());
        while recent.order.len() > self.capacity {
            if let Some(evicted) = recent.order.pop_front() {
                recent.ids.remove(&evicted);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_evicts_oldest_beyond_capacity() {
        let ledger = RecentNotificationLedger::new(2);
        ledger.record("a").await.unwrap();
        ledger.record("b").await.unwrap();
        ledger.record("a").await.unwrap();
        ledger.record("c").await.unwrap();

        assert!(!ledger.contains("a").await.unwrap());
        assert!(ledger.contains("b").await.unwrap());
        assert!(ledger.contains("c").await.unwrap());
    }
}
