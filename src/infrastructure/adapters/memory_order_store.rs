use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::value_objects::OrderStatus;
use crate::domain::{Order, RefundRecord};
use crate::ports::order_store_port::{InsertResult, OrderStorePort};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

/// 内存订单存储，按 key 分片加锁
#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: DashMap<String, Order>,
    transactions: DashMap<String, String>,
    refunds: DashMap<String, RefundRecord>,
    /// out_trade_no -> out_refund_no 列表
    refunds_by_order: DashMap<String, Vec<String>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStorePort for InMemoryOrderStore {
    async fn insert_order(&self, order: &Order) -> DomainResult<InsertResult> {
        match self.orders.entry(order.out_trade_no.clone()) {
            Entry::Occupied(_) => Ok(InsertResult::AlreadyExists),
            Entry::Vacant(slot) => {
                slot.insert(order.clone());
                debug!(out_trade_no = %order.out_trade_no, "Order stored");
                Ok(InsertResult::Inserted)
            }
        }
    }

    async fn find_order(&self, out_trade_no: &str) -> DomainResult<Option<Order>> {
        Ok(self.orders.get(out_trade_no).map(|entry| entry.value().clone()))
    }

    async fn find_by_transaction_id(&self, transaction_id: &str) -> DomainResult<Option<Order>> {
        let Some(out_trade_no) = self
            .transactions
            .get(transaction_id)
            .map(|entry| entry.value().clone())
        else {
            return Ok(None);
        };
        self.find_order(&out_trade_no).await
    }

    async fn update_order(&self, order: &mut Order) -> DomainResult<()> {
        {
            let mut stored = self
                .orders
                .get_mut(&order.out_trade_no)
                .ok_or_else(|| DomainError::OrderNotFound(order.out_trade_no.clone()))?;

            if stored.version != order.version {
                return Err(DomainError::ConcurrentModification(format!(
                    "order {} (stored version {}, expected {})",
                    order.out_trade_no, stored.version, order.version
                )));
            }

            order.version += 1;
            *stored = order.clone();
        }

        if let Some(transaction_id) = &order.transaction_id {
            self.transactions
                .insert(transaction_id.clone(), order.out_trade_no.clone());
        }
        Ok(())
    }

    async fn list_overdue(&self, now: DateTime<Utc>) -> DomainResult<Vec<String>> {
        Ok(self
            .orders
            .iter()
            .filter(|entry| entry.status == OrderStatus::Created && entry.time_expire <= now)
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn insert_refund(&self, refund: &RefundRecord) -> DomainResult<InsertResult> {
        match self.refunds.entry(refund.out_refund_no.clone()) {
            Entry::Occupied(_) => Ok(InsertResult::AlreadyExists),
            Entry::Vacant(slot) => {
                slot.insert(refund.clone());
                self.refunds_by_order
                    .entry(refund.out_trade_no.clone())
                    .or_default()
                    .push(refund.out_refund_no.clone());
                Ok(InsertResult::Inserted)
            }
        }
    }

    async fn find_refund(&self, out_refund_no: &str) -> DomainResult<Option<RefundRecord>> {
        Ok(self.refunds.get(out_refund_no).map(|entry| entry.value().clone()))
    }

    async fn list_refunds(&self, out_trade_no: &str) -> DomainResult<Vec<RefundRecord>> {
        let refund_nos = self
            .refunds_by_order
            .get(out_trade_no)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        let mut refunds: Vec<RefundRecord> = refund_nos
            .iter()
            .filter_map(|no| self.refunds.get(no).map(|entry| entry.value().clone()))
            .collect();
        refunds.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(refunds)
    }

    async fn update_refund(&self, refund: &mut RefundRecord) -> DomainResult<()> {
        let mut stored = self
            .refunds
            .get_mut(&refund.out_refund_no)
            .ok_or_else(|| DomainError::RefundNotFound(refund.out_refund_no.clone()))?;

        if stored.version != refund.version {
            return Err(DomainError::ConcurrentModification(format!(
                "refund {} (stored version {}, expected {})",
                refund.out_refund_no, stored.version, refund.version
            )));
        }

        refund.version += 1;
        *stored = refund.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::{Money, SignalSource};
    use crate::domain::NewOrder;
    use chrono::Duration;

    fn order(out_trade_no: &str) -> Order {
        Order::new(
            NewOrder {
                out_trade_no: out_trade_no.to_string(),
                amount: Money::from_minor_units(100, "CNY"),
                description: "for testing".to_string(),
                time_expire: Utc::now() + Duration::minutes(10),
                attach: None,
                notify_url: "https://example.com/notify".to_string(),
            },
            "weixin://wxpay/bizpayurl?pr=abc".to_string(),
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_insert_is_put_if_absent() {
        let store = InMemoryOrderStore::new();
        assert_eq!(store.insert_order(&order("S1")).await.unwrap(), InsertResult::Inserted);
        assert_eq!(store.insert_order(&order("S1")).await.unwrap(), InsertResult::AlreadyExists);
    }

    #[tokio::test]
    async fn test_update_is_compare_and_swap() {
        let store = InMemoryOrderStore::new();
        store.insert_order(&order("S1")).await.unwrap();

        let mut first = store.find_order("S1").await.unwrap().unwrap();
        let mut second = first.clone();

        first
            .mark_as_paid("TX1".to_string(), SignalSource::Notification, Utc::now())
            .unwrap();
        store.update_order(&mut first).await.unwrap();
        assert_eq!(first.version, 1);

        second.mark_as_closed(Utc::now()).unwrap();
        let stale = store.update_order(&mut second).await;
        assert!(matches!(stale, Err(DomainError::ConcurrentModification(_))));

        let stored = store.find_by_transaction_id("TX1").await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn test_list_refunds_by_order() {
        let store = InMemoryOrderStore::new();
        let now = Utc::now();
        for (no, order_no, at) in [("R2", "S1", 1), ("R1", "S1", 0), ("R3", "S2", 0)] {
            let refund = RefundRecord::new(
                no.to_string(),
                order_no.to_string(),
                10,
                None,
                now + Duration::seconds(at),
            )
            .unwrap();
            assert_eq!(store.insert_refund(&refund).await.unwrap(), InsertResult::Inserted);
        }
        let duplicate = RefundRecord::new("R1".to_string(), "S1".to_string(), 10, None, now).unwrap();
        assert_eq!(store.insert_refund(&duplicate).await.unwrap(), InsertResult::AlreadyExists);

        let refunds = store.list_refunds("S1").await.unwrap();
        let nos: Vec<&str> = refunds.iter().map(|r| r.out_refund_no.as_str()).collect();
        assert_eq!(nos, vec!["R1", "R2"]);
        assert!(store.list_refunds("S9").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_overdue_only_returns_created_orders() {
        let store = InMemoryOrderStore::new();
        store.insert_order(&order("S1")).await.unwrap();
        store.insert_order(&order("S2")).await.unwrap();
        let mut closed = store.find_order("S2").await.unwrap().unwrap();
        closed.mark_as_closed(Utc::now()).unwrap();
        store.update_order(&mut closed).await.unwrap();

        let overdue = store.list_overdue(Utc::now() + Duration::hours(1)).await.unwrap();
        assert_eq!(overdue, vec!["S1".to_string()]);
        assert!(store.list_overdue(Utc::now()).await.unwrap().is_empty());
    }
}
