use crate::domain::errors::DomainResult;
use crate::domain::{Order, RefundRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// 插入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    Inserted,
    AlreadyExists,
}

/// 订单与退款单存储端口接口
///
/// 更新均为比较并交换：只有存储中的版本号等于传入实体的 `version` 时才写入，
/// 写入成功后实体的 `version` 加一；否则返回 `ConcurrentModification`。
#[async_trait]
pub trait OrderStorePort: Send + Sync {
    /// 插入新订单，商户订单号已存在时不覆盖
    async fn insert_order(&self, order: &Order) -> DomainResult<InsertResult>;

    /// 根据商户订单号查找
    async fn find_order(&self, out_trade_no: &str) -> DomainResult<Option<Order>>;

    /// 根据微信支付订单号查找
    async fn find_by_transaction_id(&self, transaction_id: &str) -> DomainResult<Option<Order>>;

    /// 更新订单
    async fn update_order(&self, order: &mut Order) -> DomainResult<()>;

    /// 已过期但仍为 CREATED 的订单号
    async fn list_overdue(&self, now: DateTime<Utc>) -> DomainResult<Vec<String>>;

    /// 插入新退款单
    async fn insert_refund(&self, refund: &RefundRecord) -> DomainResult<InsertResult>;

    async fn find_refund(&self, out_refund_no: &str) -> DomainResult<Option<RefundRecord>>;

    /// 某订单下的全部退款单
    async fn list_refunds(&self, out_trade_no: &str) -> DomainResult<Vec<RefundRecord>>;

    async fn update_refund(&self, refund: &mut RefundRecord) -> DomainResult<()>;
}

/// 已处理通知ID的去重账本
#[async_trait]
pub trait NotificationLedgerPort: Send + Sync {
    async fn contains(&self, resource_id: &str) -> DomainResult<bool>;

    /// 记录为已处理
    async fn record(&self, resource_id: &str) -> DomainResult<()>;
}
