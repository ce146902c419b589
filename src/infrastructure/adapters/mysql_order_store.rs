use crate::domain::entities::StatusTransition;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::value_objects::{Money, OrderStatus, RefundStatus, SignalSource};
use crate::domain::{Order, RefundRecord};
use crate::ports::order_store_port::{InsertResult, OrderStorePort};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{MySql, Pool};
use std::sync::Arc;
use tracing::{debug, error};

const ORDER_COLUMNS: &str = r#"
    id, out_trade_no, transaction_id, amount_minor_units, currency, status,
    description, time_expire, attach, notify_url, payment_target, paid_via,
    created_at, last_transition_at, paid_at, version, history
"#;

const REFUND_COLUMNS: &str = r#"
    out_refund_no, out_trade_no, refund_amount_minor_units, status, reason,
    refund_id, created_at, updated_at, version
"#;

/// MySQL订单存储实现
#[derive(Clone)]
pub struct MySqlOrderStore {
    pool: Arc<Pool<MySql>>,
}

impl MySqlOrderStore {
    pub fn new(pool: Arc<Pool<MySql>>) -> Self {
        Self { pool }
    }

    async fn fetch_order(&self, column: &str, value: &str) -> DomainResult<Option<Order>> {
        let query = format!("SELECT {} FROM orders WHERE {} = ?", ORDER_COLUMNS, column);

        let row = sqlx::query_as::<_, OrderRow>(&query)
            .bind(value)
            .fetch_optional(self.pool.as_ref())
            .await?;

        row.map(OrderRow::into_order).transpose()
    }
}

fn is_duplicate(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

#[async_trait]
impl OrderStorePort for MySqlOrderStore {
    async fn insert_order(&self, order: &Order) -> DomainResult<InsertResult> {
        let query = format!(
            "INSERT INTO orders ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            ORDER_COLUMNS
        );

        let result = sqlx::query(&query)
            .bind(order.id)
            .bind(&order.out_trade_no)
            .bind(&order.transaction_id)
            .bind(order.amount.to_minor_units())
            .bind(&order.amount.currency)
            .bind(order.status.as_str())
            .bind(&order.description)
            .bind(order.time_expire)
            .bind(&order.attach)
            .bind(&order.notify_url)
            .bind(&order.payment_target)
            .bind(order.paid_via.map(SignalSource::as_str))
            .bind(order.created_at)
            .bind(order.last_transition_at)
            .bind(order.paid_at)
            .bind(order.version)
            .bind(Json(&order.history))
            .execute(self.pool.as_ref())
            .await;

        match result {
            Ok(_) => {
                debug!("Payment order saved: {}", order.out_trade_no);
                Ok(InsertResult::Inserted)
            }
            Err(e) if is_duplicate(&e) => Ok(InsertResult::AlreadyExists),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_order(&self, out_trade_no: &str) -> DomainResult<Option<Order>> {
        self.fetch_order("out_trade_no", out_trade_no).await
    }

    async fn find_by_transaction_id(&self, transaction_id: &str) -> DomainResult<Option<Order>> {
        self.fetch_order("transaction_id", transaction_id).await
    }

    async fn update_order(&self, order: &mut Order) -> DomainResult<()> {
        let query = r#"
            UPDATE orders
            SET transaction_id = ?, status = ?, paid_via = ?, last_transition_at = ?,
                paid_at = ?, history = ?, version = version + 1
            WHERE out_trade_no = ? AND version = ?
        "#;

        let rows_affected = sqlx::query(query)
            .bind(&order.transaction_id)
            .bind(order.status.as_str())
            .bind(order.paid_via.map(SignalSource::as_str))
            .bind(order.last_transition_at)
            .bind(order.paid_at)
            .bind(Json(&order.history))
            .bind(&order.out_trade_no)
            .bind(order.version)
            .execute(self.pool.as_ref())
            .await?
            .rows_affected();

        if rows_affected == 0 {
            return match self.find_order(&order.out_trade_no).await? {
                Some(_) => Err(DomainError::ConcurrentModification(format!(
                    "order {} (expected version {})",
                    order.out_trade_no, order.version
                ))),
                None => {
                    error!("No order found to update: {}", order.out_trade_no);
                    Err(DomainError::OrderNotFound(order.out_trade_no.clone()))
                }
            };
        }

        order.version += 1;
        debug!("Payment order updated: {}", order.out_trade_no);
        Ok(())
    }

    async fn list_overdue(&self, now: DateTime<Utc>) -> DomainResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT out_trade_no FROM orders WHERE status = ? AND time_expire <= ?",
        )
        .bind(OrderStatus::Created.as_str())
        .bind(now)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows.into_iter().map(|(no,)| no).collect())
    }

    async fn insert_refund(&self, refund: &RefundRecord) -> DomainResult<InsertResult> {
        let query = format!(
            "INSERT INTO refunds ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            REFUND_COLUMNS
        );

        let result = sqlx::query(&query)
            .bind(&refund.out_refund_no)
            .bind(&refund.out_trade_no)
            .bind(refund.refund_amount_minor_units)
            .bind(refund.status.as_str())
            .bind(&refund.reason)
            .bind(&refund.refund_id)
            .bind(refund.created_at)
            .bind(refund.updated_at)
            .bind(refund.version)
            .execute(self.pool.as_ref())
            .await;

        match result {
            Ok(_) => Ok(InsertResult::Inserted),
            Err(e) if is_duplicate(&e) => Ok(InsertResult::AlreadyExists),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_refund(&self, out_refund_no: &str) -> DomainResult<Option<RefundRecord>> {
        let query = format!("SELECT {} FROM refunds WHERE out_refund_no = ?", REFUND_COLUMNS);

        let row = sqlx::query_as::<_, RefundRow>(&query)
            .bind(out_refund_no)
            .fetch_optional(self.pool.as_ref())
            .await?;

        row.map(RefundRow::into_refund).transpose()
    }

    async fn list_refunds(&self, out_trade_no: &str) -> DomainResult<Vec<RefundRecord>> {
        let query = format!(
            "SELECT {} FROM refunds WHERE out_trade_no = ? ORDER BY created_at",
            REFUND_COLUMNS
        );

        sqlx::query_as::<_, RefundRow>(&query)
            .bind(out_trade_no)
            .fetch_all(self.pool.as_ref())
            .await?
            .into_iter()
            .map(RefundRow::into_refund)
            .collect()
    }

    async fn update_refund(&self, refund: &mut RefundRecord) -> DomainResult<()> {
        let query = r#"
            UPDATE refunds
            SET status = ?, refund_id = ?, updated_at = ?, version = version + 1
            WHERE out_refund_no = ? AND version = ?
        "#;

        let rows_affected = sqlx::query(query)
            .bind(refund.status.as_str())
            .bind(&refund.refund_id)
            .bind(refund.updated_at)
            .bind(&refund.out_refund_no)
            .bind(refund.version)
            .execute(self.pool.as_ref())
            .await?
            .rows_affected();

        if rows_affected == 0 {
            return match self.find_refund(&refund.out_refund_no).await? {
                Some(_) => Err(DomainError::ConcurrentModification(format!(
                    "refund {} (expected version {})",
                    refund.out_refund_no, refund.version
                ))),
                None => Err(DomainError::RefundNotFound(refund.out_refund_no.clone())),
            };
        }

        refund.version += 1;
        Ok(())
    }
}

/// 订单表行结构体
#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: uuid::Uuid,
    out_trade_no: String,
    transaction_id: Option<String>,
    amount_minor_units: i64,
    currency: String,
    status: String,
    description: String,
    time_expire: DateTime<Utc>,
    attach: Option<String>,
    notify_url: String,
    payment_target: String,
    paid_via: Option<String>,
    created_at: DateTime<Utc>,
    last_transition_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
    version: u64,
    history: Json<Vec<StatusTransition>>,
}

impl OrderRow {
    fn into_order(self) -> DomainResult<Order> {
        let status = OrderStatus::parse(&self.status).ok_or_else(|| {
            DomainError::InternalError(format!("Invalid order status: {}", self.status))
        })?;
        let paid_via = match self.paid_via.as_deref() {
            None => None,
            Some(raw) => Some(SignalSource::parse(raw).ok_or_else(|| {
                DomainError::InternalError(format!("Invalid signal source: {}", raw))
            })?),
        };

        Ok(Order {
            id: self.id,
            out_trade_no: self.out_trade_no,
            transaction_id: self.transaction_id,
            amount: Money::from_minor_units(self.amount_minor_units, self.currency),
            status,
            description: self.description,
            time_expire: self.time_expire,
            attach: self.attach,
            notify_url: self.notify_url,
            payment_target: self.payment_target,
            paid_via,
            created_at: self.created_at,
            last_transition_at: self.last_transition_at,
            paid_at: self.paid_at,
            version: self.version,
            history: self.history.0,
        })
    }
}

/// 退款表行结构体
#[derive(Debug, sqlx::FromRow)]
struct RefundRow {
    out_refund_no: String,
    out_trade_no: String,
    refund_amount_minor_units: i64,
    status: String,
    reason: Option<String>,
    refund_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
}

impl RefundRow {
    fn into_refund(self) -> DomainResult<RefundRecord> {
        let status = RefundStatus::parse(&self.status).ok_or_else(|| {
            DomainError::InternalError(format!("Invalid refund status: {}", self.status))
        })?;

        Ok(RefundRecord {
            out_refund_no: self.out_refund_no,
            out_trade_no: self.out_trade_no,
            refund_amount_minor_units: self.refund_amount_minor_units,
            status,
            reason: self.reason,
            refund_id: self.refund_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            version: self.version,
        })
    }
}
