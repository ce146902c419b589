pub mod deadline;
pub mod dto;
pub mod keyed_lock;
pub mod notification_reconciler;
pub mod order_controller;

pub use deadline::Deadline;
pub use dto::{CreateOrderRequest, ErrorResponse, NotificationAnswer, RefundRequest};
pub use notification_reconciler::NotificationReconciler;
pub use order_controller::{OrderController, OrderSettings};
