pub mod entities;
pub mod errors;
pub mod events;
pub mod trade_no;
pub mod value_objects;

pub use entities::{NewOrder, Order, RefundRecord};
pub use errors::{DomainError, DomainResult};
pub use events::*;
pub use trade_no::TradeNoGenerator;
pub use value_objects::{Money, OrderRef, OrderStatus, RefundState, RefundStatus, SignalSource};
