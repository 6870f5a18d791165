//! Domain layer for the marketplace backend.
//!
//! This crate provides the core domain model including:
//! - Money and catalog records (products, stores)
//! - The buyer's cart
//! - Orders with immutable line snapshots, payment records and the order status state machine
//! - The error taxonomy shared by every service
//! - Message contracts exchanged with the payment pipeline

pub mod cart;
pub mod catalog;
pub mod error;
pub mod messages;
pub mod money;
pub mod order;

pub use cart::{BasketRow, Cart, CartItem};
pub use catalog::{Product, Store};
pub use error::{CommerceError, Result};
pub use messages::{
    OrderCreatedMessage, PaymentOutcome, PaymentResultMessage, TOPIC_ORDER_CREATED,
    TOPIC_PAYMENT_FAILED, TOPIC_PAYMENT_SUCCESS,
};
pub use money::{Money, ParseMoneyError};
pub use order::{Order, OrderLine, OrderStatus, PAYMENT_METHOD_MOCK, Payment, PaymentStatus};
