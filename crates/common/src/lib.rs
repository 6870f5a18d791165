//! Shared types for the marketplace backend.

pub mod pagination;
pub mod types;

pub use pagination::{Page, PageRequest};
pub use types::{OrderId, PaymentId, ProductId, StoreId, UserId};
