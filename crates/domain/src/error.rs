//! Domain error types.

use common::{OrderId, ProductId};
use thiserror::Error;

use crate::order::OrderStatus;

/// Errors surfaced by the cart, checkout, order lifecycle and payment
/// reconciliation operations.
///
/// Every variant maps to a stable machine-readable code via [`CommerceError::code`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommerceError {
    /// A cart, order, store or cart line is missing.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("order not found: {0}")]
    OrderNotFound(OrderId),

    /// The caller does not own the resource it is acting on.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The order is not in a status that permits the requested action.
    #[error("cannot {action} order with status {status}")]
    InvalidStatus {
        status: OrderStatus,
        action: &'static str,
    },

    /// The source status has outgoing edges, but not to the requested target.
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// The source status has no seller-driven outgoing edges at all.
    #[error("cannot transition from status {from}")]
    NoValidTransition { from: OrderStatus },

    #[error("insufficient stock for product {product_name} ({product_id}): requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        product_name: String,
        requested: u32,
        available: u32,
    },

    #[error("cart is empty")]
    EmptyCart,

    /// A named lock could not be obtained in time.
    #[error("resource is busy, please try again ({key})")]
    LockUnavailable { key: String },

    /// Stock locks for a checkout could not be obtained; the caller should retry.
    #[error("failed to process checkout, please try again")]
    CheckoutUnavailable,

    /// Stock application or order creation failed after validation passed.
    /// Any applied stock changes have been rolled back.
    #[error("failed to process checkout: {0}")]
    CheckoutFailed(String),

    #[error("validation failed: {0}")]
    Validation(String),

    /// The caller-supplied deadline expired before any stock was touched.
    #[error("deadline exceeded during {0}")]
    DeadlineExceeded(&'static str),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CommerceError {
    /// Shorthand for [`CommerceError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        CommerceError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Returns the stable error code exposed to clients.
    pub fn code(&self) -> &'static str {
        match self {
            CommerceError::NotFound { .. }
            | CommerceError::ProductNotFound(_)
            | CommerceError::OrderNotFound(_) => "NOT_FOUND",
            CommerceError::Forbidden(_) => "FORBIDDEN",
            CommerceError::InvalidStatus { .. } => "INVALID_STATUS",
            CommerceError::InvalidTransition { .. } => "INVALID_TRANSITION",
            CommerceError::NoValidTransition { .. } => "NO_VALID_TRANSITION",
            CommerceError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            CommerceError::EmptyCart => "EMPTY_CART",
            CommerceError::LockUnavailable { .. } => "LOCK_UNAVAILABLE",
            CommerceError::CheckoutUnavailable => "CHECKOUT_UNAVAILABLE",
            CommerceError::CheckoutFailed(_) => "CHECKOUT_FAILED",
            CommerceError::Validation(_) => "VALIDATION_ERROR",
            CommerceError::DeadlineExceeded(_) => "REQUEST_TIMEOUT",
            CommerceError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns true if retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CommerceError::LockUnavailable { .. }
                | CommerceError::CheckoutUnavailable
                | CommerceError::DeadlineExceeded(_)
        )
    }
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, CommerceError>;
