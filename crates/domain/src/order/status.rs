//! Order status state machine.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CommerceError;

/// The status of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Paid ──► Processing ──► Shipping ──► Shipped ──► Completed
///    │          │           │
///    └──────────┴───────────┴──► Cancelled
/// ```
///
/// `Pending → Paid` is driven by payment reconciliation, `Cancelled` by the
/// buyer, and the remaining forward edges by the seller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Order committed, awaiting payment.
    #[default]
    Pending,

    /// Payment confirmed.
    Paid,

    /// Seller is preparing the order.
    Processing,

    /// Handed to the carrier.
    Shipping,

    /// Carrier reports delivery.
    Shipped,

    /// Order closed (terminal state).
    Completed,

    /// Order cancelled by the buyer (terminal state).
    Cancelled,
}

impl OrderStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::Pending,
        OrderStatus::Paid,
        OrderStatus::Processing,
        OrderStatus::Shipping,
        OrderStatus::Shipped,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
    ];

    /// Returns true if the buyer may cancel the order in this status.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::Paid | OrderStatus::Processing
        )
    }

    /// Returns true if a payment success may move the order to `Paid`.
    pub fn can_mark_paid(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// Returns true if this is a terminal status (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// Returns the single seller-driven successor of this status, if any.
    pub fn seller_successor(&self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Paid => Some(OrderStatus::Processing),
            OrderStatus::Processing => Some(OrderStatus::Shipping),
            OrderStatus::Shipping => Some(OrderStatus::Shipped),
            OrderStatus::Shipped => Some(OrderStatus::Completed),
            OrderStatus::Pending | OrderStatus::Completed | OrderStatus::Cancelled => None,
        }
    }

    /// Validates a seller-driven advance from this status to `target`.
    ///
    /// Fails with `NoValidTransition` when this status has no seller edge and
    /// with `InvalidTransition` when it has one that does not lead to `target`.
    pub fn validate_advance(&self, target: OrderStatus) -> Result<(), CommerceError> {
        match self.seller_successor() {
            None => Err(CommerceError::NoValidTransition { from: *self }),
            Some(next) if next == target => Ok(()),
            Some(_) => Err(CommerceError::InvalidTransition {
                from: *self,
                to: target,
            }),
        }
    }

    /// Returns true if the state machine has an edge from this status to `target`.
    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match target {
            OrderStatus::Cancelled => self.is_cancellable(),
            OrderStatus::Paid => self.can_mark_paid(),
            _ => self.seller_successor() == Some(target),
        }
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipping => "shipping",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = CommerceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CommerceError::Validation(format!("unknown order status: {s}")))
    }
}
