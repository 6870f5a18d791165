//! Message contracts exchanged with the payment pipeline.

use serde::{Deserialize, Serialize};

use crate::order::Order;

/// Topic produced after a successful checkout.
pub const TOPIC_ORDER_CREATED: &str = "order.created";

/// Topic consumed when a payment attempt succeeds.
pub const TOPIC_PAYMENT_SUCCESS: &str = "payment.success";

/// Topic consumed when a payment attempt fails.
pub const TOPIC_PAYMENT_FAILED: &str = "payment.failed";

/// Payload of `order.created`. All fields are strings; the total is a decimal string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreatedMessage {
    pub order_id: String,
    pub user_id: String,
    pub total_amount: String,
}

impl From<&Order> for OrderCreatedMessage {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id.to_string(),
            user_id: order.user_id.to_string(),
            total_amount: order.total_amount.to_string(),
        }
    }
}

/// Payload of `payment.success` / `payment.failed`.
///
/// Only `order_id` is required; unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentResultMessage {
    pub order_id: String,
    #[serde(default)]
    pub payment_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Outcome of an out-of-band payment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentOutcome {
    Success,
    Failed,
}

impl PaymentOutcome {
    /// Maps a consumed topic to its outcome.
    pub fn from_topic(topic: &str) -> Option<Self> {
        match topic {
            TOPIC_PAYMENT_SUCCESS => Some(PaymentOutcome::Success),
            TOPIC_PAYMENT_FAILED => Some(PaymentOutcome::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentOutcome::Success => "success",
            PaymentOutcome::Failed => "failed",
        }
    }
}
