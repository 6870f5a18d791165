//! Payment records attached to orders.

use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId};
use serde::{Deserialize, Serialize};

use crate::money::Money;

/// Payment method used when the attempt does not specify one.
pub const PAYMENT_METHOD_MOCK: &str = "mock";

/// Status of a payment record.
///
/// ```text
/// Pending ──┬──► Success
///           └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
        }
    }

    /// Parses a stored status name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "success" => Some(PaymentStatus::Success),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Zero-or-one payment record per order, created by the external payment
/// attempt and settled by payment reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub method: String,
    pub status: PaymentStatus,
    pub amount: Money,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Creates a pending payment record for an order.
    pub fn pending(order_id: OrderId, amount: Money, method: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: PaymentId::new(),
            order_id,
            method: method.into(),
            status: PaymentStatus::Pending,
            amount,
            paid_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Settles the payment as successful. Returns false if it was already settled.
    pub fn mark_success(&mut self, at: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = PaymentStatus::Success;
        self.paid_at = Some(at);
        self.updated_at = at;
        true
    }

    /// Settles the payment as failed. Returns false if it was already settled.
    pub fn mark_failed(&mut self, at: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = PaymentStatus::Failed;
        self.updated_at = at;
        true
    }
}
