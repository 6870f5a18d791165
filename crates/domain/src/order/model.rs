//! Orders and their line snapshots.

use chrono::{DateTime, Utc};
use common::{OrderId, ProductId, UserId};
use serde::{Deserialize, Serialize};

use super::{OrderStatus, Payment};
use crate::error::CommerceError;
use crate::money::Money;

/// A line of an order, frozen at checkout time.
///
/// Quantity and unit price never change after the order is created,
/// regardless of later catalog edits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: u32,
    /// Catalog price at the moment of checkout.
    pub unit_price: Money,
}

impl OrderLine {
    pub fn new(product_id: ProductId, quantity: u32, unit_price: Money) -> Self {
        Self {
            product_id,
            quantity,
            unit_price,
        }
    }

    /// Returns `unit_price * quantity`.
    pub fn subtotal(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }

    pub fn checked_subtotal(&self) -> Option<Money> {
        self.unit_price.checked_multiply(self.quantity)
    }
}

/// A committed order.
///
/// Created exactly once by checkout together with its lines. Only the status
/// (and the linked payment record) change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub total_amount: Money,
    pub shipping_address: String,
    pub lines: Vec<OrderLine>,
    pub payment: Option<Payment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds a new pending order whose total is the sum of its line subtotals.
    ///
    /// Fails with `Validation` if the total does not fit in `Money`.
    pub fn pending(
        user_id: UserId,
        shipping_address: impl Into<String>,
        lines: Vec<OrderLine>,
    ) -> Result<Self, CommerceError> {
        let total_amount = lines
            .iter()
            .try_fold(Money::zero(), |total, line| {
                line.checked_subtotal().and_then(|s| total.checked_add(s))
            })
            .ok_or_else(|| CommerceError::Validation("order total is too large".to_string()))?;
        let now = Utc::now();
        Ok(Self {
            id: OrderId::new(),
            user_id,
            status: OrderStatus::Pending,
            total_amount,
            shipping_address: shipping_address.into(),
            lines,
            payment: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Returns true if the given user placed this order.
    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }

    /// Returns the distinct products referenced by the order lines.
    pub fn product_ids(&self) -> Vec<ProductId> {
        let mut ids: Vec<ProductId> = self.lines.iter().map(|l| l.product_id).collect();
        ids.sort();
        ids.dedup();
        ids
    }
}
