//! The buyer's pre-checkout basket.

use chrono::{DateTime, Utc};
use common::{ProductId, UserId};
use serde::{Deserialize, Serialize};

use crate::catalog::Product;
use crate::error::CommerceError;
use crate::money::Money;

/// A cart line: product reference, quantity and display fields.
///
/// `price` is the snapshot taken when the line was added (or re-joined from
/// the catalog on a cache miss). Checkout never charges this price; it
/// re-reads the current catalog price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: ProductId,
    pub name: String,
    pub price: Money,
    pub quantity: u32,
    pub image_url: String,
}

impl CartItem {
    /// Creates a line from the current catalog record.
    pub fn from_product(product: &Product, quantity: u32) -> Self {
        Self {
            product_id: product.id,
            name: product.name.clone(),
            price: product.price,
            quantity,
            image_url: product.image_url.clone(),
        }
    }

    pub fn subtotal(&self) -> Money {
        self.price.multiply(self.quantity)
    }
}

/// The durable form of a cart line. Display fields are not stored; they are
/// re-joined from the catalog when the cart is rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasketRow {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// A buyer's cart with its ordered lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub user_id: UserId,
    pub items: Vec<CartItem>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    /// Creates an empty cart for a buyer.
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            items: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn item(&self, product_id: ProductId) -> Option<&CartItem> {
        self.items.iter().find(|i| i.product_id == product_id)
    }

    /// Adds a line, merging quantities if the product is already present.
    ///
    /// Fails with `Validation` if the merged quantity does not fit in a `u32`.
    pub fn add(&mut self, item: CartItem) -> Result<(), CommerceError> {
        match self.items.iter_mut().find(|i| i.product_id == item.product_id) {
            Some(existing) => {
                existing.quantity = existing.quantity.checked_add(item.quantity).ok_or_else(|| {
                    CommerceError::Validation(format!(
                        "quantity of product {} is too large",
                        item.product_id
                    ))
                })?;
            }
            None => self.items.push(item),
        }
        self.touch();
        Ok(())
    }

    /// Sets the quantity of an existing line.
    pub fn set_quantity(&mut self, product_id: ProductId, quantity: u32) -> Result<(), CommerceError> {
        let item = self
            .items
            .iter_mut()
            .find(|i| i.product_id == product_id)
            .ok_or_else(|| CommerceError::not_found("cart item", product_id))?;
        item.quantity = quantity;
        self.touch();
        Ok(())
    }

    /// Removes an existing line.
    pub fn remove(&mut self, product_id: ProductId) -> Result<(), CommerceError> {
        let position = self
            .items
            .iter()
            .position(|i| i.product_id == product_id)
            .ok_or_else(|| CommerceError::not_found("cart item", product_id))?;
        self.items.remove(position);
        self.touch();
        Ok(())
    }

    /// Returns the sum of line subtotals at the snapshotted prices.
    pub fn total(&self) -> Money {
        self.items
            .iter()
            .fold(Money::zero(), |total, item| total.saturating_add(item.subtotal()))
    }

    /// Returns the durable rows for this cart.
    pub fn basket_rows(&self) -> Vec<BasketRow> {
        self.items
            .iter()
            .map(|i| BasketRow {
                product_id: i.product_id,
                quantity: i.quantity,
            })
            .collect()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
