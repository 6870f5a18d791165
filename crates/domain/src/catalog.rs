//! Catalog records read by the cart and checkout.

use chrono::{DateTime, Utc};
use common::{ProductId, StoreId, UserId};
use serde::{Deserialize, Serialize};

use crate::money::Money;

/// A product offered by a store.
///
/// Stock is unsigned: it can never be represented as negative, and every
/// decrement is preceded by a sufficiency check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub store_id: StoreId,
    pub name: String,
    pub price: Money,
    pub stock: u32,
    pub image_url: String,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn new(store_id: StoreId, name: impl Into<String>, price: Money, stock: u32) -> Self {
        Self {
            id: ProductId::new(),
            store_id,
            name: name.into(),
            price,
            stock,
            image_url: String::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_image_url(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = image_url.into();
        self
    }

    /// Returns true if the current stock covers `quantity`.
    pub fn has_stock_for(&self, quantity: u32) -> bool {
        self.stock >= quantity
    }
}

/// A seller's store. Each seller owns at most one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Store {
    pub id: StoreId,
    pub owner_id: UserId,
    pub name: String,
}

impl Store {
    pub fn new(owner_id: UserId, name: impl Into<String>) -> Self {
        Self {
            id: StoreId::new(),
            owner_id,
            name: name.into(),
        }
    }
}
