//! Capability interfaces for durable storage, one per entity.
//!
//! Services depend only on these traits. The in-memory and PostgreSQL
//! backends both implement every one of them.

use async_trait::async_trait;
use common::{OrderId, Page, PageRequest, ProductId, StoreId, UserId};
use domain::{BasketRow, CartItem, Order, OrderStatus, Payment, Product, Store};

use crate::Result;

/// Catalog access needed by the cart and checkout.
#[async_trait]
pub trait ProductRepository: Send + Sync {
    /// Loads a product by ID. Returns None if it doesn't exist.
    async fn find_by_id(&self, id: ProductId) -> Result<Option<Product>>;

    /// Overwrites the stock count of a product.
    ///
    /// Callers must hold the product's stock lock and must have read the
    /// current value under that lock.
    async fn update_stock(&self, id: ProductId, stock: u32) -> Result<()>;
}

/// Durable basket rows backing the cart cache.
#[async_trait]
pub trait BasketRepository: Send + Sync {
    /// Loads the buyer's basket joined with the live catalog, in insertion order.
    ///
    /// Name, price and image come from the current product record, so the
    /// displayed price can differ from the one seen when the line was added.
    async fn load_basket(&self, user_id: UserId) -> Result<Vec<CartItem>>;

    /// Replaces every basket row of the buyer in one atomic unit of work.
    async fn replace_basket(&self, user_id: UserId, rows: &[BasketRow]) -> Result<()>;

    /// Deletes every basket row of the buyer.
    async fn delete_basket(&self, user_id: UserId) -> Result<()>;
}

/// Order and payment record persistence.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Persists a new order together with all its lines, atomically.
    async fn create(&self, order: &Order) -> Result<()>;

    /// Loads an order with its lines and payment record.
    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>>;

    /// Lists a buyer's orders, newest first.
    async fn find_by_user(&self, user_id: UserId, page: PageRequest) -> Result<Page<Order>>;

    /// Lists orders containing at least one product of the store, newest first.
    async fn find_by_store(&self, store_id: StoreId, page: PageRequest) -> Result<Page<Order>>;

    /// Moves the order from `from` to `to` if and only if its current status is `from`.
    ///
    /// Returns false when the order is missing or its status has changed.
    async fn transition_status(&self, id: OrderId, from: OrderStatus, to: OrderStatus)
    -> Result<bool>;

    /// Persists a new payment record.
    async fn create_payment(&self, payment: &Payment) -> Result<()>;

    /// Loads the payment record of an order, if one exists.
    async fn find_payment(&self, order_id: OrderId) -> Result<Option<Payment>>;

    /// Overwrites an existing payment record.
    async fn update_payment(&self, payment: &Payment) -> Result<()>;
}

/// Store lookups used for seller authorization.
#[async_trait]
pub trait StoreRepository: Send + Sync {
    /// Loads the store owned by a user, if any.
    async fn find_by_owner(&self, owner_id: UserId) -> Result<Option<Store>>;
}
