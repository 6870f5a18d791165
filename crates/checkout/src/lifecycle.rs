//! Post-checkout order lifecycle: buyer cancellation, seller advances and queries.

use std::sync::Arc;
use std::time::Duration;

use common::{OrderId, Page, PageRequest, UserId};
use domain::{CommerceError, Order, OrderLine, OrderStatus, Result, Store};
use storage::{OrderRepository, ProductRepository, StoreRepository};
use tracing::Instrument;

use crate::keys::stock_lock_key;
use crate::lock::{LockManager, LockPolicy};

/// Enforces the order state machine and who may drive it.
#[derive(Clone)]
pub struct OrderLifecycle {
    orders: Arc<dyn OrderRepository>,
    products: Arc<dyn ProductRepository>,
    stores: Arc<dyn StoreRepository>,
    locks: LockManager,
    stock_lock_ttl: Duration,
}

impl OrderLifecycle {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        products: Arc<dyn ProductRepository>,
        stores: Arc<dyn StoreRepository>,
        locks: LockManager,
        stock_lock_ttl: Duration,
    ) -> Self {
        Self {
            orders,
            products,
            stores,
            locks,
            stock_lock_ttl,
        }
    }

    /// Cancels a buyer's own order and returns its stock.
    ///
    /// The status is claimed first, so of two racing cancellations only one
    /// restores stock. Restoration is best effort per line: a line whose lock
    /// cannot be taken is logged and skipped. Once the status is claimed,
    /// restoration runs on its own task and finishes even if the caller
    /// goes away.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, user_id: UserId, order_id: OrderId) -> Result<Order> {
        let mut order = self.load(order_id).await?;
        if !order.is_owned_by(user_id) {
            return Err(CommerceError::Forbidden(
                "order belongs to another buyer".to_string(),
            ));
        }
        if !order.status.is_cancellable() {
            return Err(CommerceError::InvalidStatus {
                status: order.status,
                action: "cancel",
            });
        }

        let claimed = self
            .orders
            .transition_status(order_id, order.status, OrderStatus::Cancelled)
            .await?;
        if !claimed {
            let current = self.current_status(order_id, order.status).await;
            return Err(CommerceError::InvalidStatus {
                status: current,
                action: "cancel",
            });
        }

        let this = self.clone();
        let lines = order.lines.clone();
        let restoring = tokio::spawn(
            async move {
                let mut skipped = 0usize;
                for line in &lines {
                    if !this.restore_line(order_id, line).await {
                        skipped += 1;
                    }
                }
                skipped
            }
            .in_current_span(),
        );
        let skipped = restoring.await.unwrap_or_else(|e| {
            tracing::error!(%order_id, error = %e, "stock restore task did not finish");
            order.lines.len()
        });

        metrics::counter!("orders_cancelled_total").increment(1);
        tracing::info!(%order_id, from = %order.status, skipped, "order cancelled");

        order.status = OrderStatus::Cancelled;
        Ok(order)
    }

    /// Returns true if the line's quantity was added back to stock.
    async fn restore_line(&self, order_id: OrderId, line: &OrderLine) -> bool {
        let product_id = line.product_id;
        let handle = match self
            .locks
            .acquire_with_policy(
                &stock_lock_key(product_id),
                self.stock_lock_ttl,
                LockPolicy::FailClosed,
                None,
            )
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(%order_id, %product_id, error = %e, "skipping stock restore, lock unavailable");
                return false;
            }
        };

        let restored = match self.products.find_by_id(product_id).await {
            Ok(Some(product)) => {
                let stock = product.stock.saturating_add(line.quantity);
                match self.products.update_stock(product_id, stock).await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(%order_id, %product_id, error = %e, "failed to restore stock");
                        false
                    }
                }
            }
            Ok(None) => {
                tracing::warn!(%order_id, %product_id, "product no longer exists, stock not restored");
                false
            }
            Err(e) => {
                tracing::warn!(%order_id, %product_id, error = %e, "failed to read product for restore");
                false
            }
        };

        self.locks.release(handle).await;
        restored
    }

    /// Moves an order one step along the seller path.
    ///
    /// The seller must own a store supplying at least one product of the order.
    #[tracing::instrument(skip(self))]
    pub async fn advance(
        &self,
        seller_id: UserId,
        order_id: OrderId,
        target: OrderStatus,
    ) -> Result<Order> {
        let mut order = self.load(order_id).await?;
        let store = self
            .stores
            .find_by_owner(seller_id)
            .await?
            .ok_or_else(|| CommerceError::Forbidden("caller does not own a store".to_string()))?;
        if !self.store_supplies(&store, &order).await? {
            return Err(CommerceError::Forbidden(
                "order contains no products from this store".to_string(),
            ));
        }

        order.status.validate_advance(target)?;

        let applied = self
            .orders
            .transition_status(order_id, order.status, target)
            .await?;
        if !applied {
            let current = self.current_status(order_id, order.status).await;
            return Err(CommerceError::InvalidTransition {
                from: current,
                to: target,
            });
        }

        metrics::counter!("order_status_advanced_total", "to" => target.as_str()).increment(1);
        tracing::info!(%order_id, from = %order.status, to = %target, "order status advanced");

        order.status = target;
        Ok(order)
    }

    async fn store_supplies(&self, store: &Store, order: &Order) -> Result<bool> {
        for product_id in order.product_ids() {
            if let Some(product) = self.products.find_by_id(product_id).await?
                && product.store_id == store.id
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Returns a buyer's own order.
    pub async fn get_order(&self, user_id: UserId, order_id: OrderId) -> Result<Order> {
        let order = self.load(order_id).await?;
        if !order.is_owned_by(user_id) {
            return Err(CommerceError::Forbidden(
                "order belongs to another buyer".to_string(),
            ));
        }
        Ok(order)
    }

    /// Lists a buyer's orders, newest first.
    pub async fn list_orders(&self, user_id: UserId, page: PageRequest) -> Result<Page<Order>> {
        Ok(self.orders.find_by_user(user_id, page).await?)
    }

    /// Lists orders that include products of the seller's store, newest first.
    pub async fn list_seller_orders(
        &self,
        seller_id: UserId,
        page: PageRequest,
    ) -> Result<Page<Order>> {
        let store = self
            .stores
            .find_by_owner(seller_id)
            .await?
            .ok_or_else(|| CommerceError::not_found("store", seller_id))?;
        Ok(self.orders.find_by_store(store.id, page).await?)
    }

    async fn load(&self, order_id: OrderId) -> Result<Order> {
        self.orders
            .find_by_id(order_id)
            .await?
            .ok_or(CommerceError::OrderNotFound(order_id))
    }

    async fn current_status(&self, order_id: OrderId, fallback: OrderStatus) -> OrderStatus {
        match self.orders.find_by_id(order_id).await {
            Ok(Some(order)) => order.status,
            _ => fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{Money, Product};
    use storage::{InMemoryDatabase, InMemoryLockStore};

    struct Fixture {
        db: InMemoryDatabase,
        lifecycle: OrderLifecycle,
        store: Store,
        product: Product,
    }

    async fn fixture() -> Fixture {
        let db = InMemoryDatabase::new();
        let store = Store::new(UserId::new(), "Corner Shop");
        let product = Product::new(store.id, "Lamp", Money::from_cents(2500), 3);
        db.insert_store(store.clone()).await;
        db.insert_product(product.clone()).await;

        let db_arc = Arc::new(db.clone());
        let lifecycle = OrderLifecycle::new(
            db_arc.clone(),
            db_arc.clone(),
            db_arc,
            LockManager::new(Arc::new(InMemoryLockStore::new()), Default::default()),
            Duration::from_secs(10),
        );
        Fixture {
            db,
            lifecycle,
            store,
            product,
        }
    }

    async fn place(f: &Fixture, buyer: UserId, status: OrderStatus) -> Order {
        let mut order = Order::pending(
            buyer,
            "1 Main St",
            vec![OrderLine::new(f.product.id, 2, f.product.price)],
        )
        .unwrap();
        order.status = status;
        f.db.create(&order).await.unwrap();
        order
    }

    #[tokio::test]
    async fn test_cancel_only_from_cancellable_statuses() {
        let f = fixture().await;
        let buyer = UserId::new();

        for status in OrderStatus::ALL {
            let order = place(&f, buyer, status).await;
            let result = f.lifecycle.cancel(buyer, order.id).await;
            if status.is_cancellable() {
                assert_eq!(result.unwrap().status, OrderStatus::Cancelled);
            } else {
                assert!(
                    matches!(result, Err(CommerceError::InvalidStatus { .. })),
                    "cancel from {status} should fail"
                );
            }
        }
    }

    #[tokio::test]
    async fn test_cancel_by_stranger_is_forbidden() {
        let f = fixture().await;
        let order = place(&f, UserId::new(), OrderStatus::Pending).await;

        assert!(matches!(
            f.lifecycle.cancel(UserId::new(), order.id).await,
            Err(CommerceError::Forbidden(_))
        ));
        assert_eq!(f.db.product_stock(f.product.id).await, Some(3));
    }

    #[tokio::test]
    async fn test_advance_only_from_seller_statuses() {
        let f = fixture().await;
        let seller = f.store.owner_id;

        for status in OrderStatus::ALL {
            let order = place(&f, UserId::new(), status).await;
            let result = match status.seller_successor() {
                Some(next) => f.lifecycle.advance(seller, order.id, next).await,
                None => f.lifecycle.advance(seller, order.id, OrderStatus::Processing).await,
            };
            match status {
                OrderStatus::Paid
                | OrderStatus::Processing
                | OrderStatus::Shipping
                | OrderStatus::Shipped => assert!(result.is_ok(), "advance from {status}"),
                _ => assert!(
                    matches!(result, Err(CommerceError::NoValidTransition { .. })),
                    "advance from {status} should fail"
                ),
            }
        }
    }

    #[tokio::test]
    async fn test_advance_to_wrong_target() {
        let f = fixture().await;
        let order = place(&f, UserId::new(), OrderStatus::Paid).await;

        let err = f
            .lifecycle
            .advance(f.store.owner_id, order.id, OrderStatus::Shipped)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CommerceError::InvalidTransition {
                from: OrderStatus::Paid,
                to: OrderStatus::Shipped
            }
        );
    }

    #[tokio::test]
    async fn test_advance_requires_supplying_store() {
        let f = fixture().await;
        let order = place(&f, UserId::new(), OrderStatus::Paid).await;

        assert!(matches!(
            f.lifecycle
                .advance(UserId::new(), order.id, OrderStatus::Processing)
                .await,
            Err(CommerceError::Forbidden(_))
        ));

        let other = Store::new(UserId::new(), "Other Shop");
        f.db.insert_store(other.clone()).await;
        assert!(matches!(
            f.lifecycle
                .advance(other.owner_id, order.id, OrderStatus::Processing)
                .await,
            Err(CommerceError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_queries_are_scoped() {
        let f = fixture().await;
        let buyer = UserId::new();
        let order = place(&f, buyer, OrderStatus::Pending).await;

        assert_eq!(f.lifecycle.get_order(buyer, order.id).await.unwrap().id, order.id);
        assert!(matches!(
            f.lifecycle.get_order(UserId::new(), order.id).await,
            Err(CommerceError::Forbidden(_))
        ));
        assert!(matches!(
            f.lifecycle.get_order(buyer, OrderId::new()).await,
            Err(CommerceError::OrderNotFound(_))
        ));

        let page = f.lifecycle.list_orders(buyer, PageRequest::default()).await.unwrap();
        assert_eq!(page.total, 1);

        let seller_page = f
            .lifecycle
            .list_seller_orders(f.store.owner_id, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(seller_page.total, 1);
        assert!(matches!(
            f.lifecycle
                .list_seller_orders(UserId::new(), PageRequest::default())
                .await,
            Err(CommerceError::NotFound { entity: "store", .. })
        ));
    }
}
