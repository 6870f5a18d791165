//! Checkout orchestrator: turns a cart into a committed order.
//!
//! The protocol runs in six phases:
//!
//! 1. Take one stock lock per distinct product in the cart (sorted by id).
//! 2. Re-read every product, check stock and price the order. No writes.
//! 3. Decrement stock line by line, recording the inverse in an [`UndoLog`].
//! 4. Create the order with its line snapshots in one durable write.
//! 5. Clear the cart (best effort).
//! 6. Publish `order.created` (best effort).
//!
//! A failure in phase 3 or 4 replays the undo log before the error is
//! returned. Locks are released on every path.
//!
//! The protocol runs on its own task. Dropping the future returned by
//! [`CheckoutOrchestrator::checkout`] detaches the caller; the task still
//! reaches a committed or rolled-back outcome and releases its locks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::{ProductId, UserId};
use domain::{
    Cart, CommerceError, Order, OrderCreatedMessage, OrderLine, Result, TOPIC_ORDER_CREATED,
};
use storage::{EventPublisher, OrderRepository, ProductRepository};
use tokio::time::Instant;
use tracing::Instrument;

use crate::cart::CartStore;
use crate::keys::stock_lock_key;
use crate::lock::{LockError, LockHandle, LockManager, LockPolicy};
use crate::undo::{UndoAction, UndoLog};

/// Checkout settings.
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// TTL of each stock lock. Bounds how long a crashed checkout can block a product.
    pub stock_lock_ttl: Duration,
    /// Checkout refuses to run without stock locks.
    pub lock_policy: LockPolicy,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            stock_lock_ttl: Duration::from_secs(10),
            lock_policy: LockPolicy::FailClosed,
        }
    }
}

/// A buyer's request to check out their cart.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub user_id: UserId,
    pub shipping_address: String,
    /// Bounds lock waits and validation. Once stock is touched the
    /// checkout always runs to a committed or rolled-back outcome.
    pub deadline: Option<Instant>,
}

impl CheckoutRequest {
    pub fn new(user_id: UserId, shipping_address: impl Into<String>) -> Self {
        Self {
            user_id,
            shipping_address: shipping_address.into(),
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// One planned stock change, captured during validation.
#[derive(Debug, Clone, Copy)]
struct StockChange {
    product_id: ProductId,
    before: u32,
    after: u32,
}

/// Converts carts into orders under per-product stock locks.
#[derive(Clone)]
pub struct CheckoutOrchestrator {
    carts: CartStore,
    products: Arc<dyn ProductRepository>,
    orders: Arc<dyn OrderRepository>,
    publisher: Arc<dyn EventPublisher>,
    locks: LockManager,
    config: CheckoutConfig,
}

impl CheckoutOrchestrator {
    pub fn new(
        carts: CartStore,
        products: Arc<dyn ProductRepository>,
        orders: Arc<dyn OrderRepository>,
        publisher: Arc<dyn EventPublisher>,
        locks: LockManager,
        config: CheckoutConfig,
    ) -> Self {
        Self {
            carts,
            products,
            orders,
            publisher,
            locks,
            config,
        }
    }

    /// Checks out the buyer's cart and returns the committed order.
    #[tracing::instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn checkout(&self, request: CheckoutRequest) -> Result<Order> {
        let this = self.clone();
        let task =
            tokio::spawn(async move { this.run_recorded(request).await }.in_current_span());
        match task.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "checkout task did not finish");
                Err(CommerceError::Internal("checkout task did not finish".to_string()))
            }
        }
    }

    async fn run_recorded(&self, request: CheckoutRequest) -> Result<Order> {
        metrics::counter!("checkout_attempts_total").increment(1);
        let started = std::time::Instant::now();

        let result = self.run(&request).await;

        metrics::histogram!("checkout_duration_seconds").record(started.elapsed().as_secs_f64());
        match &result {
            Ok(order) => {
                metrics::counter!("checkout_completed_total").increment(1);
                tracing::info!(
                    order_id = %order.id,
                    total = %order.total_amount,
                    lines = order.lines.len(),
                    "checkout completed"
                );
            }
            Err(e) => {
                metrics::counter!("checkout_failed_total", "reason" => e.code()).increment(1);
                tracing::info!(error = %e, code = e.code(), "checkout rejected");
            }
        }
        result
    }

    async fn run(&self, request: &CheckoutRequest) -> Result<Order> {
        let shipping_address = request.shipping_address.trim();
        if shipping_address.is_empty() {
            return Err(CommerceError::Validation(
                "shipping address is required".to_string(),
            ));
        }

        let cart = self.carts.get(request.user_id).await.map_err(|e| {
            tracing::warn!(error = %e, "failed to load cart for checkout");
            CommerceError::not_found("cart", request.user_id)
        })?;
        if cart.is_empty() {
            return Err(CommerceError::EmptyCart);
        }

        let handles = self.acquire_stock_locks(&cart, request).await?;
        let result = self.run_locked(&cart, request, shipping_address).await;
        self.locks.release_all(handles).await;
        result
    }

    /// Phase 1. On any failure the locks taken so far are released.
    async fn acquire_stock_locks(
        &self,
        cart: &Cart,
        request: &CheckoutRequest,
    ) -> Result<Vec<LockHandle>> {
        let mut product_ids: Vec<ProductId> = cart.items.iter().map(|i| i.product_id).collect();
        product_ids.sort();
        product_ids.dedup();

        let mut handles = Vec::with_capacity(product_ids.len());
        for product_id in product_ids {
            let acquired = self
                .locks
                .acquire_with_policy(
                    &stock_lock_key(product_id),
                    self.config.stock_lock_ttl,
                    self.config.lock_policy,
                    request.deadline,
                )
                .await;

            match acquired {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    self.locks.release_all(handles).await;
                    return Err(self.lock_failure(err, request));
                }
            }
        }
        Ok(handles)
    }

    fn lock_failure(&self, err: LockError, request: &CheckoutRequest) -> CommerceError {
        tracing::warn!(key = %err.key(), error = %err, "could not lock stock for checkout");
        if matches!(err, LockError::Contended { .. }) && request.deadline_passed() {
            return CommerceError::DeadlineExceeded("lock acquisition");
        }
        CommerceError::CheckoutUnavailable
    }

    /// Phases 2 to 6, with every stock lock held.
    async fn run_locked(
        &self,
        cart: &Cart,
        request: &CheckoutRequest,
        shipping_address: &str,
    ) -> Result<Order> {
        let (lines, changes) = self.validate(cart).await?;
        let order = Order::pending(request.user_id, shipping_address, lines)?;

        if request.deadline_passed() {
            return Err(CommerceError::DeadlineExceeded("validation"));
        }

        // Phase 3
        let mut undo = UndoLog::new();
        for change in &changes {
            if let Err(e) = self
                .products
                .update_stock(change.product_id, change.after)
                .await
            {
                tracing::error!(
                    product_id = %change.product_id,
                    applied = undo.len(),
                    error = %e,
                    "stock update failed, rolling back"
                );
                self.roll_back(undo).await;
                return Err(CommerceError::CheckoutFailed(format!(
                    "failed to update stock for product {}",
                    change.product_id
                )));
            }
            undo.push(UndoAction::RestoreStock {
                product_id: change.product_id,
                stock: change.before,
            });
        }

        // Phase 4
        if let Err(e) = self.orders.create(&order).await {
            tracing::error!(order_id = %order.id, error = %e, "order creation failed, rolling back");
            self.roll_back(undo).await;
            return Err(CommerceError::CheckoutFailed(
                "failed to create order".to_string(),
            ));
        }

        // Phase 5. The order is final; a stale cart is only a display problem.
        if let Err(e) = self.carts.clear(request.user_id).await {
            metrics::counter!("checkout_cart_clear_failures_total").increment(1);
            tracing::warn!(order_id = %order.id, error = %e, "failed to clear cart after checkout");
        }

        // Phase 6
        self.publish_order_created(&order).await;

        Ok(order)
    }

    /// Phase 2: read-only. Prices come from the catalog, not the cart.
    async fn validate(&self, cart: &Cart) -> Result<(Vec<OrderLine>, Vec<StockChange>)> {
        let mut lines = Vec::with_capacity(cart.items.len());
        let mut changes = Vec::with_capacity(cart.items.len());
        let mut remaining: HashMap<ProductId, u32> = HashMap::new();

        for item in &cart.items {
            let product = self
                .products
                .find_by_id(item.product_id)
                .await?
                .ok_or(CommerceError::ProductNotFound(item.product_id))?;

            let available = remaining
                .get(&product.id)
                .copied()
                .unwrap_or(product.stock);
            if available < item.quantity {
                return Err(CommerceError::InsufficientStock {
                    product_id: product.id,
                    product_name: product.name,
                    requested: item.quantity,
                    available,
                });
            }

            let after = available - item.quantity;
            remaining.insert(product.id, after);
            changes.push(StockChange {
                product_id: product.id,
                before: available,
                after,
            });
            lines.push(OrderLine::new(product.id, item.quantity, product.price));
        }

        Ok((lines, changes))
    }

    async fn roll_back(&self, undo: UndoLog) {
        if undo.is_empty() {
            return;
        }
        metrics::counter!("checkout_rollbacks_total").increment(1);
        let report = undo.rollback(self.products.as_ref()).await;
        if report.failed > 0 {
            tracing::error!(
                restored = report.restored,
                failed = report.failed,
                "checkout rollback incomplete, stock needs manual repair"
            );
        } else {
            tracing::info!(restored = report.restored, "checkout rolled back");
        }
    }

    async fn publish_order_created(&self, order: &Order) {
        let payload = match serde_json::to_vec(&OrderCreatedMessage::from(order)) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(order_id = %order.id, error = %e, "failed to encode order.created");
                return;
            }
        };
        if let Err(e) = self.publisher.publish(TOPIC_ORDER_CREATED, payload).await {
            metrics::counter!("order_events_publish_failures_total").increment(1);
            tracing::warn!(order_id = %order.id, error = %e, "failed to publish order.created");
        }
    }
}
