//! Integration tests for checkout, cancellation and payment reconciliation.

use std::time::Duration;

use checkout::keys::stock_lock_key;
use checkout::{
    CheckoutRequest, Collaborators, LockConfig, ReconcileOutcome, ServiceConfig, Services,
};
use common::{ProductId, UserId};
use domain::{
    CommerceError, Money, Order, OrderCreatedMessage, OrderStatus, PAYMENT_METHOD_MOCK, Payment,
    PaymentStatus, Product, Store, TOPIC_ORDER_CREATED, TOPIC_PAYMENT_SUCCESS,
};
use storage::{
    EventPublisher, InMemoryCache, InMemoryDatabase, InMemoryLockStore, InMemoryMessageBus,
    LockStore, OrderRepository,
};

struct TestHarness {
    services: Services,
    db: InMemoryDatabase,
    cache: InMemoryCache,
    locks: InMemoryLockStore,
    bus: InMemoryMessageBus,
    store: Store,
}

impl TestHarness {
    async fn new() -> Self {
        Self::with_lock_config(LockConfig {
            acquire_timeout: Duration::from_millis(100),
            retry_interval: Duration::from_millis(5),
        })
        .await
    }

    async fn with_lock_config(lock: LockConfig) -> Self {
        let db = InMemoryDatabase::new();
        let cache = InMemoryCache::new();
        let locks = InMemoryLockStore::new();
        let bus = InMemoryMessageBus::recording();

        let store = Store::new(UserId::new(), "Corner Shop");
        db.insert_store(store.clone()).await;

        let config = ServiceConfig {
            lock,
            ..ServiceConfig::default()
        };
        let services = Services::new(Collaborators::in_memory(&db, &cache, &locks, &bus), config);

        Self {
            services,
            db,
            cache,
            locks,
            bus,
            store,
        }
    }

    async fn product(&self, name: &str, price_cents: i64, stock: u32) -> Product {
        let product = Product::new(self.store.id, name, Money::from_cents(price_cents), stock);
        self.db.insert_product(product.clone()).await;
        product
    }

    async fn set_stock(&self, product: &Product, stock: u32) {
        let mut updated = product.clone();
        updated.stock = stock;
        self.db.insert_product(updated).await;
    }

    async fn stock(&self, product: &Product) -> u32 {
        self.db.product_stock(product.id).await.unwrap()
    }

    async fn add(&self, buyer: UserId, product: &Product, quantity: u32) {
        self.services
            .carts
            .add_item(buyer, product.id, quantity)
            .await
            .unwrap();
    }

    async fn checkout(&self, buyer: UserId) -> Result<Order, CommerceError> {
        self.services
            .checkout
            .checkout(CheckoutRequest::new(buyer, "1 Main St"))
            .await
    }

    async fn status(&self, order: &Order) -> OrderStatus {
        OrderRepository::find_by_id(&self.db, order.id)
            .await
            .unwrap()
            .unwrap()
            .status
    }
}

// -- Checkout --

#[tokio::test]
async fn test_two_item_checkout_succeeds() {
    let h = TestHarness::new().await;
    let buyer = UserId::new();
    let a = h.product("Widget", 1000, 5).await;
    let b = h.product("Gadget", 2500, 1).await;
    h.add(buyer, &a, 3).await;
    h.add(buyer, &b, 1).await;

    // Repricing after add: checkout charges the current catalog price.
    let mut repriced = a.clone();
    repriced.price = Money::from_cents(1200);
    h.db.insert_product(repriced).await;

    let order = h.checkout(buyer).await.unwrap();

    assert_eq!(h.stock(&a).await, 2);
    assert_eq!(h.stock(&b).await, 0);
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.total_amount, Money::from_cents(3 * 1200 + 2500));
    assert_eq!(order.lines.len(), 2);
    assert_eq!(order.lines[0].unit_price, Money::from_cents(1200));
    assert_eq!(h.db.order_count().await, 1);
    assert!(h.services.carts.get_cart(buyer).await.unwrap().is_empty());
    assert_eq!(h.locks.held_count().await, 0);

    let published = h.bus.published_on(TOPIC_ORDER_CREATED).await;
    assert_eq!(published.len(), 1);
    let message: OrderCreatedMessage = serde_json::from_slice(&published[0].payload).unwrap();
    assert_eq!(message.order_id, order.id.to_string());
    assert_eq!(message.user_id, buyer.to_string());
    assert_eq!(message.total_amount, "61.00");
}

#[tokio::test]
async fn test_insufficient_stock_has_no_side_effects() {
    let h = TestHarness::new().await;
    let buyer = UserId::new();
    let a = h.product("Widget", 1000, 5).await;
    let b = h.product("Gadget", 2500, 1).await;
    h.add(buyer, &a, 3).await;
    h.add(buyer, &b, 1).await;
    h.set_stock(&b, 0).await;

    let err = h.checkout(buyer).await.unwrap_err();

    match err {
        CommerceError::InsufficientStock {
            product_id,
            product_name,
            requested,
            available,
        } => {
            assert_eq!(product_id, b.id);
            assert_eq!(product_name, "Gadget");
            assert_eq!(requested, 1);
            assert_eq!(available, 0);
        }
        other => panic!("expected InsufficientStock, got {other:?}"),
    }
    assert_eq!(h.stock(&a).await, 5);
    assert_eq!(h.db.order_count().await, 0);
    assert_eq!(h.db.stock_update_count().await, 0);
    assert_eq!(h.services.carts.get_cart(buyer).await.unwrap().items.len(), 2);
    assert_eq!(h.locks.held_count().await, 0);
}

#[tokio::test]
async fn test_missing_product_is_reported() {
    let h = TestHarness::new().await;
    let buyer = UserId::new();
    let a = h.product("Widget", 1000, 5).await;
    h.add(buyer, &a, 1).await;

    // The cached cart is shared with a catalog that no longer lists the product.
    let empty_catalog = InMemoryDatabase::new();
    let services = Services::new(
        Collaborators::in_memory(&empty_catalog, &h.cache, &h.locks, &h.bus),
        ServiceConfig::default(),
    );

    let err = services
        .checkout
        .checkout(CheckoutRequest::new(buyer, "1 Main St"))
        .await
        .unwrap_err();

    assert_eq!(err, CommerceError::ProductNotFound(a.id));
    assert_eq!(h.stock(&a).await, 5);
    assert_eq!(h.locks.held_count().await, 0);
}

#[tokio::test]
async fn test_apply_failure_restores_prefix() {
    let h = TestHarness::new().await;
    let buyer = UserId::new();
    let a = h.product("A", 100, 5).await;
    let b = h.product("B", 200, 6).await;
    let c = h.product("C", 300, 7).await;
    h.add(buyer, &a, 1).await;
    h.add(buyer, &b, 2).await;
    h.add(buyer, &c, 3).await;
    h.db.fail_stock_update_for(c.id).await;

    let err = h.checkout(buyer).await.unwrap_err();

    assert!(matches!(err, CommerceError::CheckoutFailed(_)));
    assert_eq!(h.stock(&a).await, 5);
    assert_eq!(h.stock(&b).await, 6);
    assert_eq!(h.stock(&c).await, 7);
    assert_eq!(h.db.order_count().await, 0);
    assert_eq!(h.locks.held_count().await, 0);
    assert_eq!(h.services.carts.get_cart(buyer).await.unwrap().items.len(), 3);
}

#[tokio::test]
async fn test_commit_failure_restores_everything() {
    let h = TestHarness::new().await;
    let buyer = UserId::new();
    let a = h.product("A", 100, 5).await;
    let b = h.product("B", 200, 6).await;
    h.add(buyer, &a, 5).await;
    h.add(buyer, &b, 1).await;
    h.db.set_fail_on_create_order(true).await;

    let err = h.checkout(buyer).await.unwrap_err();

    assert!(matches!(err, CommerceError::CheckoutFailed(_)));
    assert_eq!(h.stock(&a).await, 5);
    assert_eq!(h.stock(&b).await, 6);
    assert_eq!(h.db.order_count().await, 0);
    assert!(h.bus.published_on(TOPIC_ORDER_CREATED).await.is_empty());
    assert_eq!(h.locks.held_count().await, 0);
}

#[tokio::test]
async fn test_total_overflow_is_rejected_before_stock_is_touched() {
    let h = TestHarness::new().await;
    let buyer = UserId::new();
    let a = h.product("Gold Bar", i64::MAX / 2, 5).await;
    h.add(buyer, &a, 3).await;

    let err = h.checkout(buyer).await.unwrap_err();

    assert!(matches!(err, CommerceError::Validation(_)));
    assert_eq!(h.stock(&a).await, 5);
    assert_eq!(h.db.stock_update_count().await, 0);
    assert_eq!(h.db.order_count().await, 0);
    assert_eq!(h.locks.held_count().await, 0);
}

#[tokio::test]
async fn test_repeated_adds_checkout_as_one_locked_line() {
    let h = TestHarness::new().await;
    let buyer = UserId::new();
    let a = h.product("A", 100, 5).await;
    h.add(buyer, &a, 2).await;
    h.add(buyer, &a, 2).await;

    let order = h.checkout(buyer).await.unwrap();

    assert_eq!(h.stock(&a).await, 1);
    assert_eq!(order.total_amount, Money::from_cents(400));
    // Two cart locks and one stock lock.
    assert_eq!(h.locks.acquisition_count().await, 3);
}

#[tokio::test]
async fn test_empty_cart_and_blank_address_are_rejected() {
    let h = TestHarness::new().await;
    let buyer = UserId::new();

    assert_eq!(h.checkout(buyer).await.unwrap_err(), CommerceError::EmptyCart);

    let a = h.product("A", 100, 5).await;
    h.add(buyer, &a, 1).await;
    let err = h
        .services
        .checkout
        .checkout(CheckoutRequest::new(buyer, "   "))
        .await
        .unwrap_err();
    assert!(matches!(err, CommerceError::Validation(_)));
}

#[tokio::test]
async fn test_unreadable_cart_is_not_found() {
    let h = TestHarness::new().await;
    let buyer = UserId::new();
    h.db.set_fail_on_basket_load(true).await;

    let err = h.checkout(buyer).await.unwrap_err();

    assert!(matches!(err, CommerceError::NotFound { entity: "cart", .. }));
}

#[tokio::test(start_paused = true)]
async fn test_contended_stock_lock_refuses_checkout() {
    let h = TestHarness::new().await;
    let buyer = UserId::new();
    let a = h.product("A", 100, 5).await;
    let b = h.product("B", 100, 5).await;
    h.add(buyer, &a, 1).await;
    h.add(buyer, &b, 1).await;

    let held = h
        .locks
        .try_acquire(&stock_lock_key(b.id), Duration::from_secs(10))
        .await
        .unwrap()
        .unwrap();

    let err = h.checkout(buyer).await.unwrap_err();

    assert_eq!(err, CommerceError::CheckoutUnavailable);
    assert!(err.is_retryable());
    assert_eq!(h.stock(&a).await, 5);
    // Only the externally held lock remains.
    assert_eq!(h.locks.held_count().await, 1);
    h.locks.release(&held).await.unwrap();

    assert!(h.checkout(buyer).await.is_ok());
}

#[tokio::test]
async fn test_lock_store_outage_fails_closed() {
    let h = TestHarness::new().await;
    let buyer = UserId::new();
    let a = h.product("A", 100, 5).await;
    h.add(buyer, &a, 1).await;
    h.locks.set_unavailable(true).await;

    let err = h.checkout(buyer).await.unwrap_err();

    assert_eq!(err, CommerceError::CheckoutUnavailable);
    assert_eq!(h.stock(&a).await, 5);
    assert_eq!(h.db.order_count().await, 0);
}

#[tokio::test]
async fn test_expired_deadline_aborts_before_stock_is_touched() {
    let h = TestHarness::new().await;
    let buyer = UserId::new();
    let a = h.product("A", 100, 5).await;
    h.add(buyer, &a, 1).await;

    let request =
        CheckoutRequest::new(buyer, "1 Main St").with_deadline(tokio::time::Instant::now());
    let err = h.services.checkout.checkout(request).await.unwrap_err();

    assert!(matches!(err, CommerceError::DeadlineExceeded(_)));
    assert_eq!(h.stock(&a).await, 5);
    assert_eq!(h.db.stock_update_count().await, 0);
    assert_eq!(h.locks.held_count().await, 0);
}

#[tokio::test]
async fn test_cart_clear_failure_does_not_fail_checkout() {
    let h = TestHarness::new().await;
    let buyer = UserId::new();
    let a = h.product("A", 100, 5).await;
    h.add(buyer, &a, 2).await;
    h.db.set_fail_on_basket_delete(true).await;

    let order = h.checkout(buyer).await.unwrap();

    assert_eq!(h.stock(&a).await, 3);
    assert_eq!(h.db.order_count().await, 1);
    assert_eq!(h.status(&order).await, OrderStatus::Pending);
    // The stale cart is still visible.
    assert!(!h.services.carts.get_cart(buyer).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_publish_failure_does_not_fail_checkout() {
    let h = TestHarness::new().await;
    let buyer = UserId::new();
    let a = h.product("A", 100, 5).await;
    h.add(buyer, &a, 1).await;
    h.bus.set_fail_on_publish(true).await;

    let order = h.checkout(buyer).await.unwrap();

    assert_eq!(h.status(&order).await, OrderStatus::Pending);
    assert!(h.bus.published().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_checkout_still_commits() {
    let h = TestHarness::new().await;
    let buyer = UserId::new();
    let a = h.product("A", 100, 5).await;
    let b = h.product("B", 200, 5).await;
    h.add(buyer, &a, 1).await;
    h.add(buyer, &b, 1).await;
    h.db.delay_stock_update_for(b.id, Duration::from_millis(200)).await;

    // The caller gives up while the second stock write is in flight.
    let abandoned = tokio::time::timeout(Duration::from_millis(50), h.checkout(buyer)).await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(h.stock(&a).await, 4);
    assert_eq!(h.stock(&b).await, 4);
    assert_eq!(h.db.order_count().await, 1);
    assert!(h.services.carts.get_cart(buyer).await.unwrap().is_empty());
    assert_eq!(h.locks.held_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_checkout_still_rolls_back() {
    let h = TestHarness::new().await;
    let buyer = UserId::new();
    let a = h.product("A", 100, 5).await;
    let b = h.product("B", 200, 5).await;
    h.add(buyer, &a, 1).await;
    h.add(buyer, &b, 1).await;
    h.db.delay_stock_update_for(b.id, Duration::from_millis(200)).await;
    h.db.set_fail_on_create_order(true).await;

    let abandoned = tokio::time::timeout(Duration::from_millis(50), h.checkout(buyer)).await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(h.stock(&a).await, 5);
    assert_eq!(h.stock(&b).await, 5);
    assert_eq!(h.db.order_count().await, 0);
    assert_eq!(h.services.carts.get_cart(buyer).await.unwrap().items.len(), 2);
    assert_eq!(h.locks.held_count().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_checkouts_never_oversell() {
    let h = TestHarness::with_lock_config(LockConfig {
        acquire_timeout: Duration::from_secs(5),
        retry_interval: Duration::from_millis(2),
    })
    .await;
    let a = h.product("Hot Item", 999, 5).await;

    let mut buyers = Vec::new();
    for _ in 0..12 {
        let buyer = UserId::new();
        h.add(buyer, &a, 1).await;
        buyers.push(buyer);
    }

    let tasks: Vec<_> = buyers
        .into_iter()
        .map(|buyer| {
            let checkout = h.services.checkout.clone();
            tokio::spawn(async move {
                checkout
                    .checkout(CheckoutRequest::new(buyer, "1 Main St"))
                    .await
            })
        })
        .collect();

    let mut completed = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => completed += 1,
            Err(CommerceError::InsufficientStock { .. }) => {}
            Err(other) => panic!("unexpected checkout error: {other:?}"),
        }
    }

    assert_eq!(completed, 5);
    assert_eq!(h.stock(&a).await, 0);
    assert_eq!(h.db.order_count().await, 5);
    assert_eq!(h.locks.held_count().await, 0);
}

// -- Cancellation --

#[tokio::test]
async fn test_cancel_pending_order_restores_stock_once() {
    let h = TestHarness::new().await;
    let buyer = UserId::new();
    let c = h.product("C", 400, 5).await;
    h.add(buyer, &c, 2).await;
    let order = h.checkout(buyer).await.unwrap();
    assert_eq!(h.stock(&c).await, 3);

    let cancelled = h.services.orders.cancel(buyer, order.id).await.unwrap();

    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(h.stock(&c).await, 5);
    assert_eq!(h.status(&order).await, OrderStatus::Cancelled);

    let err = h.services.orders.cancel(buyer, order.id).await.unwrap_err();
    assert_eq!(
        err,
        CommerceError::InvalidStatus {
            status: OrderStatus::Cancelled,
            action: "cancel"
        }
    );
    assert_eq!(h.stock(&c).await, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_cancellations_restore_stock_once() {
    let h = TestHarness::with_lock_config(LockConfig {
        acquire_timeout: Duration::from_secs(5),
        retry_interval: Duration::from_millis(2),
    })
    .await;
    let buyer = UserId::new();
    let c = h.product("C", 400, 5).await;
    h.add(buyer, &c, 2).await;
    let order = h.checkout(buyer).await.unwrap();

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let orders = h.services.orders.clone();
            let order_id = order.id;
            tokio::spawn(async move { orders.cancel(buyer, order_id).await })
        })
        .collect();

    let mut succeeded = 0;
    for task in tasks {
        if task.await.unwrap().is_ok() {
            succeeded += 1;
        }
    }

    assert_eq!(succeeded, 1);
    assert_eq!(h.stock(&c).await, 5);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_cancel_still_restores_stock() {
    let h = TestHarness::new().await;
    let buyer = UserId::new();
    let c = h.product("C", 400, 5).await;
    h.add(buyer, &c, 2).await;
    let order = h.checkout(buyer).await.unwrap();
    h.db.delay_stock_update_for(c.id, Duration::from_millis(200)).await;

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        h.services.orders.cancel(buyer, order.id),
    )
    .await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(h.status(&order).await, OrderStatus::Cancelled);
    assert_eq!(h.stock(&c).await, 5);
    assert_eq!(h.locks.held_count().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancellations_racing_checkouts_keep_stock_consistent() {
    let h = TestHarness::with_lock_config(LockConfig {
        acquire_timeout: Duration::from_secs(5),
        retry_interval: Duration::from_millis(2),
    })
    .await;
    let a = h.product("Hot Item", 999, 10).await;

    let mut existing = Vec::new();
    for _ in 0..4 {
        let buyer = UserId::new();
        h.add(buyer, &a, 1).await;
        existing.push((buyer, h.checkout(buyer).await.unwrap().id));
    }
    assert_eq!(h.stock(&a).await, 6);

    let mut newcomers = Vec::new();
    for _ in 0..10 {
        let buyer = UserId::new();
        h.add(buyer, &a, 1).await;
        newcomers.push(buyer);
    }

    let cancels: Vec<_> = existing
        .into_iter()
        .map(|(buyer, order_id)| {
            let orders = h.services.orders.clone();
            tokio::spawn(async move { orders.cancel(buyer, order_id).await })
        })
        .collect();
    let checkouts: Vec<_> = newcomers
        .into_iter()
        .map(|buyer| {
            let checkout = h.services.checkout.clone();
            tokio::spawn(async move {
                checkout
                    .checkout(CheckoutRequest::new(buyer, "1 Main St"))
                    .await
            })
        })
        .collect();

    for task in cancels {
        task.await.unwrap().unwrap();
    }
    let mut completed = 0u32;
    for task in checkouts {
        match task.await.unwrap() {
            Ok(_) => completed += 1,
            Err(CommerceError::InsufficientStock { .. }) => {}
            Err(other) => panic!("unexpected checkout error: {other:?}"),
        }
    }

    // Stock already free before the race always sells.
    assert!(completed >= 6);
    assert_eq!(h.stock(&a).await, 10 - completed);
    assert_eq!(h.db.order_count().await, 4 + completed as usize);
    assert_eq!(h.locks.held_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_skips_line_whose_lock_is_unavailable() {
    let h = TestHarness::new().await;
    let buyer = UserId::new();
    let a = h.product("A", 100, 5).await;
    let b = h.product("B", 100, 5).await;
    h.add(buyer, &a, 1).await;
    h.add(buyer, &b, 2).await;
    let order = h.checkout(buyer).await.unwrap();

    let _held = h
        .locks
        .try_acquire(&stock_lock_key(b.id), Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();

    let cancelled = h.services.orders.cancel(buyer, order.id).await.unwrap();

    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(h.stock(&a).await, 5);
    assert_eq!(h.stock(&b).await, 3);
}

#[tokio::test]
async fn test_seller_walks_order_to_completion() {
    let h = TestHarness::new().await;
    let buyer = UserId::new();
    let a = h.product("A", 100, 5).await;
    h.add(buyer, &a, 1).await;
    let order = h.checkout(buyer).await.unwrap();
    let seller = h.store.owner_id;

    // Not yet paid.
    assert!(matches!(
        h.services
            .orders
            .advance(seller, order.id, OrderStatus::Processing)
            .await,
        Err(CommerceError::NoValidTransition {
            from: OrderStatus::Pending
        })
    ));

    h.services
        .payments
        .apply(order.id, domain::PaymentOutcome::Success)
        .await
        .unwrap();

    for target in [
        OrderStatus::Processing,
        OrderStatus::Shipping,
        OrderStatus::Shipped,
        OrderStatus::Completed,
    ] {
        let advanced = h.services.orders.advance(seller, order.id, target).await.unwrap();
        assert_eq!(advanced.status, target);
    }

    assert!(h.services.orders.cancel(buyer, order.id).await.is_err());
    assert_eq!(h.stock(&a).await, 4);
}

// -- Payment reconciliation --

async fn wait_for_status(h: &TestHarness, order: &Order, expected: OrderStatus) {
    for _ in 0..200 {
        if h.status(order).await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("order never reached {expected}");
}

#[tokio::test]
async fn test_consumer_applies_payment_success_idempotently() {
    let h = TestHarness::new().await;
    let buyer = UserId::new();
    let a = h.product("A", 100, 5).await;
    h.add(buyer, &a, 2).await;
    let order = h.checkout(buyer).await.unwrap();
    h.db.create_payment(&Payment::pending(order.id, order.total_amount, PAYMENT_METHOD_MOCK))
        .await
        .unwrap();

    let consumer = h.services.payments.clone().spawn(&h.bus).unwrap();

    let payload = serde_json::to_vec(&serde_json::json!({ "order_id": order.id.to_string() })).unwrap();
    h.bus.publish(TOPIC_PAYMENT_SUCCESS, payload.clone()).await.unwrap();
    wait_for_status(&h, &order, OrderStatus::Paid).await;
    let first_paid_at = h.db.find_payment(order.id).await.unwrap().unwrap().paid_at;

    h.bus.publish(TOPIC_PAYMENT_SUCCESS, b"{ not json".to_vec()).await.unwrap();
    h.bus.publish(TOPIC_PAYMENT_SUCCESS, payload).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.status(&order).await, OrderStatus::Paid);
    assert_eq!(h.stock(&a).await, 3);
    let payment = h.db.find_payment(order.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Success);
    assert_eq!(payment.paid_at, first_paid_at);
    assert!(!consumer.is_finished());
    consumer.abort();
}

#[tokio::test]
async fn test_replay_on_shipped_order_is_noop() {
    let h = TestHarness::new().await;
    let buyer = UserId::new();
    let a = h.product("A", 100, 5).await;
    h.add(buyer, &a, 1).await;
    let order = h.checkout(buyer).await.unwrap();
    let seller = h.store.owner_id;

    let payments = &h.services.payments;
    payments
        .apply(order.id, domain::PaymentOutcome::Success)
        .await
        .unwrap();
    for target in [
        OrderStatus::Processing,
        OrderStatus::Shipping,
        OrderStatus::Shipped,
    ] {
        h.services.orders.advance(seller, order.id, target).await.unwrap();
    }

    let outcome = payments
        .apply(order.id, domain::PaymentOutcome::Success)
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::NoOp);
    assert_eq!(h.status(&order).await, OrderStatus::Shipped);
    assert_eq!(h.stock(&a).await, 4);
}

#[tokio::test]
async fn test_unknown_product_in_order_does_not_grant_seller_access() {
    let h = TestHarness::new().await;
    let order = Order::pending(
        UserId::new(),
        "1 Main St",
        vec![domain::OrderLine::new(ProductId::new(), 1, Money::from_cents(100))],
    )
    .unwrap();
    h.db.create(&order).await.unwrap();

    let err = h
        .services
        .orders
        .advance(h.store.owner_id, order.id, OrderStatus::Processing)
        .await
        .unwrap_err();
    assert!(matches!(err, CommerceError::Forbidden(_)));
}
