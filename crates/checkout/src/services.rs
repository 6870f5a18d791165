//! Wiring of the services over a set of collaborators.

use std::sync::Arc;
use std::time::Duration;

use storage::{
    BasketRepository, Cache, EventPublisher, InMemoryCache, InMemoryDatabase, InMemoryLockStore,
    InMemoryMessageBus, LockStore, OrderRepository, ProductRepository, StoreRepository,
};

use crate::cart::{CartConfig, CartService, CartStore};
use crate::lifecycle::OrderLifecycle;
use crate::lock::{LockConfig, LockManager};
use crate::orchestrator::{CheckoutConfig, CheckoutOrchestrator};
use crate::reconciler::PaymentReconciler;

/// Everything the services depend on, behind their capability traits.
#[derive(Clone)]
pub struct Collaborators {
    pub products: Arc<dyn ProductRepository>,
    pub baskets: Arc<dyn BasketRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub stores: Arc<dyn StoreRepository>,
    pub cache: Arc<dyn Cache>,
    pub locks: Arc<dyn LockStore>,
    pub publisher: Arc<dyn EventPublisher>,
}

impl Collaborators {
    /// Collaborators backed entirely by in-process implementations.
    pub fn in_memory(
        db: &InMemoryDatabase,
        cache: &InMemoryCache,
        locks: &InMemoryLockStore,
        bus: &InMemoryMessageBus,
    ) -> Self {
        let db = Arc::new(db.clone());
        Self {
            products: db.clone(),
            baskets: db.clone(),
            orders: db.clone(),
            stores: db,
            cache: Arc::new(cache.clone()),
            locks: Arc::new(locks.clone()),
            publisher: Arc::new(bus.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub lock: LockConfig,
    pub cart: CartConfig,
    /// None keeps cached carts until they are rewritten or cleared.
    pub cart_cache_ttl: Option<Duration>,
    pub checkout: CheckoutConfig,
    pub payment_handler_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            lock: LockConfig::default(),
            cart: CartConfig::default(),
            cart_cache_ttl: None,
            checkout: CheckoutConfig::default(),
            payment_handler_timeout: Duration::from_secs(30),
        }
    }
}

/// The cart, checkout, lifecycle and reconciliation services sharing one set
/// of collaborators.
#[derive(Clone)]
pub struct Services {
    pub carts: CartService,
    pub checkout: CheckoutOrchestrator,
    pub orders: OrderLifecycle,
    pub payments: PaymentReconciler,
}

impl Services {
    pub fn new(collaborators: Collaborators, config: ServiceConfig) -> Self {
        let locks = LockManager::new(collaborators.locks.clone(), config.lock.clone());
        let cart_store = CartStore::new(
            collaborators.baskets.clone(),
            collaborators.cache.clone(),
            config.cart_cache_ttl,
        );

        let carts = CartService::new(
            cart_store.clone(),
            collaborators.products.clone(),
            locks.clone(),
            config.cart.clone(),
        );
        let checkout = CheckoutOrchestrator::new(
            cart_store,
            collaborators.products.clone(),
            collaborators.orders.clone(),
            collaborators.publisher.clone(),
            locks.clone(),
            config.checkout.clone(),
        );
        let orders = OrderLifecycle::new(
            collaborators.orders.clone(),
            collaborators.products.clone(),
            collaborators.stores.clone(),
            locks,
            config.checkout.stock_lock_ttl,
        );
        let payments = PaymentReconciler::new(collaborators.orders, config.payment_handler_timeout);

        Self {
            carts,
            checkout,
            orders,
            payments,
        }
    }
}
