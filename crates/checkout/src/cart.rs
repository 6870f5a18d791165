//! Cart store and the buyer-facing cart service.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{ProductId, UserId};
use domain::{Cart, CartItem, CommerceError, Result};
use storage::{BasketRepository, Cache, ProductRepository, StorageError};

use crate::keys::{cart_cache_key, cart_lock_key};
use crate::lock::{LockManager, LockPolicy};

/// Cache-first cart storage with the basket tables as the source of truth.
#[derive(Clone)]
pub struct CartStore {
    baskets: Arc<dyn BasketRepository>,
    cache: Arc<dyn Cache>,
    cache_ttl: Option<Duration>,
}

impl CartStore {
    pub fn new(
        baskets: Arc<dyn BasketRepository>,
        cache: Arc<dyn Cache>,
        cache_ttl: Option<Duration>,
    ) -> Self {
        Self {
            baskets,
            cache,
            cache_ttl,
        }
    }

    /// Returns the buyer's cart, empty if they have none.
    ///
    /// On a cache miss (or an unreadable cache) the cart is rebuilt from the
    /// basket rows joined with the live catalog and written back to the cache.
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, user_id: UserId) -> std::result::Result<Cart, StorageError> {
        let key = cart_cache_key(user_id);
        match self.cache.get(&key).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<Cart>(&bytes) {
                Ok(cart) => return Ok(cart),
                Err(e) => tracing::warn!(%user_id, error = %e, "discarding unreadable cached cart"),
            },
            Ok(None) => {}
            Err(e) => tracing::warn!(%user_id, error = %e, "cart cache read failed, using storage"),
        }

        let cart = Cart {
            user_id,
            items: self.baskets.load_basket(user_id).await?,
            updated_at: Utc::now(),
        };
        if let Err(e) = self.refresh_cache(&cart).await {
            tracing::warn!(%user_id, error = %e, "failed to populate cart cache");
        }
        Ok(cart)
    }

    /// Replaces the durable basket rows with the cart's lines, then refreshes the cache.
    #[tracing::instrument(skip(self, cart), fields(user_id = %cart.user_id))]
    pub async fn save(&self, cart: &Cart) -> std::result::Result<(), StorageError> {
        self.baskets
            .replace_basket(cart.user_id, &cart.basket_rows())
            .await?;
        self.refresh_cache(cart).await
    }

    /// Removes the durable rows and invalidates the cached cart.
    #[tracing::instrument(skip(self))]
    pub async fn clear(&self, user_id: UserId) -> std::result::Result<(), StorageError> {
        self.baskets.delete_basket(user_id).await?;
        self.cache.delete(&cart_cache_key(user_id)).await
    }

    /// Writes the cart to the cache. If that fails the key is invalidated so
    /// the next read falls through to storage instead of serving a stale cart.
    async fn refresh_cache(&self, cart: &Cart) -> std::result::Result<(), StorageError> {
        let key = cart_cache_key(cart.user_id);
        let bytes = serde_json::to_vec(cart)?;
        if let Err(e) = self.cache.set(&key, bytes, self.cache_ttl).await {
            tracing::warn!(user_id = %cart.user_id, error = %e, "cart cache write failed, invalidating");
            self.cache.delete(&key).await?;
        }
        Ok(())
    }
}

/// Cart service settings.
#[derive(Debug, Clone)]
pub struct CartConfig {
    pub lock_ttl: Duration,
    /// Cart edits proceed unlocked when the lock store is down.
    pub lock_policy: LockPolicy,
}

impl Default for CartConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(8),
            lock_policy: LockPolicy::FailOpen,
        }
    }
}

/// Buyer-facing cart operations, serialized per buyer by the cart lock.
///
/// Under a lock-store outage edits run unlocked, so two concurrent edits by
/// the same buyer may overwrite each other (last save wins).
#[derive(Clone)]
pub struct CartService {
    store: CartStore,
    products: Arc<dyn ProductRepository>,
    locks: LockManager,
    config: CartConfig,
}

impl CartService {
    pub fn new(
        store: CartStore,
        products: Arc<dyn ProductRepository>,
        locks: LockManager,
        config: CartConfig,
    ) -> Self {
        Self {
            store,
            products,
            locks,
            config,
        }
    }

    pub async fn get_cart(&self, user_id: UserId) -> Result<Cart> {
        Ok(self.store.get(user_id).await?)
    }

    /// Adds a product to the cart, merging with an existing line.
    #[tracing::instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Cart> {
        validate_quantity(quantity)?;

        let product = self
            .products
            .find_by_id(product_id)
            .await?
            .ok_or(CommerceError::ProductNotFound(product_id))?;
        if !product.has_stock_for(quantity) {
            return Err(CommerceError::InsufficientStock {
                product_id,
                product_name: product.name,
                requested: quantity,
                available: product.stock,
            });
        }

        let item = CartItem::from_product(&product, quantity);
        self.mutate(user_id, move |cart| cart.add(item)).await
    }

    /// Sets the quantity of an existing line.
    #[tracing::instrument(skip(self))]
    pub async fn update_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Cart> {
        validate_quantity(quantity)?;
        self.mutate(user_id, move |cart| cart.set_quantity(product_id, quantity))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_item(&self, user_id: UserId, product_id: ProductId) -> Result<Cart> {
        self.mutate(user_id, move |cart| cart.remove(product_id))
            .await
    }

    /// Loads, edits and saves the cart under the buyer's cart lock.
    async fn mutate<F>(&self, user_id: UserId, edit: F) -> Result<Cart>
    where
        F: FnOnce(&mut Cart) -> Result<()> + Send,
    {
        let handle = self
            .locks
            .acquire_with_policy(
                &cart_lock_key(user_id),
                self.config.lock_ttl,
                self.config.lock_policy,
                None,
            )
            .await?;

        let result = self.load_edit_save(user_id, edit).await;
        self.locks.release(handle).await;
        result
    }

    async fn load_edit_save<F>(&self, user_id: UserId, edit: F) -> Result<Cart>
    where
        F: FnOnce(&mut Cart) -> Result<()> + Send,
    {
        let mut cart = self.store.get(user_id).await?;
        edit(&mut cart)?;
        self.store.save(&cart).await?;
        Ok(cart)
    }
}

fn validate_quantity(quantity: u32) -> Result<()> {
    if quantity == 0 {
        return Err(CommerceError::Validation(
            "quantity must be greater than zero".to_string(),
        ));
    }
    Ok(())
}
