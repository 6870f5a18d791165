//! Key namespaces for locks and cache entries.

use common::{ProductId, UserId};

/// Namespace of per-product stock locks.
pub const STOCK_LOCK_NAMESPACE: &str = "stock_lock";

/// Namespace of per-buyer cart locks.
pub const CART_LOCK_NAMESPACE: &str = "cart_lock";

/// Namespace of cached carts.
pub const CART_CACHE_NAMESPACE: &str = "cart";

pub fn stock_lock_key(product_id: ProductId) -> String {
    format!("{STOCK_LOCK_NAMESPACE}:{product_id}")
}

pub fn cart_lock_key(user_id: UserId) -> String {
    format!("{CART_LOCK_NAMESPACE}:{user_id}")
}

pub fn cart_cache_key(user_id: UserId) -> String {
    format!("{CART_CACHE_NAMESPACE}:{user_id}")
}

/// Returns the namespace part of a key, used as a metrics label.
pub fn namespace_of(key: &str) -> &str {
    key.split_once(':').map_or(key, |(namespace, _)| namespace)
}
