use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{OrderId, Page, PageRequest, ProductId, StoreId, UserId};
use domain::{BasketRow, CartItem, Order, OrderStatus, Payment, Product, Store};
use tokio::sync::RwLock;

use crate::{
    BasketRepository, OrderRepository, ProductRepository, Result, StorageError, StoreRepository,
};

#[derive(Default)]
struct DatabaseState {
    products: HashMap<ProductId, Product>,
    stores: HashMap<StoreId, Store>,
    baskets: HashMap<UserId, Vec<BasketRow>>,
    orders: HashMap<OrderId, Order>,
    payments: HashMap<OrderId, Payment>,
    stock_update_count: usize,
    // Fault injection
    fail_stock_update_for: HashSet<ProductId>,
    fail_on_create_order: bool,
    fail_on_basket_load: bool,
    fail_on_basket_delete: bool,
    stock_update_delays: HashMap<ProductId, Duration>,
    status_write_delay: Option<Duration>,
}

fn injected(operation: &str) -> StorageError {
    StorageError::Unavailable(format!("injected failure: {operation}"))
}

/// In-memory implementation of every repository.
///
/// Backs the server when no `DATABASE_URL` is configured and serves as the
/// test double, with switches to make individual operations fail.
#[derive(Clone, Default)]
pub struct InMemoryDatabase {
    state: Arc<RwLock<DatabaseState>>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a catalog product.
    pub async fn insert_product(&self, product: Product) {
        self.state.write().await.products.insert(product.id, product);
    }

    /// Inserts or replaces a store.
    pub async fn insert_store(&self, store: Store) {
        self.state.write().await.stores.insert(store.id, store);
    }

    /// Returns the current stock of a product.
    pub async fn product_stock(&self, id: ProductId) -> Option<u32> {
        self.state.read().await.products.get(&id).map(|p| p.stock)
    }

    /// Returns the number of persisted orders.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    /// Returns the persisted basket rows of a buyer.
    pub async fn basket_rows(&self, user_id: UserId) -> Vec<BasketRow> {
        self.state
            .read()
            .await
            .baskets
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns how many stock writes succeeded.
    pub async fn stock_update_count(&self) -> usize {
        self.state.read().await.stock_update_count
    }

    /// Makes stock writes for `product_id` fail.
    pub async fn fail_stock_update_for(&self, product_id: ProductId) {
        self.state
            .write()
            .await
            .fail_stock_update_for
            .insert(product_id);
    }

    /// Clears every stock-write failure switch.
    pub async fn clear_stock_update_failures(&self) {
        self.state.write().await.fail_stock_update_for.clear();
    }

    /// Makes stock writes for `product_id` sleep before they take effect.
    pub async fn delay_stock_update_for(&self, product_id: ProductId, delay: Duration) {
        self.state
            .write()
            .await
            .stock_update_delays
            .insert(product_id, delay);
    }

    /// Makes order status writes sleep before they take effect.
    pub async fn set_status_write_delay(&self, delay: Option<Duration>) {
        self.state.write().await.status_write_delay = delay;
    }

    pub async fn set_fail_on_create_order(&self, fail: bool) {
        self.state.write().await.fail_on_create_order = fail;
    }

    pub async fn set_fail_on_basket_load(&self, fail: bool) {
        self.state.write().await.fail_on_basket_load = fail;
    }

    pub async fn set_fail_on_basket_delete(&self, fail: bool) {
        self.state.write().await.fail_on_basket_delete = fail;
    }
}

impl DatabaseState {
    fn hydrate(&self, order: &Order) -> Order {
        let mut order = order.clone();
        order.payment = self.payments.get(&order.id).cloned();
        order
    }

    fn page_of(&self, mut orders: Vec<&Order>, request: PageRequest) -> Page<Order> {
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = orders.len() as u64;
        let items = orders
            .into_iter()
            .skip(request.offset() as usize)
            .take(request.per_page() as usize)
            .map(|o| self.hydrate(o))
            .collect();
        Page::new(items, total, request)
    }
}

#[async_trait]
impl ProductRepository for InMemoryDatabase {
    async fn find_by_id(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.state.read().await.products.get(&id).cloned())
    }

    async fn update_stock(&self, id: ProductId, stock: u32) -> Result<()> {
        let delay = self.state.read().await.stock_update_delays.get(&id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().await;
        if state.fail_stock_update_for.contains(&id) {
            return Err(injected("update_stock"));
        }
        let product = state
            .products
            .get_mut(&id)
            .ok_or_else(|| StorageError::InvalidData(format!("product {id} does not exist")))?;
        product.stock = stock;
        product.updated_at = Utc::now();
        state.stock_update_count += 1;
        Ok(())
    }
}

#[async_trait]
impl BasketRepository for InMemoryDatabase {
    async fn load_basket(&self, user_id: UserId) -> Result<Vec<CartItem>> {
        let state = self.state.read().await;
        if state.fail_on_basket_load {
            return Err(injected("load_basket"));
        }
        let Some(rows) = state.baskets.get(&user_id) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .iter()
            .filter_map(|row| {
                state
                    .products
                    .get(&row.product_id)
                    .map(|product| CartItem::from_product(product, row.quantity))
            })
            .collect())
    }

    async fn replace_basket(&self, user_id: UserId, rows: &[BasketRow]) -> Result<()> {
        let mut state = self.state.write().await;
        if rows.is_empty() {
            state.baskets.remove(&user_id);
        } else {
            state.baskets.insert(user_id, rows.to_vec());
        }
        Ok(())
    }

    async fn delete_basket(&self, user_id: UserId) -> Result<()> {
        let mut state = self.state.write().await;
        if state.fail_on_basket_delete {
            return Err(injected("delete_basket"));
        }
        state.baskets.remove(&user_id);
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for InMemoryDatabase {
    async fn create(&self, order: &Order) -> Result<()> {
        let mut state = self.state.write().await;
        if state.fail_on_create_order {
            return Err(injected("create_order"));
        }
        if state.orders.contains_key(&order.id) {
            return Err(StorageError::InvalidData(format!(
                "order {} already exists",
                order.id
            )));
        }
        let mut stored = order.clone();
        stored.payment = None;
        state.orders.insert(order.id, stored);
        Ok(())
    }

    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>> {
        let state = self.state.read().await;
        Ok(state.orders.get(&id).map(|o| state.hydrate(o)))
    }

    async fn find_by_user(&self, user_id: UserId, page: PageRequest) -> Result<Page<Order>> {
        let state = self.state.read().await;
        let orders = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .collect();
        Ok(state.page_of(orders, page))
    }

    async fn find_by_store(&self, store_id: StoreId, page: PageRequest) -> Result<Page<Order>> {
        let state = self.state.read().await;
        let orders = state
            .orders
            .values()
            .filter(|o| {
                o.lines.iter().any(|line| {
                    state
                        .products
                        .get(&line.product_id)
                        .is_some_and(|p| p.store_id == store_id)
                })
            })
            .collect();
        Ok(state.page_of(orders, page))
    }

    async fn transition_status(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool> {
        let delay = self.state.read().await.status_write_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().await;
        match state.orders.get_mut(&id) {
            Some(order) if order.status == from => {
                order.status = to;
                order.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn create_payment(&self, payment: &Payment) -> Result<()> {
        let mut state = self.state.write().await;
        if state.payments.contains_key(&payment.order_id) {
            return Err(StorageError::InvalidData(format!(
                "order {} already has a payment",
                payment.order_id
            )));
        }
        state.payments.insert(payment.order_id, payment.clone());
        Ok(())
    }

    async fn find_payment(&self, order_id: OrderId) -> Result<Option<Payment>> {
        Ok(self.state.read().await.payments.get(&order_id).cloned())
    }

    async fn update_payment(&self, payment: &Payment) -> Result<()> {
        let mut state = self.state.write().await;
        match state.payments.get_mut(&payment.order_id) {
            Some(existing) if existing.id == payment.id => {
                *existing = payment.clone();
                Ok(())
            }
            _ => Err(StorageError::InvalidData(format!(
                "payment {} does not exist",
                payment.id
            ))),
        }
    }
}

#[async_trait]
impl StoreRepository for InMemoryDatabase {
    async fn find_by_owner(&self, owner_id: UserId) -> Result<Option<Store>> {
        Ok(self
            .state
            .read()
            .await
            .stores
            .values()
            .find(|s| s.owner_id == owner_id)
            .cloned())
    }
}
