use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use common::{OrderId, Page, PageRequest, PaymentId, ProductId, StoreId, UserId};
use domain::{
    BasketRow, CartItem, Money, Order, OrderLine, OrderStatus, Payment, PaymentStatus, Product,
    Store,
};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    BasketRepository, LockStore, LockToken, OrderRepository, ProductRepository, Result,
    StorageError, StoreRepository,
};

fn to_db_count(value: u32) -> Result<i32> {
    i32::try_from(value).map_err(|_| StorageError::InvalidData(format!("count out of range: {value}")))
}

fn from_db_count(value: i32) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| StorageError::InvalidData(format!("negative count in storage: {value}")))
}

fn to_db_offset(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| StorageError::InvalidData(format!("offset out of range: {value}")))
}

/// PostgreSQL-backed implementation of every repository.
#[derive(Clone)]
pub struct PostgresDatabase {
    pool: PgPool,
}

impl PostgresDatabase {
    /// Creates a new PostgreSQL database handle.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Inserts or replaces a store.
    pub async fn insert_store(&self, store: &Store) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stores (id, owner_id, name)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET owner_id = EXCLUDED.owner_id, name = EXCLUDED.name
            "#,
        )
        .bind(store.id.as_uuid())
        .bind(store.owner_id.as_uuid())
        .bind(&store.name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Inserts or replaces a catalog product.
    pub async fn insert_product(&self, product: &Product) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, store_id, name, price_cents, stock, image_url, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                store_id = EXCLUDED.store_id,
                name = EXCLUDED.name,
                price_cents = EXCLUDED.price_cents,
                stock = EXCLUDED.stock,
                image_url = EXCLUDED.image_url,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(product.store_id.as_uuid())
        .bind(&product.name)
        .bind(product.price.cents())
        .bind(to_db_count(product.stock)?)
        .bind(&product.image_url)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_to_product(row: PgRow) -> Result<Product> {
        Ok(Product {
            id: ProductId::from_uuid(row.try_get("id")?),
            store_id: StoreId::from_uuid(row.try_get("store_id")?),
            name: row.try_get("name")?,
            price: Money::from_cents(row.try_get("price_cents")?),
            stock: from_db_count(row.try_get("stock")?)?,
            image_url: row.try_get("image_url")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_order(row: &PgRow) -> Result<Order> {
        let status: String = row.try_get("status")?;
        let status = status
            .parse::<OrderStatus>()
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;

        Ok(Order {
            id: OrderId::from_uuid(row.try_get("id")?),
            user_id: UserId::from_uuid(row.try_get("user_id")?),
            status,
            total_amount: Money::from_cents(row.try_get("total_cents")?),
            shipping_address: row.try_get("shipping_address")?,
            lines: Vec::new(),
            payment: None,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_payment(row: &PgRow) -> Result<Payment> {
        let status: String = row.try_get("status")?;
        let status = PaymentStatus::parse(&status)
            .ok_or_else(|| StorageError::InvalidData(format!("unknown payment status: {status}")))?;

        Ok(Payment {
            id: PaymentId::from_uuid(row.try_get("id")?),
            order_id: OrderId::from_uuid(row.try_get("order_id")?),
            method: row.try_get("method")?,
            status,
            amount: Money::from_cents(row.try_get("amount_cents")?),
            paid_at: row.try_get("paid_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// Attaches lines and payment records to a batch of order rows.
    async fn hydrate(&self, rows: Vec<PgRow>) -> Result<Vec<Order>> {
        let mut orders = rows
            .iter()
            .map(Self::row_to_order)
            .collect::<Result<Vec<_>>>()?;
        if orders.is_empty() {
            return Ok(orders);
        }
        let ids: Vec<Uuid> = orders.iter().map(|o| o.id.as_uuid()).collect();

        let line_rows = sqlx::query(
            r#"
            SELECT order_id, product_id, quantity, unit_price_cents
            FROM order_items
            WHERE order_id = ANY($1)
            ORDER BY order_id, position ASC
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut lines: HashMap<Uuid, Vec<OrderLine>> = HashMap::new();
        for row in line_rows {
            let order_id: Uuid = row.try_get("order_id")?;
            lines.entry(order_id).or_default().push(OrderLine::new(
                ProductId::from_uuid(row.try_get("product_id")?),
                from_db_count(row.try_get("quantity")?)?,
                Money::from_cents(row.try_get("unit_price_cents")?),
            ));
        }

        let payment_rows = sqlx::query(
            r#"
            SELECT id, order_id, method, status, amount_cents, paid_at, created_at, updated_at
            FROM payments
            WHERE order_id = ANY($1)
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut payments: HashMap<OrderId, Payment> = HashMap::new();
        for row in &payment_rows {
            let payment = Self::row_to_payment(row)?;
            payments.insert(payment.order_id, payment);
        }

        for order in &mut orders {
            order.lines = lines.remove(&order.id.as_uuid()).unwrap_or_default();
            order.payment = payments.remove(&order.id);
        }
        Ok(orders)
    }
}

#[async_trait]
impl ProductRepository for PostgresDatabase {
    async fn find_by_id(&self, id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(
            r#"
            SELECT id, store_id, name, price_cents, stock, image_url, updated_at
            FROM products
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_product).transpose()
    }

    async fn update_stock(&self, id: ProductId, stock: u32) -> Result<()> {
        let result = sqlx::query("UPDATE products SET stock = $2, updated_at = NOW() WHERE id = $1")
            .bind(id.as_uuid())
            .bind(to_db_count(stock)?)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::InvalidData(format!("product {id} does not exist")));
        }
        Ok(())
    }
}

#[async_trait]
impl BasketRepository for PostgresDatabase {
    async fn load_basket(&self, user_id: UserId) -> Result<Vec<CartItem>> {
        let rows = sqlx::query(
            r#"
            SELECT ci.product_id, ci.quantity, p.name, p.price_cents, p.image_url
            FROM cart_items ci
            JOIN products p ON p.id = ci.product_id
            WHERE ci.user_id = $1
            ORDER BY ci.position ASC
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(CartItem {
                    product_id: ProductId::from_uuid(row.try_get("product_id")?),
                    name: row.try_get("name")?,
                    price: Money::from_cents(row.try_get("price_cents")?),
                    quantity: from_db_count(row.try_get("quantity")?)?,
                    image_url: row.try_get("image_url")?,
                })
            })
            .collect()
    }

    async fn replace_basket(&self, user_id: UserId, rows: &[BasketRow]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        for (position, row) in rows.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO cart_items (user_id, product_id, quantity, position)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(user_id.as_uuid())
            .bind(row.product_id.as_uuid())
            .bind(to_db_count(row.quantity)?)
            .bind(to_db_count(position as u32)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_basket(&self, user_id: UserId) -> Result<()> {
        sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for PostgresDatabase {
    async fn create(&self, order: &Order) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, status, total_cents, shipping_address, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_uuid())
        .bind(order.status.as_str())
        .bind(order.total_amount.cents())
        .bind(&order.shipping_address)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        for (position, line) in order.lines.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, position, product_id, quantity, unit_price_cents)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(order.id.as_uuid())
            .bind(to_db_count(position as u32)?)
            .bind(line.product_id.as_uuid())
            .bind(to_db_count(line.quantity)?)
            .bind(line.unit_price.cents())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, status, total_cents, shipping_address, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(self.hydrate(vec![row]).await?.pop())
    }

    async fn find_by_user(&self, user_id: UserId, page: PageRequest) -> Result<Page<Order>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(
            r#"
            SELECT id, user_id, status, total_cents, shipping_address, created_at, updated_at
            FROM orders
            WHERE user_id = $1
            ORDER BY created_at DESC, id ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(i64::from(page.per_page()))
        .bind(to_db_offset(page.offset())?)
        .fetch_all(&self.pool)
        .await?;

        let orders = self.hydrate(rows).await?;
        Ok(Page::new(orders, total.max(0) as u64, page))
    }

    async fn find_by_store(&self, store_id: StoreId, page: PageRequest) -> Result<Page<Order>> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(DISTINCT oi.order_id)
            FROM order_items oi
            JOIN products p ON p.id = oi.product_id
            WHERE p.store_id = $1
            "#,
        )
        .bind(store_id.as_uuid())
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query(
            r#"
            SELECT o.id, o.user_id, o.status, o.total_cents, o.shipping_address, o.created_at, o.updated_at
            FROM orders o
            WHERE o.id IN (
                SELECT oi.order_id
                FROM order_items oi
                JOIN products p ON p.id = oi.product_id
                WHERE p.store_id = $1
            )
            ORDER BY o.created_at DESC, o.id ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(store_id.as_uuid())
        .bind(i64::from(page.per_page()))
        .bind(to_db_offset(page.offset())?)
        .fetch_all(&self.pool)
        .await?;

        let orders = self.hydrate(rows).await?;
        Ok(Page::new(orders, total.max(0) as u64, page))
    }

    async fn transition_status(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE orders SET status = $3, updated_at = NOW() WHERE id = $1 AND status = $2",
        )
        .bind(id.as_uuid())
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn create_payment(&self, payment: &Payment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (id, order_id, method, status, amount_cents, paid_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(payment.order_id.as_uuid())
        .bind(&payment.method)
        .bind(payment.status.as_str())
        .bind(payment.amount.cents())
        .bind(payment.paid_at)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_payment(&self, order_id: OrderId) -> Result<Option<Payment>> {
        let row = sqlx::query(
            r#"
            SELECT id, order_id, method, status, amount_cents, paid_at, created_at, updated_at
            FROM payments
            WHERE order_id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_payment).transpose()
    }

    async fn update_payment(&self, payment: &Payment) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET method = $2, status = $3, amount_cents = $4, paid_at = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(&payment.method)
        .bind(payment.status.as_str())
        .bind(payment.amount.cents())
        .bind(payment.paid_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::InvalidData(format!(
                "payment {} does not exist",
                payment.id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreRepository for PostgresDatabase {
    async fn find_by_owner(&self, owner_id: UserId) -> Result<Option<Store>> {
        let row = sqlx::query("SELECT id, owner_id, name FROM stores WHERE owner_id = $1")
            .bind(owner_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            Ok(Store {
                id: StoreId::from_uuid(row.try_get("id")?),
                owner_id: UserId::from_uuid(row.try_get("owner_id")?),
                name: row.try_get("name")?,
            })
        })
        .transpose()
    }
}

/// Lock store backed by the `distributed_locks` table.
///
/// Expiry is evaluated against the database clock, so every instance sharing
/// the database agrees on when a lock has lapsed.
#[derive(Clone)]
pub struct PostgresLockStore {
    pool: PgPool,
}

impl PostgresLockStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LockStore for PostgresLockStore {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockToken>> {
        let value = Uuid::new_v4();
        let acquired: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO distributed_locks (key, token, expires_at)
            VALUES ($1, $2, NOW() + make_interval(secs => $3))
            ON CONFLICT (key) DO UPDATE
                SET token = EXCLUDED.token, expires_at = EXCLUDED.expires_at
                WHERE distributed_locks.expires_at <= NOW()
            RETURNING token
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(ttl.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(acquired.map(|value| LockToken {
            key: key.to_string(),
            value,
        }))
    }

    async fn release(&self, token: &LockToken) -> Result<bool> {
        let result = sqlx::query("DELETE FROM distributed_locks WHERE key = $1 AND token = $2")
            .bind(&token.key)
            .bind(token.value)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}
