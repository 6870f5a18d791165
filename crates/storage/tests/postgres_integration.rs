//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p storage --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;
use std::time::Duration;

use common::{PageRequest, StoreId, UserId};
use domain::{BasketRow, Money, Order, OrderLine, OrderStatus, PAYMENT_METHOD_MOCK, Payment, Product, Store};
use sqlx::PgPool;
use storage::{
    BasketRepository, LockStore, OrderRepository, PostgresDatabase, PostgresLockStore,
    ProductRepository, StoreRepository,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_marketplace_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh database handle with its own pool and cleared tables
async fn get_test_database() -> PostgresDatabase {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query(
        "TRUNCATE TABLE payments, order_items, orders, cart_items, products, stores, distributed_locks",
    )
    .execute(&pool)
    .await
    .unwrap();

    PostgresDatabase::new(pool)
}

async fn seed_catalog(db: &PostgresDatabase) -> (Store, Product, Product) {
    let store = Store::new(UserId::new(), "Corner Shop");
    db.insert_store(&store).await.unwrap();

    let mug = Product::new(store.id, "Mug", Money::from_cents(800), 10).with_image_url("mug.png");
    let pen = Product::new(store.id, "Pen", Money::from_cents(150), 3);
    db.insert_product(&mug).await.unwrap();
    db.insert_product(&pen).await.unwrap();
    (store, mug, pen)
}

#[tokio::test]
async fn product_stock_update() {
    let db = get_test_database().await;
    let (_, mug, _) = seed_catalog(&db).await;

    db.update_stock(mug.id, 4).await.unwrap();

    let stored = ProductRepository::find_by_id(&db, mug.id).await.unwrap().unwrap();
    assert_eq!(stored.stock, 4);
    assert_eq!(stored.image_url, "mug.png");
    assert_eq!(stored.price, Money::from_cents(800));
}

#[tokio::test]
async fn basket_keeps_insertion_order_and_joins_catalog() {
    let db = get_test_database().await;
    let (_, mug, pen) = seed_catalog(&db).await;
    let buyer = UserId::new();

    let rows = [
        BasketRow {
            product_id: pen.id,
            quantity: 2,
        },
        BasketRow {
            product_id: mug.id,
            quantity: 1,
        },
    ];
    db.replace_basket(buyer, &rows).await.unwrap();

    let items = db.load_basket(buyer).await.unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].product_id, pen.id);
    assert_eq!(items[0].name, "Pen");
    assert_eq!(items[1].product_id, mug.id);

    db.replace_basket(buyer, &rows[1..]).await.unwrap();
    assert_eq!(db.load_basket(buyer).await.unwrap().len(), 1);

    db.delete_basket(buyer).await.unwrap();
    assert!(db.load_basket(buyer).await.unwrap().is_empty());
}

#[tokio::test]
async fn order_round_trips_with_lines_and_payment() {
    let db = get_test_database().await;
    let (_, mug, pen) = seed_catalog(&db).await;

    let order = Order::pending(
        UserId::new(),
        "1 Main St",
        vec![
            OrderLine::new(mug.id, 2, mug.price),
            OrderLine::new(pen.id, 1, pen.price),
        ],
    )
    .unwrap();
    db.create(&order).await.unwrap();

    let payment = Payment::pending(order.id, order.total_amount, PAYMENT_METHOD_MOCK);
    db.create_payment(&payment).await.unwrap();

    let stored = OrderRepository::find_by_id(&db, order.id).await.unwrap().unwrap();
    assert_eq!(stored.total_amount, Money::from_cents(1750));
    assert_eq!(stored.lines, order.lines);
    assert_eq!(stored.payment.as_ref().map(|p| p.id), Some(payment.id));
    assert_eq!(stored.status, OrderStatus::Pending);
}

#[tokio::test]
async fn transition_status_only_applies_from_expected_state() {
    let db = get_test_database().await;
    let (_, mug, _) = seed_catalog(&db).await;
    let order =
        Order::pending(UserId::new(), "a", vec![OrderLine::new(mug.id, 1, mug.price)]).unwrap();
    db.create(&order).await.unwrap();

    assert!(
        db.transition_status(order.id, OrderStatus::Pending, OrderStatus::Paid)
            .await
            .unwrap()
    );
    assert!(
        !db.transition_status(order.id, OrderStatus::Pending, OrderStatus::Cancelled)
            .await
            .unwrap()
    );

    let stored = OrderRepository::find_by_id(&db, order.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Paid);
}

#[tokio::test]
async fn listings_are_paginated_and_scoped() {
    let db = get_test_database().await;
    let (store, mug, _) = seed_catalog(&db).await;
    let buyer = UserId::new();

    for _ in 0..3 {
        let order =
            Order::pending(buyer, "a", vec![OrderLine::new(mug.id, 1, mug.price)]).unwrap();
        db.create(&order).await.unwrap();
    }

    let page = db.find_by_user(buyer, PageRequest::new(1, 2)).await.unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.items.len(), 2);
    assert!(page.items[0].created_at >= page.items[1].created_at);

    let seller_page = db.find_by_store(store.id, PageRequest::default()).await.unwrap();
    assert_eq!(seller_page.total, 3);

    let empty = db.find_by_store(StoreId::new(), PageRequest::default()).await.unwrap();
    assert_eq!(empty.total, 0);

    let owned = db.find_by_owner(store.owner_id).await.unwrap();
    assert_eq!(owned, Some(store));
}

#[tokio::test]
async fn lock_store_is_exclusive_until_release() {
    let db = get_test_database().await;
    let locks = PostgresLockStore::new(db.pool().clone());
    let ttl = Duration::from_secs(10);

    let token = locks.try_acquire("stock_lock:a", ttl).await.unwrap().unwrap();
    assert!(locks.try_acquire("stock_lock:a", ttl).await.unwrap().is_none());

    assert!(locks.release(&token).await.unwrap());
    assert!(!locks.release(&token).await.unwrap());
    assert!(locks.try_acquire("stock_lock:a", ttl).await.unwrap().is_some());
}

#[tokio::test]
async fn expired_lock_is_taken_over() {
    let db = get_test_database().await;
    let locks = PostgresLockStore::new(db.pool().clone());

    let stale = locks
        .try_acquire("cart_lock:a", Duration::from_millis(50))
        .await
        .unwrap()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;

    let fresh = locks
        .try_acquire("cart_lock:a", Duration::from_secs(10))
        .await
        .unwrap()
        .unwrap();
    assert_ne!(stale.value, fresh.value);
    assert!(!locks.release(&stale).await.unwrap());
}
