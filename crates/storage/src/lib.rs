//! Storage layer for the marketplace backend.
//!
//! This crate provides the collaborators the checkout services depend on:
//! - Repository traits for products, baskets, orders, payments and stores
//! - A key/value cache, a TTL lock store and a topic message bus
//! - In-memory implementations of all of them, with fault injection for tests
//! - PostgreSQL implementations of the repositories and the lock store

pub mod bus;
pub mod cache;
pub mod error;
pub mod lock;
pub mod memory;
pub mod postgres;
pub mod repository;

pub use bus::{EventPublisher, InMemoryMessageBus, Message, MessageSource, MessageStream};
pub use cache::{Cache, InMemoryCache};
pub use error::{Result, StorageError};
pub use lock::{InMemoryLockStore, LockStore, LockToken, NoopLockStore};
pub use memory::InMemoryDatabase;
pub use postgres::{PostgresDatabase, PostgresLockStore};
pub use repository::{BasketRepository, OrderRepository, ProductRepository, StoreRepository};
