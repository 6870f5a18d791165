//! Checkout and stock-consistency engine.
//!
//! This crate provides:
//! - A lock manager with bounded waits and per-call-site fail-open / fail-closed policy
//! - The cart store (cache-first) and the buyer-facing cart service
//! - The checkout orchestrator: lock, validate, apply with undo log, commit, clean up, notify
//! - The order lifecycle: buyer cancellation with stock restoration, seller status advances
//! - The payment reconciler and its message consumer task

pub mod cart;
pub mod keys;
pub mod lifecycle;
pub mod lock;
pub mod orchestrator;
pub mod reconciler;
pub mod services;
pub mod undo;

pub use cart::{CartConfig, CartService, CartStore};
pub use lifecycle::OrderLifecycle;
pub use lock::{LockConfig, LockError, LockHandle, LockManager, LockPolicy};
pub use orchestrator::{CheckoutConfig, CheckoutOrchestrator, CheckoutRequest};
pub use reconciler::{PaymentReconciler, ReconcileOutcome};
pub use services::{Collaborators, ServiceConfig, Services};
pub use undo::{RollbackReport, UndoAction, UndoLog};
