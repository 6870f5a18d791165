//! Undo log for the checkout apply phase.

use common::ProductId;
use storage::ProductRepository;

/// The inverse of one applied mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoAction {
    /// Put a product's stock back to the value read before the decrement.
    RestoreStock { product_id: ProductId, stock: u32 },
}

/// Outcome of replaying an undo log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollbackReport {
    pub restored: usize,
    pub failed: usize,
}

/// Inverses of applied mutations, replayed newest first on failure.
#[derive(Debug, Default)]
pub struct UndoLog {
    actions: Vec<UndoAction>,
}

impl UndoLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: UndoAction) {
        self.actions.push(action);
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Replays every action in reverse. A failing action is logged and the
    /// replay continues with the next one.
    pub async fn rollback(self, products: &dyn ProductRepository) -> RollbackReport {
        let mut report = RollbackReport::default();
        for action in self.actions.into_iter().rev() {
            match action {
                UndoAction::RestoreStock { product_id, stock } => {
                    match products.update_stock(product_id, stock).await {
                        Ok(()) => report.restored += 1,
                        Err(e) => {
                            tracing::error!(
                                %product_id,
                                stock,
                                error = %e,
                                "failed to restore stock during rollback"
                            );
                            report.failed += 1;
                        }
                    }
                }
            }
        }
        report
    }
}
