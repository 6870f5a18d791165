//! Applies out-of-band payment results to orders and payment records.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::OrderId;
use domain::{
    CommerceError, OrderStatus, PaymentOutcome, PaymentResultMessage, Result,
    TOPIC_PAYMENT_FAILED, TOPIC_PAYMENT_SUCCESS,
};
use futures_util::StreamExt;
use storage::{Message, MessageSource, OrderRepository, StorageError};
use tokio::task::JoinHandle;
use tracing::Instrument;

/// What applying a payment result changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The order moved from pending to paid.
    MarkedPaid,
    /// The payment record was settled as failed.
    PaymentFailed,
    /// Nothing changed: a replay, an order past pending, or a failure with no record.
    NoOp,
}

/// Idempotent consumer of `payment.success` / `payment.failed`.
///
/// Only moves an order from `Pending` to `Paid` and only settles a payment
/// record that is still pending, so replays and out-of-order deliveries are
/// harmless. Stock is never touched.
#[derive(Clone)]
pub struct PaymentReconciler {
    orders: Arc<dyn OrderRepository>,
    handler_timeout: Duration,
}

impl PaymentReconciler {
    pub fn new(orders: Arc<dyn OrderRepository>, handler_timeout: Duration) -> Self {
        Self {
            orders,
            handler_timeout,
        }
    }

    /// Applies one payment result to an order.
    #[tracing::instrument(skip(self, outcome), fields(outcome = outcome.as_str()))]
    pub async fn apply(&self, order_id: OrderId, outcome: PaymentOutcome) -> Result<ReconcileOutcome> {
        let order = self
            .orders
            .find_by_id(order_id)
            .await?
            .ok_or(CommerceError::OrderNotFound(order_id))?;

        let mut payment_settled = false;
        if let Some(mut payment) = self.orders.find_payment(order_id).await? {
            let now = Utc::now();
            let changed = match outcome {
                PaymentOutcome::Success => payment.mark_success(now),
                PaymentOutcome::Failed => payment.mark_failed(now),
            };
            if changed {
                self.orders.update_payment(&payment).await?;
                payment_settled = true;
            } else {
                tracing::debug!(status = %payment.status, "payment record already settled");
            }
        }

        let result = match outcome {
            PaymentOutcome::Success => self.mark_paid(order_id, order.status).await?,
            PaymentOutcome::Failed if payment_settled => ReconcileOutcome::PaymentFailed,
            PaymentOutcome::Failed => ReconcileOutcome::NoOp,
        };

        metrics::counter!("payment_results_applied_total", "outcome" => outcome.as_str())
            .increment(1);
        Ok(result)
    }

    async fn mark_paid(&self, order_id: OrderId, observed: OrderStatus) -> Result<ReconcileOutcome> {
        if !observed.can_mark_paid() {
            if observed == OrderStatus::Cancelled {
                tracing::warn!(%order_id, "payment succeeded for a cancelled order");
            } else {
                tracing::debug!(%order_id, status = %observed, "order already past pending");
            }
            return Ok(ReconcileOutcome::NoOp);
        }

        let moved = self
            .orders
            .transition_status(order_id, OrderStatus::Pending, OrderStatus::Paid)
            .await?;
        if !moved {
            tracing::warn!(%order_id, "order status changed concurrently, payment success not applied");
            return Ok(ReconcileOutcome::NoOp);
        }
        tracing::info!(%order_id, "order marked paid");
        Ok(ReconcileOutcome::MarkedPaid)
    }

    /// Decodes and applies one message under the handler timeout.
    ///
    /// Returns None if the message was dropped, its processing failed or the
    /// timeout elapsed. Nothing is retried. The timeout only stops waiting:
    /// an application already running finishes on its own task, so a payment
    /// record is never settled without its order being moved.
    pub async fn handle_message(&self, message: &Message) -> Option<ReconcileOutcome> {
        let Some(outcome) = PaymentOutcome::from_topic(&message.topic) else {
            tracing::debug!(topic = %message.topic, "ignoring message on unrelated topic");
            return None;
        };

        let payload: PaymentResultMessage = match serde_json::from_slice(&message.payload) {
            Ok(payload) => payload,
            Err(e) => {
                metrics::counter!("payment_results_dropped_total").increment(1);
                tracing::warn!(topic = %message.topic, error = %e, "dropping malformed payment result");
                return None;
            }
        };

        let order_id: OrderId = match payload.order_id.parse() {
            Ok(id) => id,
            Err(e) => {
                metrics::counter!("payment_results_dropped_total").increment(1);
                tracing::warn!(
                    topic = %message.topic,
                    order_id = %payload.order_id,
                    error = %e,
                    "dropping payment result with invalid order id"
                );
                return None;
            }
        };

        let this = self.clone();
        let task = tokio::spawn(
            async move { this.apply(order_id, outcome).await }.in_current_span(),
        );
        match tokio::time::timeout(self.handler_timeout, task).await {
            Ok(Ok(Ok(result))) => Some(result),
            Ok(Ok(Err(e))) => {
                tracing::error!(%order_id, error = %e, "failed to apply payment result");
                None
            }
            Ok(Err(e)) => {
                tracing::error!(%order_id, error = %e, "payment result task did not finish");
                None
            }
            Err(_) => {
                tracing::error!(
                    %order_id,
                    timeout = ?self.handler_timeout,
                    "payment result handling timed out, left to finish in background"
                );
                None
            }
        }
    }

    /// Subscribes to the payment topics and processes messages on a new task
    /// until the subscription ends or the task is aborted.
    ///
    /// The subscription is made before this returns, so no message published
    /// afterwards is missed.
    pub fn spawn(
        self,
        source: &dyn MessageSource,
    ) -> std::result::Result<JoinHandle<()>, StorageError> {
        let mut stream = source.subscribe(&[TOPIC_PAYMENT_SUCCESS, TOPIC_PAYMENT_FAILED])?;
        Ok(tokio::spawn(async move {
            tracing::info!("payment reconciler started");
            while let Some(message) = stream.next().await {
                self.handle_message(&message).await;
            }
            tracing::info!("payment reconciler stopped");
        }))
    }
}
