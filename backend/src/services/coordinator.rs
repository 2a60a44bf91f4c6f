//! Transaction coordinator
//!
//! Entry points open a transaction with [`TransactionCoordinator::begin`], run
//! their work against it, and hand the outcome to
//! [`TransactionCoordinator::complete`], which commits on success and rolls
//! back on any error. Events are published only after a commit.

use std::sync::Arc;

use tracing::{debug, error, warn};

use super::events::{EventSink, OrderEvent};
use crate::error::AppResult;
use crate::store::{Store, StoreTx};

pub struct TransactionCoordinator {
    store: Arc<dyn Store>,
    events: Arc<dyn EventSink>,
}

impl TransactionCoordinator {
    pub fn new(store: Arc<dyn Store>, events: Arc<dyn EventSink>) -> Self {
        Self { store, events }
    }

    pub async fn begin(&self) -> AppResult<Box<dyn StoreTx>> {
        self.store.begin().await
    }

    /// Commit when `result` is `Ok`, otherwise roll back and return the error
    pub async fn complete<T>(&self, tx: Box<dyn StoreTx>, result: AppResult<T>) -> AppResult<T> {
        match result {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                warn!(code = err.code(), error = %err, "Rolling back transaction");
                if let Err(rollback_err) = tx.rollback().await {
                    error!(error = %rollback_err, "Rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Discard a read-only transaction
    pub async fn discard<T>(&self, tx: Box<dyn StoreTx>, result: AppResult<T>) -> AppResult<T> {
        if let Err(rollback_err) = tx.rollback().await {
            warn!(error = %rollback_err, "Rollback of read transaction failed");
        }
        result
    }

    /// Fire-and-forget delivery of a committed event
    pub fn publish(&self, event: OrderEvent) {
        let kind = event.kind.as_str();
        let order_id = event.order.id;
        match self.events.publish(event) {
            Ok(reached) => debug!(event = kind, %order_id, reached, "Published order event"),
            Err(err) => warn!(event = kind, %order_id, error = %err, "Order event not delivered"),
        }
    }
}
