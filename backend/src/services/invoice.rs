//! Billing helpers over sold, not yet invoiced stock

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use shared::{
    Allocation, InvoiceCandidate, InvoiceLineCheck, Item, ItemChanges, ItemState, OrderType,
    PartialInvoiceValidation,
};

use super::allocator::FifoAllocator;
use super::coordinator::TransactionCoordinator;
use super::item::{ItemLookup, ItemService, MovementContext};
use crate::error::{AppError, AppResult};
use crate::store::{CandidateScope, StoreTx};

pub struct InvoiceService {
    coordinator: Arc<TransactionCoordinator>,
    items: Arc<ItemService>,
    allocator: Arc<FifoAllocator>,
}

impl InvoiceService {
    pub fn new(
        coordinator: Arc<TransactionCoordinator>,
        items: Arc<ItemService>,
        allocator: Arc<FifoAllocator>,
    ) -> Self {
        Self {
            coordinator,
            items,
            allocator,
        }
    }

    /// Preview a FIFO allocation without billing anything
    pub async fn find_invoiceable_items_by_quantity(
        &self,
        customer_id: Uuid,
        product_id: Uuid,
        quantity: Decimal,
    ) -> AppResult<Vec<Allocation>> {
        let mut tx = self.coordinator.begin().await?;
        let result = self
            .allocator
            .allocate(tx.as_mut(), customer_id, product_id, quantity)
            .await;
        self.coordinator.discard(tx, result).await
    }

    pub async fn mark_items_as_invoiced(&self, item_ids: &[Uuid]) -> AppResult<Vec<Item>> {
        let mut tx = self.coordinator.begin().await?;
        let result = self.set_invoiced(tx.as_mut(), item_ids, true).await;
        let items = self.coordinator.complete(tx, result).await?;
        info!(count = items.len(), "Items marked as invoiced");
        Ok(items)
    }

    pub async fn unmark_items_as_invoiced(&self, item_ids: &[Uuid]) -> AppResult<Vec<Item>> {
        let mut tx = self.coordinator.begin().await?;
        let result = self.set_invoiced(tx.as_mut(), item_ids, false).await;
        let items = self.coordinator.complete(tx, result).await?;
        info!(count = items.len(), "Items unmarked as invoiced");
        Ok(items)
    }

    async fn set_invoiced(
        &self,
        tx: &mut dyn StoreTx,
        item_ids: &[Uuid],
        invoiced: bool,
    ) -> AppResult<Vec<Item>> {
        let ctx = MovementContext::manual(if invoiced { "invoiced" } else { "invoice reverted" });
        let mut updated = Vec::with_capacity(item_ids.len());
        for id in item_ids {
            let item = self
                .items
                .resolve(tx, &ItemLookup::by_id(*id).expecting(ItemState::Sold))
                .await?;
            let changes = ItemChanges {
                is_invoiced: Some(invoiced),
                ..Default::default()
            };
            updated.push(self.items.apply_changes(tx, item, changes, &ctx).await?);
        }
        Ok(updated)
    }

    /// Items of one completed sale that still have something to bill
    pub async fn get_invoiceable_items_from_order(
        &self,
        order_id: Uuid,
    ) -> AppResult<Vec<InvoiceCandidate>> {
        let mut tx = self.coordinator.begin().await?;
        let result = self.invoiceable_from_order(tx.as_mut(), order_id).await;
        self.coordinator.discard(tx, result).await
    }

    async fn invoiceable_from_order(
        &self,
        tx: &mut dyn StoreTx,
        order_id: Uuid,
    ) -> AppResult<Vec<InvoiceCandidate>> {
        let order = tx
            .order(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order {order_id}")))?;
        if order.order_type != OrderType::Sale {
            return Err(AppError::validation(
                "order_id",
                format!("Order {} is not a sale", order.code),
            ));
        }
        let candidates = tx
            .invoice_candidates(CandidateScope {
                sale_order_id: Some(order.id),
                ..Default::default()
            })
            .await?;
        Ok(candidates
            .into_iter()
            .filter(|c| c.remaining_quantity() > Decimal::ZERO)
            .collect())
    }

    /// Check that every line of a partial invoice can be covered
    pub async fn validate_partial_invoice_order(
        &self,
        order_id: Uuid,
    ) -> AppResult<PartialInvoiceValidation> {
        let mut tx = self.coordinator.begin().await?;
        let result = self.check_partial_invoice(tx.as_mut(), order_id).await;
        self.coordinator.discard(tx, result).await
    }

    async fn check_partial_invoice(
        &self,
        tx: &mut dyn StoreTx,
        order_id: Uuid,
    ) -> AppResult<PartialInvoiceValidation> {
        let order = tx
            .order(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order {order_id}")))?;
        if order.order_type != OrderType::PartialInvoice {
            return Err(AppError::validation(
                "order_id",
                format!("Order {} is not a partial invoice", order.code),
            ));
        }

        let mut problems = Vec::new();
        let Some(customer_id) = order.customer_id else {
            problems.push("Partial invoice has no customer".to_string());
            return Ok(PartialInvoiceValidation {
                order_id,
                is_valid: false,
                lines: Vec::new(),
                problems,
            });
        };

        let mut lines = Vec::new();
        for line in tx.order_products(order.id).await? {
            let linked: Decimal = tx
                .links_for_order_product(line.id)
                .await?
                .iter()
                .map(|l| l.quantity)
                .sum();
            let free = self
                .allocator
                .available(tx, customer_id, line.product_id)
                .await?;
            let available = linked + free;
            let is_satisfiable = available >= line.requested_quantity;
            if !is_satisfiable {
                problems.push(format!(
                    "Product {}: requested {}, available {}",
                    line.product_id, line.requested_quantity, available
                ));
            }
            lines.push(InvoiceLineCheck {
                product_id: line.product_id,
                requested: line.requested_quantity,
                available,
                is_satisfiable,
            });
        }

        Ok(PartialInvoiceValidation {
            order_id,
            is_valid: problems.is_empty(),
            lines,
            problems,
        })
    }
}
