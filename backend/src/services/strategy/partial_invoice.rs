//! Partial-invoice orders bill sold items without moving them
//!
//! Links carry the billed quantity. Items are flagged invoiced once completed
//! partial invoices cover their whole quantity.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::debug;
use uuid::Uuid;

use shared::{Item, ItemChanges, ItemState, OrderState};

use super::{MovementRequest, MovementStrategy};
use crate::error::{AppError, AppResult};
use crate::services::allocator::FifoAllocator;
use crate::services::item::{ItemLookup, ItemService};
use crate::store::StoreTx;

pub struct PartialInvoiceStrategy {
    items: Arc<ItemService>,
    allocator: Arc<FifoAllocator>,
}

impl PartialInvoiceStrategy {
    pub fn new(items: Arc<ItemService>, allocator: Arc<FifoAllocator>) -> Self {
        Self { items, allocator }
    }

    /// Quantity this line currently bills from the item
    async fn line_quantity(
        tx: &mut dyn StoreTx,
        req: &MovementRequest<'_>,
        item_id: Uuid,
    ) -> AppResult<Decimal> {
        Ok(tx
            .links_for_order_product(req.order_product.id)
            .await?
            .into_iter()
            .find(|l| l.item_id == item_id)
            .map(|l| l.quantity)
            .unwrap_or(Decimal::ZERO))
    }

    /// Add `quantity` to whatever this line already bills from the item
    async fn bill(
        &self,
        tx: &mut dyn StoreTx,
        req: &MovementRequest<'_>,
        item: &Item,
        quantity: Decimal,
    ) -> AppResult<()> {
        let already = Self::line_quantity(tx, req, item.id).await?;
        req.link(tx, item, already + quantity).await
    }

    /// Quantity of the item still open for billing to the customer
    async fn remaining(
        &self,
        tx: &mut dyn StoreTx,
        req: &MovementRequest<'_>,
        customer_id: Uuid,
        item: &Item,
    ) -> AppResult<Decimal> {
        self.allocator
            .candidates(tx, customer_id, req.product.id)
            .await?
            .iter()
            .find(|c| c.item.id == item.id)
            .map(|c| c.remaining_quantity())
            .ok_or_else(|| {
                AppError::InvalidState(format!(
                    "Item {} is not billable for this customer",
                    item.barcode
                ))
            })
    }

    fn ensure_billable(
        req: &MovementRequest<'_>,
        quantity: Decimal,
        available: Decimal,
    ) -> AppResult<()> {
        if quantity <= Decimal::ZERO || quantity > available {
            return Err(AppError::InsufficientInventory {
                product_id: req.product.id,
                requested: quantity,
                available,
            });
        }
        Ok(())
    }

    async fn bill_item(
        &self,
        tx: &mut dyn StoreTx,
        req: &MovementRequest<'_>,
        customer_id: Uuid,
    ) -> AppResult<Item> {
        let lookup = ItemLookup {
            quantity: None,
            ..req.lookup()
        }
        .expecting(ItemState::Sold);
        let item = self.items.resolve(tx, &lookup).await?;
        req.ensure_product(&item)?;

        let remaining = self.remaining(tx, req, customer_id, &item).await?;
        let quantity = req.input.quantity.unwrap_or(remaining);
        Self::ensure_billable(req, quantity, remaining)?;
        self.bill(tx, req, &item, quantity).await?;
        Ok(item)
    }

    /// Replace the quantity this line bills from an item it already covers
    async fn rebill(
        &self,
        tx: &mut dyn StoreTx,
        req: &MovementRequest<'_>,
        item: &Item,
        quantity: Decimal,
    ) -> AppResult<()> {
        let current = Self::line_quantity(tx, req, item.id).await?;
        if quantity == current {
            return Ok(());
        }
        let customer_id = req
            .order
            .customer_id
            .ok_or_else(|| AppError::validation("customer_id", "Partial invoices need a customer"))?;
        let available = self.remaining(tx, req, customer_id, item).await? + current;
        Self::ensure_billable(req, quantity, available)?;
        req.link(tx, item, quantity).await?;
        debug!(
            order = %req.order.code,
            item = %item.barcode,
            from = %current,
            to = %quantity,
            "Billed quantity changed"
        );
        Ok(())
    }
}

#[async_trait]
impl MovementStrategy for PartialInvoiceStrategy {
    fn name(&self) -> &'static str {
        "partial-invoice"
    }

    async fn create(&self, tx: &mut dyn StoreTx, req: MovementRequest<'_>) -> AppResult<Vec<Item>> {
        let customer_id = req
            .order
            .customer_id
            .ok_or_else(|| AppError::validation("customer_id", "Partial invoices need a customer"))?;

        if req.input.key().is_some() {
            let item = self.bill_item(tx, &req, customer_id).await?;
            debug!(order = %req.order.code, item = %item.barcode, "Item billed");
            return Ok(vec![item]);
        }

        let quantity = req.input.quantity.ok_or_else(|| {
            AppError::validation("quantity", "Give an item or a quantity to bill")
        })?;
        let allocations = self
            .allocator
            .allocate(tx, customer_id, req.product.id, quantity)
            .await?;

        let mut billed = Vec::with_capacity(allocations.len());
        for allocation in allocations {
            self.bill(tx, &req, &allocation.item, allocation.quantity_to_invoice)
                .await?;
            debug!(
                order = %req.order.code,
                item = %allocation.item.barcode,
                quantity = %allocation.quantity_to_invoice,
                source = %allocation.source_order_code,
                "Allocated item billed"
            );
            billed.push(allocation.item);
        }
        Ok(billed)
    }

    async fn update(&self, tx: &mut dyn StoreTx, req: MovementRequest<'_>) -> AppResult<Item> {
        let item = self.items.resolve(tx, &ItemLookup::from_input(req.input, None)).await?;
        if let Some(quantity) = req.input.quantity {
            self.rebill(tx, &req, &item, quantity).await?;
        }
        let changes = match req.order_state {
            OrderState::Completed if !item.is_invoiced => {
                let billed = tx.billed_quantity(item.id).await?;
                ItemChanges {
                    is_invoiced: (item.current_quantity - billed <= Decimal::ZERO).then_some(true),
                    ..Default::default()
                }
            }
            OrderState::Cancelled if item.is_invoiced => ItemChanges {
                is_invoiced: Some(false),
                ..Default::default()
            },
            _ => ItemChanges::default(),
        };
        self.items.apply_changes(tx, item, changes, &req.context()).await
    }

    async fn delete(&self, tx: &mut dyn StoreTx, req: MovementRequest<'_>) -> AppResult<()> {
        let item = self.items.resolve(tx, &ItemLookup::from_input(req.input, None)).await?;
        req.unlink(tx, item.id).await?;
        if item.is_invoiced {
            let changes = ItemChanges {
                is_invoiced: Some(false),
                ..Default::default()
            };
            self.items.apply_changes(tx, item, changes, &req.context()).await?;
        }
        Ok(())
    }
}
