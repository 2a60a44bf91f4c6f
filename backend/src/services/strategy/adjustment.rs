//! Adjustment orders correct item fields with a traceable order behind them
//!
//! Reversal compensates the net effect this order had on the item: the sum of
//! the quantities of every ledger entry it wrote, and the warehouse the item
//! sat in before the order's first transfer. Changes made by other orders in
//! between are left in place.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::debug;

use shared::{Item, ItemChanges, MovementType};

use super::{MovementRequest, MovementStrategy};
use crate::error::{AppError, AppResult};
use crate::services::item::{ItemLookup, ItemService};
use crate::services::ledger::Ledger;
use crate::store::StoreTx;

pub struct AdjustmentStrategy {
    items: Arc<ItemService>,
    ledger: Arc<Ledger>,
}

impl AdjustmentStrategy {
    pub fn new(items: Arc<ItemService>, ledger: Arc<Ledger>) -> Self {
        Self { items, ledger }
    }

    /// The quantity on an adjustment line is the corrected value, not an identifier
    fn lookup(req: &MovementRequest<'_>) -> ItemLookup {
        ItemLookup {
            quantity: None,
            warehouse_id: None,
            ..req.lookup()
        }
    }

    async fn adjust(&self, tx: &mut dyn StoreTx, req: &MovementRequest<'_>) -> AppResult<Item> {
        let item = self.items.resolve(tx, &Self::lookup(req)).await?;
        req.ensure_product(&item)?;
        if req.input.quantity.map_or(false, |q| q < Decimal::ZERO) {
            return Err(AppError::validation(
                "quantity",
                "Corrected quantity cannot be negative",
            ));
        }

        let changes = ItemChanges {
            current_quantity: req
                .input
                .quantity
                .filter(|q| *q != item.current_quantity),
            warehouse_id: req
                .input
                .warehouse_id
                .filter(|w| item.warehouse_id != Some(*w))
                .map(Some),
            cost: req.input.cost.filter(|c| item.cost != Some(*c)),
            ..Default::default()
        };
        self.items.apply_changes(tx, item, changes, &req.context()).await
    }
}

#[async_trait]
impl MovementStrategy for AdjustmentStrategy {
    fn name(&self) -> &'static str {
        "adjustment"
    }

    async fn create(&self, tx: &mut dyn StoreTx, req: MovementRequest<'_>) -> AppResult<Vec<Item>> {
        let item = self.adjust(tx, &req).await?;
        req.link(tx, &item, item.current_quantity).await?;

        debug!(order = %req.order.code, item = %item.barcode, quantity = %item.current_quantity, "Item adjusted");
        Ok(vec![item])
    }

    async fn update(&self, tx: &mut dyn StoreTx, req: MovementRequest<'_>) -> AppResult<Item> {
        self.adjust(tx, &req).await
    }

    async fn delete(&self, tx: &mut dyn StoreTx, req: MovementRequest<'_>) -> AppResult<()> {
        let item = self.items.resolve(tx, &Self::lookup(&req)).await?;
        let history = self.ledger.list_for_item(tx, item.id).await?;
        if history.is_empty() {
            return Err(AppError::InvalidState(format!(
                "Item {} has no ledger history to reverse",
                item.barcode
            )));
        }

        let written: Vec<_> = history
            .iter()
            .filter(|m| m.order_id == Some(req.order.id))
            .collect();
        if written.is_empty() {
            debug!(order = %req.order.code, item = %item.barcode, "Adjustment made no change; unlinking");
            return req.unlink(tx, item.id).await;
        }

        let net: Decimal = written.iter().map(|m| m.quantity).sum();
        let original_warehouse = written
            .iter()
            .find(|m| m.movement_type == MovementType::Transfer)
            .and_then(|m| m.source_warehouse_id);

        let changes = ItemChanges {
            current_quantity: Some(item.current_quantity - net).filter(|_| !net.is_zero()),
            warehouse_id: original_warehouse
                .filter(|w| item.warehouse_id != Some(*w))
                .map(Some),
            ..Default::default()
        };
        let item = self
            .items
            .apply_changes(tx, item, changes, &req.context().reversed())
            .await?;
        req.unlink(tx, item.id).await?;

        debug!(order = %req.order.code, item = %item.barcode, reverted = %net, "Adjustment reversed");
        Ok(())
    }
}
