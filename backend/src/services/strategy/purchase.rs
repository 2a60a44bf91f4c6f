//! Purchase and In orders mint new items into a warehouse

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use shared::{Item, ItemChanges, ItemState, NewItem};

use super::{MovementRequest, MovementStrategy};
use crate::error::{AppError, AppResult};
use crate::services::item::ItemService;
use crate::store::StoreTx;

pub struct PurchaseStrategy {
    items: Arc<ItemService>,
}

impl PurchaseStrategy {
    pub fn new(items: Arc<ItemService>) -> Self {
        Self { items }
    }
}

/// Item spec for a lot received on `req`'s order
pub(super) fn received_lot(req: &MovementRequest<'_>, warehouse_id: uuid::Uuid) -> AppResult<NewItem> {
    let quantity = req
        .input
        .quantity
        .ok_or_else(|| AppError::validation("quantity", "Received items need a quantity"))?;
    Ok(NewItem {
        product_id: req.product.id,
        warehouse_id: Some(warehouse_id),
        state: ItemState::Available,
        quantity,
        unit: req
            .input
            .unit
            .clone()
            .unwrap_or_else(|| req.product.unit.clone()),
        lot_number: req.input.lot_number.clone(),
        container_number: req.input.container_number.clone(),
        item_number: req.input.item_number.clone(),
        barcode: req.input.barcode.clone(),
        parent_item_id: None,
        transformed_from_item_id: None,
        is_partition: false,
        cost: req.input.cost,
        origin_order_id: Some(req.order.id),
    })
}

/// Warehouse, quantity and cost corrections for an item the order minted
pub(super) async fn correct_received(
    items: &ItemService,
    tx: &mut dyn StoreTx,
    req: &MovementRequest<'_>,
) -> AppResult<Item> {
    let item = items.resolve(tx, &req.lookup()).await?;

    let mut changes = ItemChanges {
        cost: req.input.cost.filter(|c| Some(*c) != item.cost),
        ..Default::default()
    };
    // Stock that already left the warehouse keeps its place and balance
    if item.state == ItemState::Available {
        if let Some(target) = req.input.warehouse_id.or(req.order.destination_warehouse_id) {
            if item.warehouse_id != Some(target) {
                changes.warehouse_id = Some(Some(target));
            }
        }
        changes.current_quantity = req
            .input
            .quantity
            .filter(|q| *q != item.current_quantity);
    }

    items.apply_changes(tx, item, changes, &req.context()).await
}

#[async_trait]
impl MovementStrategy for PurchaseStrategy {
    fn name(&self) -> &'static str {
        "purchase"
    }

    async fn create(&self, tx: &mut dyn StoreTx, req: MovementRequest<'_>) -> AppResult<Vec<Item>> {
        let warehouse_id = req.destination_warehouse(tx).await?;
        let spec = received_lot(&req, warehouse_id)?;
        let item = self.items.create_item(tx, spec, &req.context()).await?;
        req.link(tx, &item, item.current_quantity).await?;

        debug!(order = %req.order.code, item = %item.barcode, "Received item");
        Ok(vec![item])
    }

    async fn update(&self, tx: &mut dyn StoreTx, req: MovementRequest<'_>) -> AppResult<Item> {
        correct_received(&self.items, tx, &req).await
    }

    async fn delete(&self, tx: &mut dyn StoreTx, req: MovementRequest<'_>) -> AppResult<()> {
        let item = self.items.resolve(tx, &req.lookup()).await?;
        self.items.delete_item(tx, item.id, &req.context()).await?;

        debug!(order = %req.order.code, item = %item.barcode, "Removed received item");
        Ok(())
    }
}
