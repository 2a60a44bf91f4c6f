//! Sale orders reserve available items and sell them on completion

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use shared::{Item, ItemChanges, ItemState, OrderState};

use super::{MovementRequest, MovementStrategy};
use crate::error::AppResult;
use crate::services::item::ItemService;
use crate::store::StoreTx;

pub struct SaleStrategy {
    items: Arc<ItemService>,
}

impl SaleStrategy {
    pub fn new(items: Arc<ItemService>) -> Self {
        Self { items }
    }
}

/// Custody state a sale in `order_state` puts its items in
fn sale_item_state(order_state: OrderState) -> ItemState {
    match order_state {
        OrderState::Completed => ItemState::Sold,
        OrderState::Cancelled => ItemState::Available,
        OrderState::Draft | OrderState::Confirmed | OrderState::Processing => ItemState::Reserved,
    }
}

impl SaleStrategy {
    async fn follow_order(&self, tx: &mut dyn StoreTx, req: &MovementRequest<'_>, item: Item) -> AppResult<Item> {
        let target = sale_item_state(req.order_state);
        let mut changes = ItemChanges::default();
        if item.state != target {
            changes.state = Some(target);
        }
        if let Some(warehouse_id) = req.input.warehouse_id {
            if item.warehouse_id != Some(warehouse_id) {
                changes.warehouse_id = Some(Some(warehouse_id));
            }
        }
        self.items.apply_changes(tx, item, changes, &req.context()).await
    }
}

#[async_trait]
impl MovementStrategy for SaleStrategy {
    fn name(&self) -> &'static str {
        "sale"
    }

    async fn create(&self, tx: &mut dyn StoreTx, req: MovementRequest<'_>) -> AppResult<Vec<Item>> {
        let lookup = req
            .lookup()
            .in_warehouse(req.input.warehouse_id.or(req.order.source_warehouse_id))
            .expecting(ItemState::Available);
        let item = self.items.resolve(tx, &lookup).await?;
        req.ensure_product(&item)?;

        let item = self.follow_order(tx, &req, item).await?;
        req.link(tx, &item, item.current_quantity).await?;

        debug!(order = %req.order.code, item = %item.barcode, state = %item.state, "Sale item added");
        Ok(vec![item])
    }

    async fn update(&self, tx: &mut dyn StoreTx, req: MovementRequest<'_>) -> AppResult<Item> {
        let item = self.items.resolve(tx, &req.lookup()).await?;
        self.follow_order(tx, &req, item).await
    }

    async fn delete(&self, tx: &mut dyn StoreTx, req: MovementRequest<'_>) -> AppResult<()> {
        let item = self.items.resolve(tx, &req.lookup()).await?;
        let item = self
            .items
            .apply_changes(tx, item, ItemChanges::state(ItemState::Available), &req.context())
            .await?;
        req.unlink(tx, item.id).await?;

        debug!(order = %req.order.code, item = %item.barcode, "Sale item released");
        Ok(())
    }
}
