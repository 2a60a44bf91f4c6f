//! Return orders bring sold items back into stock

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use shared::{Item, ItemChanges, ItemState, OrderState};

use super::{MovementRequest, MovementStrategy};
use crate::error::AppResult;
use crate::services::item::{ItemService, MovementContext};
use crate::store::StoreTx;

pub struct ReturnStrategy {
    items: Arc<ItemService>,
}

impl ReturnStrategy {
    pub fn new(items: Arc<ItemService>) -> Self {
        Self { items }
    }

    /// Send the item back to the customer side
    async fn unreturn(&self, tx: &mut dyn StoreTx, req: &MovementRequest<'_>, item: Item) -> AppResult<Item> {
        let changes = ItemChanges::state(ItemState::Sold).with_warehouse(None);
        let ctx: MovementContext = req.context().reversed();
        self.items.apply_changes(tx, item, changes, &ctx).await
    }
}

#[async_trait]
impl MovementStrategy for ReturnStrategy {
    fn name(&self) -> &'static str {
        "return"
    }

    async fn create(&self, tx: &mut dyn StoreTx, req: MovementRequest<'_>) -> AppResult<Vec<Item>> {
        let item = self
            .items
            .resolve(tx, &req.lookup().in_warehouse(None).expecting(ItemState::Sold))
            .await?;
        req.ensure_product(&item)?;

        let warehouse_id = req.destination_warehouse(tx).await?;
        let changes = ItemChanges::state(ItemState::Available).with_warehouse(Some(warehouse_id));
        let item = self.items.apply_changes(tx, item, changes, &req.context()).await?;
        req.link(tx, &item, item.current_quantity).await?;

        debug!(order = %req.order.code, item = %item.barcode, "Item returned to stock");
        Ok(vec![item])
    }

    async fn update(&self, tx: &mut dyn StoreTx, req: MovementRequest<'_>) -> AppResult<Item> {
        let item = self.items.resolve(tx, &req.lookup()).await?;
        if req.order_state == OrderState::Cancelled && item.state == ItemState::Available {
            return self.unreturn(tx, &req, item).await;
        }
        Ok(item)
    }

    async fn delete(&self, tx: &mut dyn StoreTx, req: MovementRequest<'_>) -> AppResult<()> {
        let item = self.items.resolve(tx, &req.lookup()).await?;
        let item = if item.state == ItemState::Sold {
            item
        } else {
            self.unreturn(tx, &req, item).await?
        };
        req.unlink(tx, item.id).await?;

        debug!(order = %req.order.code, item = %item.barcode, "Return reversed");
        Ok(())
    }
}
