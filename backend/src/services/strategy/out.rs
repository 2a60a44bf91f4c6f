//! Out orders drop items from stock (loss, samples, consumption)

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use shared::{Item, ItemChanges, ItemState, OrderState};

use super::{MovementRequest, MovementStrategy};
use crate::error::AppResult;
use crate::services::item::ItemService;
use crate::services::ledger::Ledger;
use crate::store::StoreTx;

pub struct OutStrategy {
    items: Arc<ItemService>,
    ledger: Arc<Ledger>,
}

impl OutStrategy {
    pub fn new(items: Arc<ItemService>, ledger: Arc<Ledger>) -> Self {
        Self { items, ledger }
    }

    /// Warehouse the item was dropped from
    async fn origin_warehouse(
        &self,
        tx: &mut dyn StoreTx,
        req: &MovementRequest<'_>,
        item: &Item,
    ) -> AppResult<Option<Uuid>> {
        if let Some(id) = req.order.source_warehouse_id {
            return Ok(Some(id));
        }
        Ok(self
            .ledger
            .latest_for_order(tx, item.id, req.order.id)
            .await?
            .and_then(|entry| entry.source_warehouse_id))
    }

    async fn restore(&self, tx: &mut dyn StoreTx, req: &MovementRequest<'_>, item: Item) -> AppResult<Item> {
        if item.state != ItemState::Dropped {
            return Ok(item);
        }
        let warehouse_id = self.origin_warehouse(tx, req, &item).await?;
        let changes = ItemChanges::state(ItemState::Available).with_warehouse(warehouse_id);
        self.items
            .apply_changes(tx, item, changes, &req.context().reversed())
            .await
    }
}

#[async_trait]
impl MovementStrategy for OutStrategy {
    fn name(&self) -> &'static str {
        "out"
    }

    async fn create(&self, tx: &mut dyn StoreTx, req: MovementRequest<'_>) -> AppResult<Vec<Item>> {
        let lookup = req
            .lookup()
            .in_warehouse(req.input.warehouse_id.or(req.order.source_warehouse_id))
            .expecting(ItemState::Available);
        let item = self.items.resolve(tx, &lookup).await?;
        req.ensure_product(&item)?;

        let changes = ItemChanges::state(ItemState::Dropped).with_warehouse(None);
        let item = self.items.apply_changes(tx, item, changes, &req.context()).await?;
        req.link(tx, &item, item.current_quantity).await?;

        debug!(order = %req.order.code, item = %item.barcode, "Item dropped");
        Ok(vec![item])
    }

    async fn update(&self, tx: &mut dyn StoreTx, req: MovementRequest<'_>) -> AppResult<Item> {
        let item = self.items.resolve(tx, &req.lookup()).await?;
        if req.order_state == OrderState::Cancelled {
            return self.restore(tx, &req, item).await;
        }
        Ok(item)
    }

    async fn delete(&self, tx: &mut dyn StoreTx, req: MovementRequest<'_>) -> AppResult<()> {
        let item = self.items.resolve(tx, &req.lookup()).await?;
        let item = self.restore(tx, &req, item).await?;
        req.unlink(tx, item.id).await?;

        debug!(order = %req.order.code, item = %item.barcode, "Drop reversed");
        Ok(())
    }
}
