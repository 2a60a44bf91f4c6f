//! Transfer orders move available items between warehouses

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use shared::{validate_transfer_warehouses, Item, ItemChanges, ItemState, OrderState};

use super::{MovementRequest, MovementStrategy};
use crate::error::{AppError, AppResult};
use crate::services::item::{ItemService, MovementContext};
use crate::store::StoreTx;

pub struct TransferStrategy {
    items: Arc<ItemService>,
}

impl TransferStrategy {
    pub fn new(items: Arc<ItemService>) -> Self {
        Self { items }
    }
}

/// (source, destination) of a transfer order
fn endpoints(req: &MovementRequest<'_>) -> AppResult<(Uuid, Uuid)> {
    let source = req.order.source_warehouse_id;
    let destination = req.order.destination_warehouse_id;
    validate_transfer_warehouses(source, destination)
        .map_err(|m| AppError::validation("destination_warehouse_id", m))?;
    match (source, destination) {
        (Some(s), Some(d)) => Ok((s, d)),
        _ => Err(AppError::validation(
            "source_warehouse_id",
            "Transfer requires source and destination warehouses",
        )),
    }
}

impl TransferStrategy {
    async fn move_to(
        &self,
        tx: &mut dyn StoreTx,
        item: Item,
        warehouse_id: Uuid,
        ctx: &MovementContext,
    ) -> AppResult<Item> {
        let changes = if item.warehouse_id == Some(warehouse_id) {
            ItemChanges::default()
        } else {
            ItemChanges::default().with_warehouse(Some(warehouse_id))
        };
        self.items.apply_changes(tx, item, changes, ctx).await
    }
}

#[async_trait]
impl MovementStrategy for TransferStrategy {
    fn name(&self) -> &'static str {
        "transfer"
    }

    async fn create(&self, tx: &mut dyn StoreTx, req: MovementRequest<'_>) -> AppResult<Vec<Item>> {
        let (source, destination) = endpoints(&req)?;
        let lookup = req
            .lookup()
            .in_warehouse(Some(source))
            .expecting(ItemState::Available);
        let item = self.items.resolve(tx, &lookup).await?;
        req.ensure_product(&item)?;
        if item.warehouse_id != Some(source) {
            return Err(AppError::InvalidState(format!(
                "Item {} is not in the transfer's source warehouse",
                item.barcode
            )));
        }

        let item = self.move_to(tx, item, destination, &req.context()).await?;
        req.link(tx, &item, item.current_quantity).await?;

        debug!(order = %req.order.code, item = %item.barcode, "Item transferred");
        Ok(vec![item])
    }

    async fn update(&self, tx: &mut dyn StoreTx, req: MovementRequest<'_>) -> AppResult<Item> {
        let (source, destination) = endpoints(&req)?;
        let item = self.items.resolve(tx, &req.lookup()).await?;
        if req.order_state == OrderState::Cancelled {
            self.move_to(tx, item, source, &req.context().reversed()).await
        } else {
            self.move_to(tx, item, destination, &req.context()).await
        }
    }

    async fn delete(&self, tx: &mut dyn StoreTx, req: MovementRequest<'_>) -> AppResult<()> {
        let (source, _) = endpoints(&req)?;
        let item = self.items.resolve(tx, &req.lookup()).await?;
        let item = self.move_to(tx, item, source, &req.context()).await?;
        req.unlink(tx, item.id).await?;

        debug!(order = %req.order.code, item = %item.barcode, "Transfer reversed");
        Ok(())
    }
}
