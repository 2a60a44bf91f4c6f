//! Transform orders turn part of one item into a new item
//!
//! Same product is a cut: the new item is a partition of its parent. A
//! different product is a transform and the new item records where it came
//! from. Both sides get a `transform` ledger entry pointing at the other.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::debug;

use shared::{
    validate_positive_quantity, Item, ItemChanges, ItemInput, ItemState, MovementType, NewItem,
};

use super::purchase::correct_received;
use super::{MovementRequest, MovementStrategy};
use crate::error::{AppError, AppResult};
use crate::services::item::{ItemLookup, ItemService};
use crate::services::ledger::Ledger;
use crate::store::StoreTx;

pub struct TransformStrategy {
    items: Arc<ItemService>,
    ledger: Arc<Ledger>,
}

impl TransformStrategy {
    pub fn new(items: Arc<ItemService>, ledger: Arc<Ledger>) -> Self {
        Self { items, ledger }
    }

    /// Quantity a derived item took from its source
    async fn consumed_from(
        &self,
        tx: &mut dyn StoreTx,
        source: &Item,
        derived: &Item,
    ) -> AppResult<Decimal> {
        let history = self.ledger.list_for_item(tx, source.id).await?;
        history
            .iter()
            .rev()
            .find(|m| {
                m.movement_type == MovementType::Transform
                    && m.related_item_id == Some(derived.id)
                    && m.quantity < Decimal::ZERO
            })
            .map(|m| -m.quantity)
            .ok_or_else(|| {
                AppError::InvalidState(format!(
                    "No transform entry on {} for derived item {}",
                    source.barcode, derived.barcode
                ))
            })
    }
}

#[async_trait]
impl MovementStrategy for TransformStrategy {
    fn name(&self) -> &'static str {
        "transform"
    }

    async fn create(&self, tx: &mut dyn StoreTx, req: MovementRequest<'_>) -> AppResult<Vec<Item>> {
        let source_id = req
            .input
            .source_item_id
            .ok_or_else(|| AppError::validation("source_item_id", "Transform items need a source item"))?;
        let source = self
            .items
            .resolve(tx, &ItemLookup::by_id(source_id).expecting(ItemState::Available))
            .await?;

        let consumed = req
            .input
            .consumed_quantity
            .or(req.input.quantity)
            .ok_or_else(|| AppError::validation("quantity", "Transform items need a quantity"))?;
        validate_positive_quantity(consumed)
            .map_err(|m| AppError::validation("consumed_quantity", m))?;
        if consumed > source.current_quantity {
            return Err(AppError::InsufficientInventory {
                product_id: source.product_id,
                requested: consumed,
                available: source.current_quantity,
            });
        }
        let produced = req.input.quantity.unwrap_or(consumed);
        let is_cut = source.product_id == req.product.id;

        let warehouse_id = match req
            .input
            .warehouse_id
            .or(req.order.destination_warehouse_id)
            .or(source.warehouse_id)
        {
            Some(id) => id,
            None => req.destination_warehouse(tx).await?,
        };

        let spec = NewItem {
            product_id: req.product.id,
            warehouse_id: Some(warehouse_id),
            state: ItemState::Available,
            quantity: produced,
            unit: req
                .input
                .unit
                .clone()
                .unwrap_or_else(|| req.product.unit.clone()),
            lot_number: req
                .input
                .lot_number
                .clone()
                .or_else(|| source.lot_number.clone()),
            container_number: req.input.container_number.clone(),
            item_number: req.input.item_number.clone(),
            barcode: req.input.barcode.clone(),
            parent_item_id: is_cut.then_some(source.id),
            transformed_from_item_id: (!is_cut).then_some(source.id),
            is_partition: is_cut,
            cost: req.input.cost.or(source.cost),
            origin_order_id: Some(req.order.id),
        };
        let ctx = req.context().with_quantity_movement(MovementType::Transform);
        let derived = self
            .items
            .create_item(tx, spec, &ctx.clone().with_related(source.id))
            .await?;

        let remaining = source.current_quantity - consumed;
        let source = self
            .items
            .apply_changes(
                tx,
                source,
                ItemChanges {
                    current_quantity: Some(remaining),
                    ..Default::default()
                },
                &ctx.with_related(derived.id),
            )
            .await?;
        req.link(tx, &derived, derived.current_quantity).await?;

        debug!(
            order = %req.order.code,
            source = %source.barcode,
            derived = %derived.barcode,
            consumed = %consumed,
            cut = is_cut,
            "Item transformed"
        );
        Ok(vec![derived, source])
    }

    async fn update(&self, tx: &mut dyn StoreTx, req: MovementRequest<'_>) -> AppResult<Item> {
        // The produced quantity is tied to the source decrement
        let input = ItemInput {
            quantity: None,
            ..req.input.clone()
        };
        let req = MovementRequest {
            input: &input,
            ..req
        };
        correct_received(&self.items, tx, &req).await
    }

    async fn delete(&self, tx: &mut dyn StoreTx, req: MovementRequest<'_>) -> AppResult<()> {
        let derived = self.items.resolve(tx, &req.lookup()).await?;
        let source_id = derived
            .parent_item_id
            .or(derived.transformed_from_item_id)
            .ok_or_else(|| {
                AppError::InvalidState(format!("Item {} has no source item", derived.barcode))
            })?;
        let source = tx
            .item_by_id(source_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Item {source_id}")))?;
        let consumed = self.consumed_from(tx, &source, &derived).await?;

        let ctx = req
            .context()
            .reversed()
            .with_quantity_movement(MovementType::Transform);
        let restored = source.current_quantity + consumed;
        let source = self
            .items
            .apply_changes(
                tx,
                source,
                ItemChanges {
                    current_quantity: Some(restored),
                    ..Default::default()
                },
                &ctx.clone().with_related(derived.id),
            )
            .await?;
        self.items
            .delete_item(tx, derived.id, &ctx.with_related(source.id))
            .await?;

        debug!(order = %req.order.code, source = %source.barcode, restored = %consumed, "Transform reversed");
        Ok(())
    }
}
