//! Item state machine
//!
//! Owns every change to an item's quantity, warehouse and custody state. Each
//! change is diffed against the previous snapshot and recorded in the ledger.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

use shared::{
    generate_barcode, validate_barcode, validate_non_negative_balance,
    validate_positive_quantity, Item, ItemChanges, ItemInput, ItemState, MovementType,
    NewItem, NewMovement, Order, OrderProduct, OrderType, VirtualBarcode,
};

use super::coordinator::TransactionCoordinator;
use super::ledger::Ledger;
use crate::error::{AppError, AppResult};
use crate::store::{QuantityMatch, StoreTx};

/// Who is changing an item and how the ledger should label it
#[derive(Debug, Clone, Default)]
pub struct MovementContext {
    pub order_id: Option<Uuid>,
    pub order_product_id: Option<Uuid>,
    pub order_type: Option<OrderType>,
    pub reverse: bool,
    /// Entry type for quantity changes; `adjustment` when unset
    pub quantity_movement: Option<MovementType>,
    pub related_item_id: Option<Uuid>,
    pub reason: Option<String>,
}

impl MovementContext {
    pub fn manual(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn for_order(order: &Order, line: &OrderProduct, reverse: bool) -> Self {
        Self {
            order_id: Some(order.id),
            order_product_id: Some(line.id),
            order_type: Some(order.order_type),
            reverse,
            reason: Some(format!("order {}", order.code)),
            ..Default::default()
        }
    }

    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }

    pub fn with_quantity_movement(mut self, movement_type: MovementType) -> Self {
        self.quantity_movement = Some(movement_type);
        self
    }

    pub fn with_related(mut self, item_id: Uuid) -> Self {
        self.related_item_id = Some(item_id);
        self
    }

    fn entry(&self, item: &Item, movement_type: MovementType) -> NewMovement {
        NewMovement {
            item_id: item.id,
            product_id: item.product_id,
            movement_type,
            quantity: Decimal::ZERO,
            balance_before: item.current_quantity,
            balance_after: item.current_quantity,
            order_id: self.order_id,
            order_product_id: self.order_product_id,
            source_warehouse_id: None,
            destination_warehouse_id: None,
            related_item_id: self.related_item_id,
            reason: self.reason.clone(),
        }
    }
}

/// Ways an existing item can be identified, tried in order
#[derive(Debug, Clone, Default)]
pub struct ItemLookup {
    pub id: Option<Uuid>,
    pub barcode: Option<String>,
    pub product_id: Option<Uuid>,
    pub quantity: Option<Decimal>,
    pub warehouse_id: Option<Uuid>,
    /// Required custody state of the match
    pub expected_state: Option<ItemState>,
}

impl ItemLookup {
    pub fn by_id(id: Uuid) -> Self {
        Self {
            id: Some(id),
            ..Default::default()
        }
    }

    pub fn from_input(input: &ItemInput, product_id: Option<Uuid>) -> Self {
        Self {
            id: input.id,
            barcode: input.barcode.clone(),
            product_id,
            quantity: input.quantity,
            warehouse_id: input.warehouse_id,
            expected_state: None,
        }
    }

    pub fn expecting(mut self, state: ItemState) -> Self {
        self.expected_state = Some(state);
        self
    }

    pub fn in_warehouse(mut self, warehouse_id: Option<Uuid>) -> Self {
        self.warehouse_id = warehouse_id;
        self
    }

    fn scanned_barcode(&self) -> Option<&str> {
        self.barcode
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
    }

    fn quantity_match(&self) -> Option<QuantityMatch> {
        Some(QuantityMatch {
            product_id: self.product_id?,
            quantity: self.quantity?,
            warehouse_id: self.warehouse_id,
            state: self.expected_state.unwrap_or(ItemState::Available),
        })
    }
}

/// Ledger entries implied by moving an item from `before` to `after`.
///
/// Quantity first, then warehouse, then custody state, so the balances chain.
pub fn synthesize_movements(before: &Item, after: &Item, ctx: &MovementContext) -> Vec<NewMovement> {
    let mut entries = Vec::new();

    if after.current_quantity != before.current_quantity {
        let movement_type = ctx.quantity_movement.unwrap_or(MovementType::Adjustment);
        let mut entry = ctx.entry(before, movement_type);
        entry.quantity = after.current_quantity - before.current_quantity;
        entry.balance_after = after.current_quantity;
        entry.source_warehouse_id = before.warehouse_id;
        entry.destination_warehouse_id = after.warehouse_id;
        entries.push(entry);
    }

    // A transfer needs both ends; one-sided moves ride on the state change
    if after.warehouse_id != before.warehouse_id {
        if let (Some(from), Some(to)) = (before.warehouse_id, after.warehouse_id) {
            let mut entry = ctx.entry(after, MovementType::Transfer);
            entry.source_warehouse_id = Some(from);
            entry.destination_warehouse_id = Some(to);
            entries.push(entry);
        }
    }

    if after.state != before.state {
        let movement_type = MovementType::for_state_change(ctx.order_type, ctx.reverse, after.state);
        let mut entry = ctx.entry(after, movement_type);
        entry.source_warehouse_id = before.warehouse_id;
        entry.destination_warehouse_id = after.warehouse_id;
        entries.push(entry);
    }

    entries
}

pub struct ItemService {
    ledger: Arc<Ledger>,
    coordinator: Arc<TransactionCoordinator>,
}

impl ItemService {
    pub fn new(ledger: Arc<Ledger>, coordinator: Arc<TransactionCoordinator>) -> Self {
        Self {
            ledger,
            coordinator,
        }
    }

    // ========================================================================
    // Public entry points (one transaction each)
    // ========================================================================

    pub async fn create(&self, new_item: NewItem) -> AppResult<Item> {
        let mut tx = self.coordinator.begin().await?;
        let result = self
            .create_item(tx.as_mut(), new_item, &MovementContext::manual("item created"))
            .await;
        let item = self.coordinator.complete(tx, result).await?;
        info!(item_id = %item.id, barcode = %item.barcode, "Item created");
        Ok(item)
    }

    pub async fn update(&self, lookup: ItemLookup, changes: ItemChanges) -> AppResult<Item> {
        let mut tx = self.coordinator.begin().await?;
        let result = self
            .update_item(
                tx.as_mut(),
                &lookup,
                changes,
                &MovementContext::manual("item updated"),
            )
            .await;
        let item = self.coordinator.complete(tx, result).await?;
        info!(item_id = %item.id, "Item updated");
        Ok(item)
    }

    pub async fn delete(&self, id: Uuid) -> AppResult<Item> {
        let mut tx = self.coordinator.begin().await?;
        let result = self
            .delete_item(tx.as_mut(), id, &MovementContext::manual("item deleted"))
            .await;
        let item = self.coordinator.complete(tx, result).await?;
        info!(item_id = %item.id, "Item deleted");
        Ok(item)
    }

    // ========================================================================
    // Transaction-level operations
    // ========================================================================

    /// Mint a new item and record its opening balance
    pub async fn create_item(
        &self,
        tx: &mut dyn StoreTx,
        new_item: NewItem,
        ctx: &MovementContext,
    ) -> AppResult<Item> {
        validate_positive_quantity(new_item.quantity)
            .map_err(|m| AppError::validation("quantity", m))?;

        let product = tx
            .product(new_item.product_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Product {}", new_item.product_id)))?;
        if let Some(warehouse_id) = new_item.warehouse_id {
            tx.warehouse(warehouse_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Warehouse {warehouse_id}")))?;
        }

        let sequence = tx.next_barcode_sequence(product.id).await?;
        let barcode = match new_item.barcode.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
            Some(label) => {
                validate_barcode(label).map_err(|m| AppError::validation("barcode", m))?;
                if tx.item_by_barcode(label).await?.is_some() {
                    return Err(AppError::validation(
                        "barcode",
                        format!("Barcode {label} is already in use"),
                    ));
                }
                label.to_string()
            }
            None => generate_barcode(
                &product.code,
                new_item.quantity,
                new_item.lot_number.as_deref(),
                sequence,
            ),
        };

        let now = Utc::now();
        let item = Item {
            id: Uuid::new_v4(),
            product_id: product.id,
            warehouse_id: new_item.warehouse_id,
            state: new_item.state,
            original_quantity: new_item.quantity,
            current_quantity: new_item.quantity,
            unit: new_item.unit,
            lot_number: new_item.lot_number,
            container_number: new_item.container_number,
            item_number: new_item.item_number,
            barcode,
            barcode_sequence: sequence,
            parent_item_id: new_item.parent_item_id,
            transformed_from_item_id: new_item.transformed_from_item_id,
            is_partition: new_item.is_partition,
            is_invoiced: false,
            invoiced_date: None,
            cost: new_item.cost,
            origin_order_id: new_item.origin_order_id,
            created_at: now,
            updated_at: now,
        };
        tx.insert_item(&item).await?;

        let movement_type = ctx.quantity_movement.unwrap_or_else(|| {
            MovementType::for_state_change(ctx.order_type, false, item.state)
        });
        let mut entry = ctx.entry(&item, movement_type);
        entry.quantity = item.current_quantity;
        entry.balance_before = Decimal::ZERO;
        entry.destination_warehouse_id = item.warehouse_id;
        self.ledger.append(tx, entry).await?;

        debug!(item_id = %item.id, barcode = %item.barcode, quantity = %item.current_quantity, "Minted item");
        Ok(item)
    }

    /// Find an existing item by id, barcode (real or virtual) or exact quantity
    pub async fn resolve(&self, tx: &mut dyn StoreTx, lookup: &ItemLookup) -> AppResult<Item> {
        let item = if let Some(id) = lookup.id {
            debug!(%id, "Resolving item by id");
            tx.item_by_id(id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Item {id}")))?
        } else if let Some(barcode) = lookup.scanned_barcode() {
            match self.resolve_barcode(tx, barcode).await? {
                Some(item) => item,
                None => match lookup.quantity_match() {
                    Some(query) => {
                        let item = self.resolve_quantity(tx, query).await?;
                        self.mint_virtual_barcode(tx, barcode, &item).await?;
                        item
                    }
                    None => return Err(AppError::NotFound(format!("Item with barcode {barcode}"))),
                },
            }
        } else if let Some(query) = lookup.quantity_match() {
            self.resolve_quantity(tx, query).await?
        } else {
            return Err(AppError::ValidationError(
                "Item must be identified by id, barcode or product and quantity".to_string(),
            ));
        };

        if let Some(expected) = lookup.expected_state {
            if item.state != expected {
                return Err(AppError::InvalidState(format!(
                    "Item {} is {}, expected {}",
                    item.barcode, item.state, expected
                )));
            }
        }
        Ok(item)
    }

    async fn resolve_barcode(&self, tx: &mut dyn StoreTx, barcode: &str) -> AppResult<Option<Item>> {
        if let Some(item) = tx.item_by_barcode(barcode).await? {
            debug!(barcode, "Resolved item by barcode");
            return Ok(Some(item));
        }
        let Some(mapping) = tx.virtual_barcode(barcode).await? else {
            return Ok(None);
        };
        if mapping.used {
            return Ok(None);
        }
        let item = tx.item_by_id(mapping.item_id).await?;
        if item.is_some() {
            tx.mark_virtual_barcode_used(barcode).await?;
            debug!(barcode, item_id = %mapping.item_id, "Resolved item by virtual barcode");
        }
        Ok(item)
    }

    async fn resolve_quantity(&self, tx: &mut dyn StoreTx, query: QuantityMatch) -> AppResult<Item> {
        let item = tx.item_by_quantity(query).await?.ok_or_else(|| {
            AppError::NotFound(format!(
                "{} item of product {} with quantity {}",
                query.state, query.product_id, query.quantity
            ))
        })?;
        debug!(item_id = %item.id, quantity = %query.quantity, "Resolved item by quantity");
        Ok(item)
    }

    async fn mint_virtual_barcode(
        &self,
        tx: &mut dyn StoreTx,
        barcode: &str,
        item: &Item,
    ) -> AppResult<()> {
        if tx.virtual_barcode(barcode).await?.is_some() {
            return Ok(());
        }
        let mapping = VirtualBarcode {
            barcode: barcode.to_string(),
            item_id: item.id,
            used: false,
            created_at: Utc::now(),
        };
        tx.insert_virtual_barcode(&mapping).await?;
        debug!(barcode, item_id = %item.id, "Minted virtual barcode");
        Ok(())
    }

    pub async fn update_item(
        &self,
        tx: &mut dyn StoreTx,
        lookup: &ItemLookup,
        changes: ItemChanges,
        ctx: &MovementContext,
    ) -> AppResult<Item> {
        let item = self.resolve(tx, lookup).await?;
        self.apply_changes(tx, item, changes, ctx).await
    }

    /// Apply `changes` to an already resolved item and record the difference
    pub async fn apply_changes(
        &self,
        tx: &mut dyn StoreTx,
        before: Item,
        changes: ItemChanges,
        ctx: &MovementContext,
    ) -> AppResult<Item> {
        if changes.is_empty() {
            return Ok(before);
        }

        let mut after = before.clone();
        if let Some(quantity) = changes.current_quantity {
            validate_non_negative_balance(quantity)
                .map_err(|m| AppError::validation("current_quantity", m))?;
            after.current_quantity = quantity;
        }
        if let Some(warehouse_id) = changes.warehouse_id {
            if let Some(id) = warehouse_id {
                tx.warehouse(id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("Warehouse {id}")))?;
            }
            after.warehouse_id = warehouse_id;
        }
        if let Some(state) = changes.state {
            after.state = state;
        }
        if let Some(cost) = changes.cost {
            after.cost = Some(cost);
        }
        if let Some(invoiced) = changes.is_invoiced {
            after.is_invoiced = invoiced;
            after.invoiced_date = if invoiced {
                before.invoiced_date.or_else(|| Some(Utc::now()))
            } else {
                None
            };
        }

        if after == before {
            return Ok(before);
        }
        after.updated_at = Utc::now();
        tx.update_item(&after).await?;

        for entry in synthesize_movements(&before, &after, ctx) {
            self.ledger.append(tx, entry).await?;
        }
        Ok(after)
    }

    /// Zero out and remove an item minted by a still-editable order
    pub async fn delete_item(
        &self,
        tx: &mut dyn StoreTx,
        id: Uuid,
        ctx: &MovementContext,
    ) -> AppResult<Item> {
        let item = tx
            .item_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Item {id}")))?;

        let origin = match item.origin_order_id {
            Some(order_id) => tx.order(order_id).await?,
            None => None,
        };
        let origin = origin
            .filter(|o| o.order_type.creates_items() && o.state.is_mutable())
            .ok_or_else(|| {
                AppError::InvalidState(format!(
                    "Item {} was not created by a draft or confirmed purchase, in or transform order",
                    item.barcode
                ))
            })?;
        if item.state != ItemState::Available {
            return Err(AppError::InvalidState(format!(
                "Item {} is {} and cannot be deleted",
                item.barcode, item.state
            )));
        }
        for link in tx.links_for_item(item.id).await? {
            let linked_order = tx
                .order_product(link.order_product_id)
                .await?
                .map(|line| line.order_id);
            if linked_order != Some(origin.id) {
                return Err(AppError::InvalidState(format!(
                    "Item {} is referenced by another order",
                    item.barcode
                )));
            }
        }

        if item.current_quantity != Decimal::ZERO {
            let movement_type = ctx.quantity_movement.unwrap_or(MovementType::Adjustment);
            let mut entry = ctx.entry(&item, movement_type);
            entry.quantity = -item.current_quantity;
            entry.balance_after = Decimal::ZERO;
            entry.source_warehouse_id = item.warehouse_id;
            self.ledger.append(tx, entry).await?;
        }
        tx.delete_item(item.id).await?;

        debug!(item_id = %item.id, barcode = %item.barcode, "Hard-deleted item");
        Ok(item)
    }
}
