//! Ledger queries and manual entries

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use shared::{
    CreateMovementInput, InventoryMovement, ItemChanges, LedgerMismatch, MovementFilter,
    PaginatedResponse, Pagination, SortDirection,
};

use super::coordinator::TransactionCoordinator;
use super::item::{ItemLookup, ItemService, MovementContext};
use super::ledger::Ledger;
use crate::error::{AppError, AppResult};
use crate::store::StoreTx;

pub struct MovementService {
    coordinator: Arc<TransactionCoordinator>,
    items: Arc<ItemService>,
    ledger: Arc<Ledger>,
}

impl MovementService {
    pub fn new(
        coordinator: Arc<TransactionCoordinator>,
        items: Arc<ItemService>,
        ledger: Arc<Ledger>,
    ) -> Self {
        Self {
            coordinator,
            items,
            ledger,
        }
    }

    /// Apply a signed quantity change to an item and record it
    pub async fn create(&self, input: CreateMovementInput) -> AppResult<InventoryMovement> {
        let mut tx = self.coordinator.begin().await?;
        let result = self.create_in(tx.as_mut(), input).await;
        let movement = self.coordinator.complete(tx, result).await?;

        info!(
            item_id = %movement.item_id,
            movement_type = movement.movement_type.as_str(),
            quantity = %movement.quantity,
            "Manual ledger entry recorded"
        );
        Ok(movement)
    }

    async fn create_in(
        &self,
        tx: &mut dyn StoreTx,
        input: CreateMovementInput,
    ) -> AppResult<InventoryMovement> {
        if input.quantity.is_zero() {
            return Err(AppError::validation("quantity", "Quantity change cannot be zero"));
        }
        let item = self.items.resolve(tx, &ItemLookup::by_id(input.item_id)).await?;
        let ctx = MovementContext {
            quantity_movement: Some(input.movement_type),
            reason: Some(input.reason.unwrap_or_else(|| "manual entry".to_string())),
            ..Default::default()
        };
        let changes = ItemChanges {
            current_quantity: Some(item.current_quantity + input.quantity),
            ..Default::default()
        };
        self.items.apply_changes(tx, item, changes, &ctx).await?;

        tx.latest_movement(input.item_id)
            .await?
            .ok_or_else(|| AppError::Internal("entry missing after append".to_string()))
    }

    pub async fn find_many(
        &self,
        filter: MovementFilter,
        sort: SortDirection,
        pagination: Pagination,
    ) -> AppResult<PaginatedResponse<InventoryMovement>> {
        let mut tx = self.coordinator.begin().await?;
        let result = tx.find_movements(&filter, sort, pagination).await;
        let (data, total) = self.coordinator.discard(tx, result).await?;
        Ok(PaginatedResponse {
            data,
            pagination: pagination.meta(total),
        })
    }

    /// Ledger of one item, oldest first
    pub async fn history(&self, item_id: Uuid) -> AppResult<Vec<InventoryMovement>> {
        let mut tx = self.coordinator.begin().await?;
        let result = self.ledger.list_for_item(tx.as_mut(), item_id).await;
        self.coordinator.discard(tx, result).await
    }

    /// Items whose quantity disagrees with their latest ledger balance
    pub async fn reconcile(&self) -> AppResult<Vec<LedgerMismatch>> {
        let mut tx = self.coordinator.begin().await?;
        let result = tx.ledger_mismatches().await;
        let mismatches = self.coordinator.discard(tx, result).await?;
        for m in &mismatches {
            warn!(
                item_id = %m.item_id,
                current = %m.current_quantity,
                ledger = ?m.ledger_balance,
                "Item out of step with its ledger"
            );
        }
        if mismatches.is_empty() {
            info!("Ledger reconciled");
        }
        Ok(mismatches)
    }
}
