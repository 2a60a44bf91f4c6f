//! Append-only inventory ledger
//!
//! Entries are validated before insert: the balance arithmetic must hold and
//! `balance_before` must continue the item's previous `balance_after` (zero for
//! the first entry). Nothing ever updates or deletes an entry.

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, error};
use uuid::Uuid;

use shared::{InventoryMovement, NewMovement};

use crate::error::{AppError, AppResult};
use crate::store::StoreTx;

#[derive(Debug, Default)]
pub struct Ledger;

impl Ledger {
    pub fn new() -> Self {
        Self
    }

    pub async fn append(
        &self,
        tx: &mut dyn StoreTx,
        entry: NewMovement,
    ) -> AppResult<InventoryMovement> {
        if entry.balance_before + entry.quantity != entry.balance_after {
            error!(
                item_id = %entry.item_id,
                before = %entry.balance_before,
                quantity = %entry.quantity,
                after = %entry.balance_after,
                "Unbalanced ledger entry"
            );
            return Err(AppError::LedgerInvariant(format!(
                "{} + {} != {} for item {}",
                entry.balance_before, entry.quantity, entry.balance_after, entry.item_id
            )));
        }

        let previous = tx
            .latest_movement(entry.item_id)
            .await?
            .map(|m| m.balance_after)
            .unwrap_or(Decimal::ZERO);
        if previous != entry.balance_before {
            error!(
                item_id = %entry.item_id,
                previous = %previous,
                before = %entry.balance_before,
                "Ledger chain broken"
            );
            return Err(AppError::LedgerInvariant(format!(
                "entry for item {} starts at {} but the ledger ends at {}",
                entry.item_id, entry.balance_before, previous
            )));
        }

        let movement = InventoryMovement {
            id: Uuid::new_v4(),
            item_id: entry.item_id,
            product_id: entry.product_id,
            movement_type: entry.movement_type,
            quantity: entry.quantity,
            balance_before: entry.balance_before,
            balance_after: entry.balance_after,
            order_id: entry.order_id,
            order_product_id: entry.order_product_id,
            source_warehouse_id: entry.source_warehouse_id,
            destination_warehouse_id: entry.destination_warehouse_id,
            related_item_id: entry.related_item_id,
            reason: entry.reason,
            created_at: Utc::now(),
        };
        tx.insert_movement(&movement).await?;

        debug!(
            item_id = %movement.item_id,
            movement_type = movement.movement_type.as_str(),
            quantity = %movement.quantity,
            balance_after = %movement.balance_after,
            "Appended ledger entry"
        );
        Ok(movement)
    }

    /// Entries for an item, oldest first
    pub async fn list_for_item(
        &self,
        tx: &mut dyn StoreTx,
        item_id: Uuid,
    ) -> AppResult<Vec<InventoryMovement>> {
        tx.movements_for_item(item_id).await
    }

    /// Most recent entry an order wrote for an item
    pub async fn latest_for_order(
        &self,
        tx: &mut dyn StoreTx,
        item_id: Uuid,
        order_id: Uuid,
    ) -> AppResult<Option<InventoryMovement>> {
        let entries = tx.movements_for_item(item_id).await?;
        Ok(entries
            .into_iter()
            .rev()
            .find(|m| m.order_id == Some(order_id)))
    }
}
