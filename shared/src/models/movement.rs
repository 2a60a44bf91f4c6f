//! Inventory ledger entries

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ItemState, OrderType};
use crate::types::{TimeRange, UnknownVariant};

/// Kind of balance-changing event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    In,
    Out,
    Transfer,
    Adjustment,
    Reserve,
    Unreserve,
    Transform,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::In => "in",
            MovementType::Out => "out",
            MovementType::Transfer => "transfer",
            MovementType::Adjustment => "adjustment",
            MovementType::Reserve => "reserve",
            MovementType::Unreserve => "unreserve",
            MovementType::Transform => "transform",
        }
    }

    /// Entry type recorded for a custody-state change.
    ///
    /// `order_type` is `None` for changes made outside any order.
    pub fn for_state_change(
        order_type: Option<OrderType>,
        reverse: bool,
        to_state: ItemState,
    ) -> MovementType {
        match order_type {
            Some(OrderType::Sale) => match (reverse, to_state) {
                (true, _) | (false, ItemState::Available) => MovementType::Unreserve,
                (false, ItemState::Sold) | (false, ItemState::Dropped) => MovementType::Out,
                (false, ItemState::Reserved) => MovementType::Reserve,
            },
            Some(OrderType::Return) | Some(OrderType::Purchase) | Some(OrderType::In) => {
                if reverse {
                    MovementType::Out
                } else {
                    MovementType::In
                }
            }
            Some(OrderType::Out) => {
                if reverse {
                    MovementType::In
                } else {
                    MovementType::Out
                }
            }
            Some(OrderType::Transfer) => MovementType::Transfer,
            Some(OrderType::Transform) => MovementType::Transform,
            Some(OrderType::Adjustment) | Some(OrderType::PartialInvoice) | None => {
                MovementType::Adjustment
            }
        }
    }
}

impl FromStr for MovementType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in" => Ok(MovementType::In),
            "out" => Ok(MovementType::Out),
            "transfer" => Ok(MovementType::Transfer),
            "adjustment" => Ok(MovementType::Adjustment),
            "reserve" => Ok(MovementType::Reserve),
            "unreserve" => Ok(MovementType::Unreserve),
            "transform" => Ok(MovementType::Transform),
            other => Err(UnknownVariant::new("movement type", other)),
        }
    }
}

impl std::fmt::Display for MovementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable ledger entry.
///
/// `balance_after == balance_before + quantity` always holds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InventoryMovement {
    pub id: Uuid,
    pub item_id: Uuid,
    pub product_id: Uuid,
    pub movement_type: MovementType,
    /// Signed change to the item's quantity
    pub quantity: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub order_id: Option<Uuid>,
    pub order_product_id: Option<Uuid>,
    pub source_warehouse_id: Option<Uuid>,
    pub destination_warehouse_id: Option<Uuid>,
    /// Counterpart item of a transform pair
    pub related_item_id: Option<Uuid>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl InventoryMovement {
    pub fn is_balanced(&self) -> bool {
        self.balance_before + self.quantity == self.balance_after
    }
}

/// Entry to append; id and timestamp are assigned by the ledger
#[derive(Debug, Clone)]
pub struct NewMovement {
    pub item_id: Uuid,
    pub product_id: Uuid,
    pub movement_type: MovementType,
    pub quantity: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub order_id: Option<Uuid>,
    pub order_product_id: Option<Uuid>,
    pub source_warehouse_id: Option<Uuid>,
    pub destination_warehouse_id: Option<Uuid>,
    pub related_item_id: Option<Uuid>,
    pub reason: Option<String>,
}

/// Manual ledger entry against an item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMovementInput {
    pub item_id: Uuid,
    pub movement_type: MovementType,
    /// Signed change applied to the item
    pub quantity: Decimal,
    pub reason: Option<String>,
}

/// Filters for ledger listings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MovementFilter {
    pub item_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
    pub movement_type: Option<MovementType>,
    /// Matches either side of the movement
    pub warehouse_id: Option<Uuid>,
    pub period: Option<TimeRange>,
}

impl MovementFilter {
    pub fn matches(&self, m: &InventoryMovement) -> bool {
        self.item_id.map_or(true, |id| m.item_id == id)
            && self.product_id.map_or(true, |id| m.product_id == id)
            && self.order_id.map_or(true, |id| m.order_id == Some(id))
            && self.movement_type.map_or(true, |t| m.movement_type == t)
            && self.warehouse_id.map_or(true, |w| {
                m.source_warehouse_id == Some(w) || m.destination_warehouse_id == Some(w)
            })
            && self
                .period
                .as_ref()
                .map_or(true, |p| p.contains(m.created_at))
    }
}

/// An item whose quantity disagrees with its ledger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerMismatch {
    pub item_id: Uuid,
    pub current_quantity: Decimal,
    /// `None` when the item has no entries at all
    pub ledger_balance: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sale_state_changes() {
        let sale = Some(OrderType::Sale);
        assert_eq!(
            MovementType::for_state_change(sale, false, ItemState::Reserved),
            MovementType::Reserve
        );
        assert_eq!(
            MovementType::for_state_change(sale, false, ItemState::Sold),
            MovementType::Out
        );
        assert_eq!(
            MovementType::for_state_change(sale, false, ItemState::Available),
            MovementType::Unreserve
        );
        assert_eq!(
            MovementType::for_state_change(sale, true, ItemState::Available),
            MovementType::Unreserve
        );
    }

    #[test]
    fn test_return_and_out_are_mirrored() {
        assert_eq!(
            MovementType::for_state_change(Some(OrderType::Return), false, ItemState::Available),
            MovementType::In
        );
        assert_eq!(
            MovementType::for_state_change(Some(OrderType::Return), true, ItemState::Sold),
            MovementType::Out
        );
        assert_eq!(
            MovementType::for_state_change(Some(OrderType::Out), false, ItemState::Dropped),
            MovementType::Out
        );
        assert_eq!(
            MovementType::for_state_change(Some(OrderType::Out), true, ItemState::Available),
            MovementType::In
        );
    }

    #[test]
    fn test_state_change_without_order_is_adjustment() {
        assert_eq!(
            MovementType::for_state_change(None, false, ItemState::Dropped),
            MovementType::Adjustment
        );
    }

    #[test]
    fn test_movement_type_round_trip() {
        for t in [
            MovementType::In,
            MovementType::Out,
            MovementType::Transfer,
            MovementType::Adjustment,
            MovementType::Reserve,
            MovementType::Unreserve,
            MovementType::Transform,
        ] {
            assert_eq!(t.as_str().parse::<MovementType>().unwrap(), t);
        }
    }
}
