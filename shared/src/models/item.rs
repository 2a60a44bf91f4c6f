//! Traceable inventory lots ("items")

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::UnknownVariant;

/// Custody state of an item
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Available,
    Reserved,
    Sold,
    Dropped,
}

impl ItemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemState::Available => "available",
            ItemState::Reserved => "reserved",
            ItemState::Sold => "sold",
            ItemState::Dropped => "dropped",
        }
    }
}

impl FromStr for ItemState {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(ItemState::Available),
            "reserved" => Ok(ItemState::Reserved),
            "sold" => Ok(ItemState::Sold),
            "dropped" => Ok(ItemState::Dropped),
            other => Err(UnknownVariant::new("item state", other)),
        }
    }
}

impl std::fmt::Display for ItemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A physically trackable lot of a product
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub id: Uuid,
    pub product_id: Uuid,
    /// `None` when the item is not in any warehouse (dropped, invoiced out)
    pub warehouse_id: Option<Uuid>,
    pub state: ItemState,
    /// Fixed at creation
    pub original_quantity: Decimal,
    pub current_quantity: Decimal,
    pub unit: String,
    pub lot_number: Option<String>,
    pub container_number: Option<String>,
    pub item_number: Option<String>,
    pub barcode: String,
    pub barcode_sequence: i64,
    /// Partition lineage (same product)
    pub parent_item_id: Option<Uuid>,
    /// Transform lineage (different product)
    pub transformed_from_item_id: Option<Uuid>,
    pub is_partition: bool,
    pub is_invoiced: bool,
    pub invoiced_date: Option<DateTime<Utc>>,
    pub cost: Option<Decimal>,
    /// Order whose movement created this item
    pub origin_order_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Values needed to mint a new item
#[derive(Debug, Clone)]
pub struct NewItem {
    pub product_id: Uuid,
    pub warehouse_id: Option<Uuid>,
    pub state: ItemState,
    pub quantity: Decimal,
    pub unit: String,
    pub lot_number: Option<String>,
    pub container_number: Option<String>,
    pub item_number: Option<String>,
    /// Pre-printed label; generated when absent
    pub barcode: Option<String>,
    pub parent_item_id: Option<Uuid>,
    pub transformed_from_item_id: Option<Uuid>,
    pub is_partition: bool,
    pub cost: Option<Decimal>,
    pub origin_order_id: Option<Uuid>,
}

/// Requested field changes on an existing item.
///
/// `warehouse_id` distinguishes "leave alone" (`None`) from "clear"
/// (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemChanges {
    pub current_quantity: Option<Decimal>,
    pub warehouse_id: Option<Option<Uuid>>,
    pub state: Option<ItemState>,
    pub cost: Option<Decimal>,
    pub is_invoiced: Option<bool>,
}

impl ItemChanges {
    pub fn state(state: ItemState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    pub fn with_warehouse(mut self, warehouse_id: Option<Uuid>) -> Self {
        self.warehouse_id = Some(warehouse_id);
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &ItemChanges::default()
    }
}

/// Identification and change fields for an item on an order line
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ItemInput {
    pub id: Option<Uuid>,
    pub barcode: Option<String>,
    pub quantity: Option<Decimal>,
    pub warehouse_id: Option<Uuid>,
    pub unit: Option<String>,
    pub lot_number: Option<String>,
    pub container_number: Option<String>,
    pub item_number: Option<String>,
    pub cost: Option<Decimal>,
    /// Item to cut from or transform (transform orders)
    pub source_item_id: Option<Uuid>,
    /// Quantity taken from the source; defaults to `quantity`
    pub consumed_quantity: Option<Decimal>,
}

impl ItemInput {
    pub fn by_id(id: Uuid) -> Self {
        Self {
            id: Some(id),
            ..Default::default()
        }
    }

    pub fn by_barcode(barcode: impl Into<String>) -> Self {
        Self {
            barcode: Some(barcode.into()),
            ..Default::default()
        }
    }

    pub fn new_lot(quantity: Decimal) -> Self {
        Self {
            quantity: Some(quantity),
            ..Default::default()
        }
    }

    /// Stable key used when diffing item lists: id if present, else barcode
    pub fn key(&self) -> Option<ItemKey> {
        match (&self.id, &self.barcode) {
            (Some(id), _) => Some(ItemKey::Id(*id)),
            (None, Some(barcode)) if !barcode.trim().is_empty() => {
                Some(ItemKey::Barcode(barcode.trim().to_string()))
            }
            _ => None,
        }
    }
}

/// Stable identity of an item inside an order update
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemKey {
    Id(Uuid),
    Barcode(String),
}

/// Alternate barcode that resolves to a real item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VirtualBarcode {
    pub barcode: String,
    pub item_id: Uuid,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}

/// Derive an item barcode: `{PRODUCT}-{qty×100}-{LOT}-{SEQ}`
pub fn generate_barcode(
    product_code: &str,
    quantity: Decimal,
    lot_number: Option<&str>,
    sequence: i64,
) -> String {
    let hundredths = (quantity * Decimal::ONE_HUNDRED)
        .trunc()
        .to_i64()
        .unwrap_or_default();
    let lot = lot_number
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .map(|l| {
            l.chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
                .to_uppercase()
        })
        .unwrap_or_else(|| "NL".to_string());
    format!(
        "{}-{:07}-{}-{:05}",
        product_code.trim().to_uppercase(),
        hundredths,
        lot,
        sequence
    )
}
