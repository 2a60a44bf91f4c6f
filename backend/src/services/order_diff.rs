//! Order item diffing
//!
//! Compares the items currently linked to an order with the item list of an
//! update. Inputs are snapshots; nothing here touches storage.

use uuid::Uuid;

use shared::{ItemInput, ItemKey, OrderLineInput};

/// An item currently on the order
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedItem {
    pub item_id: Uuid,
    pub barcode: String,
    /// Scanned labels minted for this item
    pub virtual_barcodes: Vec<String>,
    pub order_product_id: Uuid,
    pub product_id: Uuid,
}

impl LinkedItem {
    pub fn matches(&self, key: &ItemKey) -> bool {
        match key {
            ItemKey::Id(id) => self.item_id == *id,
            ItemKey::Barcode(barcode) => {
                self.barcode == *barcode || self.virtual_barcodes.contains(barcode)
            }
        }
    }
}

/// An item the update wants on the order
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredItem {
    /// Index of the submitted line it belongs to
    pub line_index: usize,
    pub product_id: Uuid,
    pub input: ItemInput,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderDiff {
    pub to_add: Vec<DesiredItem>,
    pub to_keep: Vec<(LinkedItem, DesiredItem)>,
    pub to_remove: Vec<LinkedItem>,
}

impl OrderDiff {
    /// No item enters or leaves the order
    pub fn is_noop(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Flatten submitted lines into their items
pub fn desired_items(lines: &[OrderLineInput]) -> Vec<DesiredItem> {
    lines
        .iter()
        .enumerate()
        .flat_map(|(line_index, line)| {
            line.items.iter().map(move |input| DesiredItem {
                line_index,
                product_id: line.product_id,
                input: input.clone(),
            })
        })
        .collect()
}

/// Split `desired` into adds and keeps against `current`; leftovers are removes.
///
/// Items match on id, else on their barcode or one of their virtual barcodes,
/// and only within the same product. Items without either key are always new.
pub fn diff_order_items(current: &[LinkedItem], desired: Vec<DesiredItem>) -> OrderDiff {
    let mut unmatched: Vec<Option<&LinkedItem>> = current.iter().map(Some).collect();
    let mut diff = OrderDiff::default();

    for item in desired {
        let Some(key) = item.input.key() else {
            diff.to_add.push(item);
            continue;
        };
        let position = unmatched.iter().position(|slot| {
            slot.map_or(false, |linked| {
                linked.product_id == item.product_id && linked.matches(&key)
            })
        });
        match position.and_then(|i| unmatched[i].take()) {
            Some(linked) => diff.to_keep.push((linked.clone(), item)),
            None => diff.to_add.push(item),
        }
    }

    diff.to_remove = unmatched.into_iter().flatten().cloned().collect();
    diff
}
