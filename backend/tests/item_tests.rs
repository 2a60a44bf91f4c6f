//! Item state machine tests
//!
//! Manual item creation, lookup by id, barcode, virtual barcode and quantity,
//! and the guards around updates and deletion.

mod common;

use common::{dec, Fixture};
use shared::{
    CreateOrderInput, ItemChanges, ItemInput, ItemState, MovementType, NewItem, OrderLineInput,
    OrderType, Product,
};
use stockflow_backend::services::ItemLookup;
use tokio_test::{assert_err, assert_ok};

fn manual_lot(product: &Product, quantity: i64) -> NewItem {
    NewItem {
        product_id: product.id,
        warehouse_id: None,
        state: ItemState::Available,
        quantity: dec(quantity),
        unit: product.unit.clone(),
        lot_number: None,
        container_number: None,
        item_number: None,
        barcode: None,
        parent_item_id: None,
        transformed_from_item_id: None,
        is_partition: false,
        cost: None,
        origin_order_id: None,
    }
}

// ============================================================================
// Creation
// ============================================================================

#[cfg(test)]
mod create_tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_create_generates_barcode() {
        let fx = Fixture::new().await;
        let lot = NewItem {
            warehouse_id: Some(fx.main.id),
            ..manual_lot(&fx.product, 25)
        };
        let item = assert_ok!(fx.services.items.create(lot).await);

        assert_eq!(item.barcode, "CAF01-0002500-NL-00001");
        assert_eq!(item.barcode_sequence, 1);
        assert_eq!(item.original_quantity, dec(25));

        let history = assert_ok!(fx.services.movements.history(item.id).await);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].movement_type, MovementType::Adjustment);
        assert_eq!(history[0].balance_before, dec(0));
        assert_eq!(history[0].balance_after, dec(25));
        assert_eq!(history[0].destination_warehouse_id, Some(fx.main.id));
    }

    #[tokio::test]
    async fn test_barcode_sequence_increments_per_product() {
        let fx = Fixture::new().await;
        let first = assert_ok!(fx.services.items.create(manual_lot(&fx.product, 1)).await);
        let second = assert_ok!(fx.services.items.create(manual_lot(&fx.product, 1)).await);
        let other = assert_ok!(fx.services.items.create(manual_lot(&fx.other_product, 1)).await);

        assert_eq!(first.barcode_sequence, 1);
        assert_eq!(second.barcode_sequence, 2);
        assert_eq!(other.barcode_sequence, 1);
        assert_ne!(first.barcode, second.barcode);
    }

    #[tokio::test]
    async fn test_duplicate_barcode_rejected() {
        let fx = Fixture::new().await;
        let lot = NewItem {
            barcode: Some("LABEL-7".to_string()),
            ..manual_lot(&fx.product, 5)
        };
        assert_ok!(fx.services.items.create(lot.clone()).await);

        let err = assert_err!(fx.services.items.create(lot).await);
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert_eq!(fx.store.snapshot().await.items.len(), 1);
    }

    #[tokio::test]
    async fn test_non_positive_quantity_rejected() {
        let fx = Fixture::new().await;
        let err = assert_err!(fx.services.items.create(manual_lot(&fx.product, 0)).await);
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}

// ============================================================================
// Lookup
// ============================================================================

#[cfg(test)]
mod lookup_tests {
    use super::*;

    #[tokio::test]
    async fn test_virtual_barcode_flow() {
        let fx = Fixture::new().await;
        let (_, item) = fx.receive(&fx.product, 100).await;

        // Unknown label plus a quantity match mints an unused mapping
        let scanned = ItemLookup {
            barcode: Some("SUPPLIER-LABEL-9".to_string()),
            product_id: Some(fx.product.id),
            quantity: Some(dec(100)),
            ..Default::default()
        };
        let changes = ItemChanges {
            cost: Some(dec(7)),
            ..Default::default()
        };
        let updated = assert_ok!(fx.services.items.update(scanned, changes).await);
        assert_eq!(updated.id, item.id);
        let mappings = fx.store.snapshot().await.virtual_barcodes;
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].item_id, item.id);
        assert!(!mappings[0].used);

        // The label alone now resolves once
        let label_only = ItemLookup {
            barcode: Some("SUPPLIER-LABEL-9".to_string()),
            ..Default::default()
        };
        let changes = ItemChanges {
            cost: Some(dec(8)),
            ..Default::default()
        };
        let resolved = assert_ok!(fx.services.items.update(label_only.clone(), changes).await);
        assert_eq!(resolved.id, item.id);
        assert!(fx.store.snapshot().await.virtual_barcodes[0].used);

        let err = assert_err!(
            fx.services
                .items
                .update(label_only, ItemChanges::default())
                .await
        );
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_sale_scan_mints_virtual_barcode() {
        let fx = Fixture::new().await;
        let (_, item) = fx.receive(&fx.product, 36).await;

        let mut input = CreateOrderInput::new(OrderType::Sale);
        input.customer_id = Some(fx.customer.id);
        input.lines = vec![OrderLineInput::new(
            fx.product.id,
            vec![ItemInput {
                quantity: Some(dec(36)),
                ..ItemInput::by_barcode("BAG-0001")
            }],
        )];
        assert_ok!(fx.services.orders.create(input).await);

        assert_eq!(fx.item(item.id).await.unwrap().state, ItemState::Reserved);
        let mappings = fx.store.snapshot().await.virtual_barcodes;
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].barcode, "BAG-0001");
    }

    #[tokio::test]
    async fn test_real_barcode_wins_over_quantity() {
        let fx = Fixture::new().await;
        let (_, small) = fx.receive(&fx.product, 10).await;
        fx.receive(&fx.product, 20).await;

        let lookup = ItemLookup {
            barcode: Some(small.barcode.clone()),
            product_id: Some(fx.product.id),
            quantity: Some(dec(20)),
            ..Default::default()
        };
        let resolved = assert_ok!(fx.services.items.update(lookup, ItemChanges::default()).await);
        assert_eq!(resolved.id, small.id);
        assert!(fx.store.snapshot().await.virtual_barcodes.is_empty());
    }

    #[tokio::test]
    async fn test_empty_lookup_rejected() {
        let fx = Fixture::new().await;
        let err = assert_err!(
            fx.services
                .items
                .update(ItemLookup::default(), ItemChanges::default())
                .await
        );
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_expected_state_enforced() {
        let fx = Fixture::new().await;
        let (_, item) = fx.receive(&fx.product, 10).await;

        let lookup = ItemLookup::by_id(item.id).expecting(ItemState::Sold);
        let err = assert_err!(fx.services.items.update(lookup, ItemChanges::default()).await);
        assert_eq!(err.code(), "STATE_ERROR");
    }
}

// ============================================================================
// Updates and deletion
// ============================================================================

#[cfg(test)]
mod update_tests {
    use super::*;

    #[tokio::test]
    async fn test_negative_quantity_rejected() {
        let fx = Fixture::new().await;
        let (_, item) = fx.receive(&fx.product, 10).await;

        let changes = ItemChanges {
            current_quantity: Some(dec(-1)),
            ..Default::default()
        };
        let err = assert_err!(fx.services.items.update(ItemLookup::by_id(item.id), changes).await);
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert_eq!(fx.item(item.id).await.unwrap().current_quantity, dec(10));
    }

    #[tokio::test]
    async fn test_state_and_warehouse_change_writes_chained_entries() {
        let fx = Fixture::new().await;
        let (_, item) = fx.receive(&fx.product, 10).await;

        let changes = ItemChanges {
            current_quantity: Some(dec(8)),
            ..ItemChanges::state(ItemState::Dropped).with_warehouse(Some(fx.annex.id))
        };
        assert_ok!(fx.services.items.update(ItemLookup::by_id(item.id), changes).await);

        let types: Vec<_> = fx
            .movements(item.id)
            .await
            .iter()
            .map(|m| m.movement_type)
            .collect();
        assert_eq!(
            types,
            vec![
                MovementType::In,
                MovementType::Adjustment,
                MovementType::Transfer,
                MovementType::Adjustment,
            ]
        );
        fx.assert_ledger_consistent().await;
    }

    #[tokio::test]
    async fn test_unchanged_update_writes_nothing() {
        let fx = Fixture::new().await;
        let (_, item) = fx.receive(&fx.product, 10).await;

        let changes = ItemChanges {
            current_quantity: Some(dec(10)),
            ..Default::default()
        };
        assert_ok!(fx.services.items.update(ItemLookup::by_id(item.id), changes).await);
        assert_eq!(fx.movements(item.id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_manual_item_cannot_be_deleted() {
        let fx = Fixture::new().await;
        let item = assert_ok!(fx.services.items.create(manual_lot(&fx.product, 3)).await);

        let err = assert_err!(fx.services.items.delete(item.id).await);
        assert_eq!(err.code(), "STATE_ERROR");
        assert!(fx.item(item.id).await.is_some());
    }

    #[tokio::test]
    async fn test_received_item_deleted_with_zeroing_entry() {
        let fx = Fixture::new().await;
        let (_, item) = fx.receive(&fx.product, 10).await;

        let deleted = assert_ok!(fx.services.items.delete(item.id).await);
        assert_eq!(deleted.id, item.id);
        assert!(fx.item(item.id).await.is_none());

        let history = fx.movements(item.id).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].quantity, dec(-10));
        assert_eq!(history[1].balance_after, dec(0));
    }

    #[tokio::test]
    async fn test_item_linked_elsewhere_cannot_be_deleted() {
        let fx = Fixture::new().await;
        let (_, item) = fx.receive(&fx.product, 10).await;
        let sale = fx.sale(&[&item]).await;
        assert_ok!(fx.services.orders.delete(sale.id).await);
        assert_eq!(fx.item(item.id).await.unwrap().state, ItemState::Available);

        // Transfer links the item to a second order
        let mut input = CreateOrderInput::new(OrderType::Transfer);
        input.source_warehouse_id = Some(fx.main.id);
        input.destination_warehouse_id = Some(fx.annex.id);
        input.lines = vec![OrderLineInput::new(fx.product.id, vec![ItemInput::by_id(item.id)])];
        assert_ok!(fx.services.orders.create(input).await);

        let err = assert_err!(fx.services.items.delete(item.id).await);
        assert_eq!(err.code(), "STATE_ERROR");
    }
}
