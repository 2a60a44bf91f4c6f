//! Order lifecycle tests
//!
//! Covers order creation, update diffing and deletion across order types,
//! including the purchase round trip, sale reserve/complete/reverse, update
//! idempotence and the immutable-state guard.

mod common;

use common::{dec, Fixture};
use shared::{
    AddItemInput, CreateOrderInput, ItemInput, ItemState, MovementType, OrderLineInput,
    OrderPatch, OrderState, OrderType, UpdateOrderInput,
};
use tokio_test::{assert_err, assert_ok};

// ============================================================================
// Purchase / In
// ============================================================================

#[cfg(test)]
mod purchase_tests {
    use super::*;

    #[tokio::test]
    async fn test_purchase_round_trip() {
        let fx = Fixture::new().await;
        let (order, item) = fx.receive(&fx.product, 100).await;

        assert_eq!(order.state, OrderState::Draft);
        assert!(order.code.starts_with("PO-"));
        assert_eq!(item.state, ItemState::Available);
        assert_eq!(item.current_quantity, dec(100));
        assert_eq!(item.original_quantity, dec(100));
        assert_eq!(item.warehouse_id, Some(fx.main.id));

        let movements = fx.movements(item.id).await;
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].movement_type, MovementType::In);
        assert_eq!(movements[0].balance_before, dec(0));
        assert_eq!(movements[0].balance_after, dec(100));
        assert_eq!(movements[0].order_id, Some(order.id));

        let lines = fx.lines(order.id).await;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].requested_quantity, dec(100));
        assert_eq!(lines[0].confirmed_quantity, dec(100));
        assert_eq!(lines[0].delivered_quantity, dec(0));
        assert_eq!(lines[0].requested_packages, dec(25));
        assert_eq!(lines[0].confirmed_packages, dec(25));

        fx.assert_ledger_consistent().await;
    }

    #[tokio::test]
    async fn test_purchase_uses_default_warehouse() {
        let fx = Fixture::new().await;
        let mut input = CreateOrderInput::new(OrderType::In);
        input.lines = vec![OrderLineInput::new(
            fx.product.id,
            vec![ItemInput::new_lot(dec(12))],
        )];
        let order = assert_ok!(fx.services.orders.create(input).await);

        assert_eq!(order.destination_warehouse_id, Some(fx.main.id));
        let items = fx.items_of_order(order.id).await;
        assert_eq!(items[0].warehouse_id, Some(fx.main.id));
    }

    #[tokio::test]
    async fn test_order_codes_are_sequential() {
        let fx = Fixture::new().await;
        let (first, _) = fx.receive(&fx.product, 10).await;
        let (second, _) = fx.receive(&fx.product, 10).await;

        assert!(first.code.ends_with("-1"), "{}", first.code);
        assert!(second.code.ends_with("-2"), "{}", second.code);
        assert_eq!(
            first.code.trim_end_matches("-1"),
            second.code.trim_end_matches("-2")
        );
    }

    #[tokio::test]
    async fn test_add_and_remove_received_item() {
        let fx = Fixture::new().await;
        let (order, _) = fx.receive(&fx.product, 100).await;

        assert_ok!(
            fx.services
                .orders
                .add_item(
                    order.id,
                    AddItemInput {
                        product_id: fx.product.id,
                        item: ItemInput::new_lot(dec(30)),
                        unit_price: None,
                    },
                )
                .await
        );
        let items = fx.items_of_order(order.id).await;
        assert_eq!(items.len(), 2);
        assert_eq!(fx.lines(order.id).await[0].confirmed_quantity, dec(130));

        let added = items
            .iter()
            .find(|i| i.current_quantity == dec(30))
            .unwrap()
            .clone();
        assert_ok!(fx.services.orders.remove_item(order.id, added.id).await);

        assert!(fx.item(added.id).await.is_none());
        assert_eq!(fx.lines(order.id).await[0].confirmed_quantity, dec(100));

        // The ledger keeps the history of the removed lot
        let history = fx.movements(added.id).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].balance_after, dec(0));
        fx.assert_ledger_consistent().await;
    }

    #[tokio::test]
    async fn test_purchase_delete_blocked_once_stock_is_sold() {
        let fx = Fixture::new().await;
        let (purchase, item) = fx.receive(&fx.product, 100).await;
        fx.dispatch(&item).await;

        let err = assert_err!(fx.services.orders.delete(purchase.id).await);
        assert_eq!(err.code(), "STATE_ERROR");

        assert_ok!(fx.services.orders.get(purchase.id).await);
        assert_eq!(fx.item(item.id).await.unwrap().state, ItemState::Sold);
    }
}

// ============================================================================
// Sale
// ============================================================================

#[cfg(test)]
mod sale_tests {
    use super::*;

    #[tokio::test]
    async fn test_sale_reserve_complete() {
        let fx = Fixture::new().await;
        let (_, item) = fx.receive(&fx.product, 100).await;

        let sale = fx.sale(&[&item]).await;
        let reserved = fx.item(item.id).await.unwrap();
        assert_eq!(reserved.state, ItemState::Reserved);
        assert_eq!(reserved.current_quantity, dec(100));

        let completed = fx.set_state(sale.id, OrderState::Completed).await;
        assert!(completed.dispatched_at.is_some());
        let sold = fx.item(item.id).await.unwrap();
        assert_eq!(sold.state, ItemState::Sold);

        let types: Vec<_> = fx
            .movements(item.id)
            .await
            .iter()
            .map(|m| m.movement_type)
            .collect();
        assert_eq!(
            types,
            vec![MovementType::In, MovementType::Reserve, MovementType::Out]
        );

        let lines = fx.lines(sale.id).await;
        assert_eq!(lines[0].confirmed_quantity, dec(100));
        assert_eq!(lines[0].delivered_quantity, dec(100));
        fx.assert_ledger_consistent().await;
    }

    #[tokio::test]
    async fn test_sale_delete_releases_items() {
        let fx = Fixture::new().await;
        let (_, item) = fx.receive(&fx.product, 100).await;
        let sale = fx.sale(&[&item]).await;

        let deleted = assert_ok!(fx.services.orders.delete(sale.id).await);
        assert_eq!(deleted.id, sale.id);

        let released = fx.item(item.id).await.unwrap();
        assert_eq!(released.state, ItemState::Available);
        let last = fx.movements(item.id).await.pop().unwrap();
        assert_eq!(last.movement_type, MovementType::Unreserve);
        assert_eq!(last.balance_after, dec(100));

        let err = assert_err!(fx.services.orders.get(sale.id).await);
        assert_eq!(err.code(), "NOT_FOUND");
        fx.assert_ledger_consistent().await;
    }

    #[tokio::test]
    async fn test_sale_by_quantity_match() {
        let fx = Fixture::new().await;
        let (_, item) = fx.receive(&fx.product, 42).await;

        let mut input = CreateOrderInput::new(OrderType::Sale);
        input.customer_id = Some(fx.customer.id);
        input.lines = vec![OrderLineInput::new(
            fx.product.id,
            vec![ItemInput::new_lot(dec(42))],
        )];
        assert_ok!(fx.services.orders.create(input).await);

        assert_eq!(fx.item(item.id).await.unwrap().state, ItemState::Reserved);
    }

    #[tokio::test]
    async fn test_item_cannot_be_reserved_twice() {
        let fx = Fixture::new().await;
        let (_, item) = fx.receive(&fx.product, 10).await;
        fx.sale(&[&item]).await;

        let mut input = CreateOrderInput::new(OrderType::Sale);
        input.lines = vec![OrderLineInput::new(
            fx.product.id,
            vec![ItemInput::by_id(item.id)],
        )];
        let err = assert_err!(fx.services.orders.create(input).await);
        assert_eq!(err.code(), "STATE_ERROR");
    }

    #[tokio::test]
    async fn test_update_idempotence() {
        let fx = Fixture::new().await;
        let (_, a) = fx.receive(&fx.product, 60).await;
        let (_, b) = fx.receive(&fx.product, 40).await;
        let sale = fx.sale(&[&a, &b]).await;

        let before = fx.store.snapshot().await;
        let lines = vec![OrderLineInput::new(
            fx.product.id,
            vec![ItemInput::by_id(a.id), ItemInput::by_id(b.id)],
        )];
        assert_ok!(
            fx.services
                .orders
                .update(
                    sale.id,
                    UpdateOrderInput {
                        lines: Some(lines),
                        patch: OrderPatch::default(),
                    },
                )
                .await
        );
        let after = fx.store.snapshot().await;

        assert_eq!(after.movements.len(), before.movements.len());
        assert_eq!(after.links, before.links);
        for item in &before.items {
            let now = after.items.iter().find(|i| i.id == item.id).unwrap();
            assert_eq!(now.state, item.state);
            assert_eq!(now.current_quantity, item.current_quantity);
        }
        assert_eq!(after.order_products.len(), before.order_products.len());
    }

    #[tokio::test]
    async fn test_resubmitting_scanned_labels_is_noop() {
        let fx = Fixture::new().await;
        let (_, item) = fx.receive(&fx.product, 36).await;
        fx.receive(&fx.product, 36).await;

        let lines = vec![OrderLineInput::new(
            fx.product.id,
            vec![ItemInput {
                quantity: Some(dec(36)),
                ..ItemInput::by_barcode("BAG-0001")
            }],
        )];
        let mut input = CreateOrderInput::new(OrderType::Sale);
        input.customer_id = Some(fx.customer.id);
        input.lines = lines.clone();
        let sale = assert_ok!(fx.services.orders.create(input).await);
        assert_eq!(fx.item(item.id).await.unwrap().state, ItemState::Reserved);

        let before = fx.store.snapshot().await;
        for _ in 0..2 {
            assert_ok!(
                fx.services
                    .orders
                    .update(
                        sale.id,
                        UpdateOrderInput {
                            lines: Some(lines.clone()),
                            patch: OrderPatch::default(),
                        },
                    )
                    .await
            );
        }
        let after = fx.store.snapshot().await;

        assert_eq!(after.movements.len(), before.movements.len());
        assert_eq!(after.links, before.links);
        assert_eq!(after.virtual_barcodes, before.virtual_barcodes);
        assert!(!after.virtual_barcodes[0].used);
    }

    #[tokio::test]
    async fn test_update_swaps_items() {
        let fx = Fixture::new().await;
        let (_, a) = fx.receive(&fx.product, 60).await;
        let (_, b) = fx.receive(&fx.product, 40).await;
        let sale = fx.sale(&[&a]).await;

        let lines = vec![OrderLineInput::new(
            fx.product.id,
            vec![ItemInput::by_barcode(b.barcode.clone())],
        )];
        assert_ok!(
            fx.services
                .orders
                .update(
                    sale.id,
                    UpdateOrderInput {
                        lines: Some(lines),
                        patch: OrderPatch::default(),
                    },
                )
                .await
        );

        assert_eq!(fx.item(a.id).await.unwrap().state, ItemState::Available);
        assert_eq!(fx.item(b.id).await.unwrap().state, ItemState::Reserved);
        assert_eq!(fx.lines(sale.id).await[0].confirmed_quantity, dec(40));
        fx.assert_ledger_consistent().await;
    }

    #[tokio::test]
    async fn test_items_added_while_completing_are_sold() {
        let fx = Fixture::new().await;
        let (_, a) = fx.receive(&fx.product, 60).await;
        let (_, b) = fx.receive(&fx.product, 40).await;
        let sale = fx.sale(&[&a]).await;

        let lines = vec![OrderLineInput::new(
            fx.product.id,
            vec![ItemInput::by_id(a.id), ItemInput::by_id(b.id)],
        )];
        assert_ok!(
            fx.services
                .orders
                .update(
                    sale.id,
                    UpdateOrderInput {
                        lines: Some(lines),
                        patch: OrderPatch::state(OrderState::Completed),
                    },
                )
                .await
        );

        assert_eq!(fx.item(a.id).await.unwrap().state, ItemState::Sold);
        assert_eq!(fx.item(b.id).await.unwrap().state, ItemState::Sold);
    }

    #[tokio::test]
    async fn test_cancel_releases_items() {
        let fx = Fixture::new().await;
        let (_, item) = fx.receive(&fx.product, 10).await;
        let sale = fx.sale(&[&item]).await;

        fx.set_state(sale.id, OrderState::Cancelled).await;

        assert_eq!(fx.item(item.id).await.unwrap().state, ItemState::Available);
        assert_eq!(fx.lines(sale.id).await[0].confirmed_quantity, dec(0));
    }

    #[tokio::test]
    async fn test_add_item_rejects_item_already_on_order() {
        let fx = Fixture::new().await;
        let (_, item) = fx.receive(&fx.product, 10).await;
        let sale = fx.sale(&[&item]).await;

        let err = assert_err!(
            fx.services
                .orders
                .add_item(
                    sale.id,
                    AddItemInput {
                        product_id: fx.product.id,
                        item: ItemInput::by_id(item.id),
                        unit_price: None,
                    },
                )
                .await
        );
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_remove_unknown_item() {
        let fx = Fixture::new().await;
        let (_, item) = fx.receive(&fx.product, 10).await;
        let (_, other) = fx.receive(&fx.product, 20).await;
        let sale = fx.sale(&[&item]).await;

        let err = assert_err!(fx.services.orders.remove_item(sale.id, other.id).await);
        assert_eq!(err.code(), "NOT_FOUND");
    }
}

// ============================================================================
// Immutable-state guard
// ============================================================================

#[cfg(test)]
mod guard_tests {
    use super::*;

    #[tokio::test]
    async fn test_immutable_state_guard() {
        for state in [
            OrderState::Processing,
            OrderState::Completed,
            OrderState::Cancelled,
        ] {
            let fx = Fixture::new().await;
            let (_, item) = fx.receive(&fx.product, 10).await;
            let (_, spare) = fx.receive(&fx.product, 5).await;
            let sale = fx.sale(&[&item]).await;
            fx.set_state(sale.id, state).await;
            let before = fx.store.snapshot().await;

            let update = fx
                .services
                .orders
                .update(sale.id, UpdateOrderInput::default())
                .await;
            assert_eq!(assert_err!(update).code(), "STATE_ERROR");

            let add = fx
                .services
                .orders
                .add_item(
                    sale.id,
                    AddItemInput {
                        product_id: fx.product.id,
                        item: ItemInput::by_id(spare.id),
                        unit_price: None,
                    },
                )
                .await;
            assert_eq!(assert_err!(add).code(), "STATE_ERROR");

            let remove = fx.services.orders.remove_item(sale.id, item.id).await;
            assert_eq!(assert_err!(remove).code(), "STATE_ERROR");

            let delete = fx.services.orders.delete(sale.id).await;
            assert_eq!(assert_err!(delete).code(), "STATE_ERROR");

            let after = fx.store.snapshot().await;
            assert_eq!(after.movements.len(), before.movements.len());
            assert_eq!(after.items, before.items);
            assert_eq!(after.orders, before.orders);
        }
    }
}

// ============================================================================
// Header validation
// ============================================================================

#[cfg(test)]
mod validation_tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_transfer_needs_distinct_warehouses() {
        let fx = Fixture::new().await;
        let mut input = CreateOrderInput::new(OrderType::Transfer);
        input.source_warehouse_id = Some(fx.main.id);
        input.destination_warehouse_id = Some(fx.main.id);

        let err = assert_err!(fx.services.orders.create(input).await);
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_partial_invoice_needs_customer() {
        let fx = Fixture::new().await;
        let input = CreateOrderInput::new(OrderType::PartialInvoice);

        let err = assert_err!(fx.services.orders.create(input).await);
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_unknown_references() {
        let fx = Fixture::new().await;
        let mut input = CreateOrderInput::new(OrderType::Sale);
        input.customer_id = Some(Uuid::new_v4());
        let err = assert_err!(fx.services.orders.create(input).await);
        assert_eq!(err.code(), "NOT_FOUND");

        let mut input = CreateOrderInput::new(OrderType::Purchase);
        input.lines = vec![OrderLineInput::new(
            Uuid::new_v4(),
            vec![ItemInput::new_lot(dec(1))],
        )];
        let err = assert_err!(fx.services.orders.create(input).await);
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_sale_items_must_be_identified() {
        let fx = Fixture::new().await;
        let mut input = CreateOrderInput::new(OrderType::Sale);
        input.lines = vec![OrderLineInput::new(fx.product.id, vec![ItemInput::default()])];

        let err = assert_err!(fx.services.orders.create(input).await);
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(fx.store.snapshot().await.orders.is_empty());
    }
}
