//! Shared fixture for engine integration tests

#![allow(dead_code)]

use std::sync::Arc;

use rust_decimal::Decimal;
use uuid::Uuid;

use shared::{
    CreateOrderInput, Customer, InventoryMovement, Item, ItemInput, Order, OrderLineInput,
    OrderPatch, OrderProduct, OrderState, OrderType, Product, Supplier, UpdateOrderInput,
    Warehouse,
};
use stockflow_backend::config::EngineConfig;
use stockflow_backend::services::{BroadcastEventSink, EngineServices};
use stockflow_backend::store::MemoryStore;

pub fn dec(value: i64) -> Decimal {
    Decimal::from(value)
}

pub fn catalog_product(code: &str, units_per_package: Option<i64>) -> Product {
    Product {
        id: Uuid::new_v4(),
        code: code.to_string(),
        name: format!("Product {code}"),
        unit: "kg".to_string(),
        units_per_package: units_per_package.map(Decimal::from),
    }
}

fn warehouse(code: &str, is_default: bool) -> Warehouse {
    Warehouse {
        id: Uuid::new_v4(),
        code: code.to_string(),
        name: format!("Warehouse {code}"),
        is_default,
    }
}

pub struct Fixture {
    pub store: MemoryStore,
    pub sink: Arc<BroadcastEventSink>,
    pub services: EngineServices,
    pub product: Product,
    pub other_product: Product,
    pub main: Warehouse,
    pub annex: Warehouse,
    pub customer: Customer,
    pub supplier: Supplier,
}

impl Fixture {
    pub async fn new() -> Self {
        let store = MemoryStore::new();
        let product = catalog_product("CAF01", Some(4));
        let other_product = catalog_product("ROAST02", None);
        let main = warehouse("MAIN", true);
        let annex = warehouse("ANNEX", false);
        let customer = Customer {
            id: Uuid::new_v4(),
            name: "Cafe Central".to_string(),
        };
        let supplier = Supplier {
            id: Uuid::new_v4(),
            name: "Finca Alta".to_string(),
        };

        store.seed_product(product.clone()).await;
        store.seed_product(other_product.clone()).await;
        store.seed_warehouse(main.clone()).await;
        store.seed_warehouse(annex.clone()).await;
        store.seed_customer(customer.clone()).await;
        store.seed_supplier(supplier.clone()).await;

        let sink = Arc::new(BroadcastEventSink::new(64));
        let services = EngineServices::new(
            Arc::new(store.clone()),
            sink.clone(),
            EngineConfig::default(),
        );

        Self {
            store,
            sink,
            services,
            product,
            other_product,
            main,
            annex,
            customer,
            supplier,
        }
    }

    pub async fn item(&self, id: Uuid) -> Option<Item> {
        self.store
            .snapshot()
            .await
            .items
            .into_iter()
            .find(|i| i.id == id)
    }

    pub async fn items_of_order(&self, order_id: Uuid) -> Vec<Item> {
        self.store
            .snapshot()
            .await
            .items
            .into_iter()
            .filter(|i| i.origin_order_id == Some(order_id))
            .collect()
    }

    pub async fn movements(&self, item_id: Uuid) -> Vec<InventoryMovement> {
        self.store
            .snapshot()
            .await
            .movements
            .into_iter()
            .filter(|m| m.item_id == item_id)
            .collect()
    }

    pub async fn lines(&self, order_id: Uuid) -> Vec<OrderProduct> {
        self.services.orders.lines(order_id).await.unwrap()
    }

    /// Every item's quantity equals the balance of its latest ledger entry
    pub async fn assert_ledger_consistent(&self) {
        let mismatches = self.services.movements.reconcile().await.unwrap();
        assert!(mismatches.is_empty(), "ledger mismatches: {mismatches:?}");

        let state = self.store.snapshot().await;
        for m in &state.movements {
            assert!(m.is_balanced(), "unbalanced entry {m:?}");
        }
    }

    /// Receive one lot of `quantity` into the main warehouse
    pub async fn receive(&self, product: &Product, quantity: i64) -> (Order, Item) {
        let mut input = CreateOrderInput::new(OrderType::Purchase);
        input.destination_warehouse_id = Some(self.main.id);
        input.supplier_id = Some(self.supplier.id);
        input.lines = vec![OrderLineInput::new(
            product.id,
            vec![ItemInput::new_lot(dec(quantity))],
        )];
        let order = self.services.orders.create(input).await.unwrap();
        let item = self.items_of_order(order.id).await.remove(0);
        (order, item)
    }

    pub async fn set_state(&self, order_id: Uuid, state: OrderState) -> Order {
        self.services
            .orders
            .update(
                order_id,
                UpdateOrderInput {
                    lines: None,
                    patch: OrderPatch::state(state),
                },
            )
            .await
            .unwrap()
    }

    /// Draft sale of the given items to the fixture customer
    pub async fn sale(&self, items: &[&Item]) -> Order {
        let mut input = CreateOrderInput::new(OrderType::Sale);
        input.customer_id = Some(self.customer.id);
        input.source_warehouse_id = Some(self.main.id);
        input.lines = vec![OrderLineInput::new(
            items[0].product_id,
            items.iter().map(|i| ItemInput::by_id(i.id)).collect(),
        )];
        self.services.orders.create(input).await.unwrap()
    }

    /// Completed sale of one item
    pub async fn dispatch(&self, item: &Item) -> Order {
        let order = self.sale(&[item]).await;
        self.set_state(order.id, OrderState::Completed).await
    }
}
