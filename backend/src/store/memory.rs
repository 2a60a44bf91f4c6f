//! In-process store
//!
//! A transaction holds the single writer lock for its whole lifetime and works
//! on a private copy of the state; `commit` swaps the copy in.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use shared::{
    Customer, InventoryMovement, InvoiceCandidate, Item, ItemLink, ItemState, LedgerMismatch,
    MovementFilter, Order, OrderProduct, OrderState, OrderType, Pagination, Product,
    SortDirection, Supplier, VirtualBarcode, Warehouse,
};

use super::{CandidateScope, QuantityMatch, Store, StoreTx};
use crate::error::AppResult;

/// Everything the engine persists, in insertion order
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub products: Vec<Product>,
    pub warehouses: Vec<Warehouse>,
    pub customers: Vec<Customer>,
    pub suppliers: Vec<Supplier>,
    pub items: Vec<Item>,
    pub virtual_barcodes: Vec<VirtualBarcode>,
    pub orders: Vec<Order>,
    pub order_products: Vec<OrderProduct>,
    pub links: Vec<ItemLink>,
    pub movements: Vec<InventoryMovement>,
}

impl MemoryState {
    fn item(&self, id: Uuid) -> Option<&Item> {
        self.items.iter().find(|i| i.id == id)
    }

    fn order(&self, id: Uuid) -> Option<&Order> {
        self.orders.iter().find(|o| o.id == id)
    }

    fn order_of_line(&self, order_product_id: Uuid) -> Option<&Order> {
        self.order_products
            .iter()
            .find(|op| op.id == order_product_id)
            .and_then(|op| self.order(op.order_id))
    }

    fn billed_quantity(&self, item_id: Uuid) -> Decimal {
        self.links
            .iter()
            .filter(|l| l.item_id == item_id)
            .filter(|l| {
                self.order_of_line(l.order_product_id).map_or(false, |o| {
                    o.order_type == OrderType::PartialInvoice && o.state != OrderState::Cancelled
                })
            })
            .map(|l| l.quantity)
            .sum()
    }
}

/// Shared in-memory store
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_product(&self, product: Product) {
        self.state.lock().await.products.push(product);
    }

    pub async fn seed_warehouse(&self, warehouse: Warehouse) {
        self.state.lock().await.warehouses.push(warehouse);
    }

    pub async fn seed_customer(&self, customer: Customer) {
        self.state.lock().await.customers.push(customer);
    }

    pub async fn seed_supplier(&self, supplier: Supplier) {
        self.state.lock().await.suppliers.push(supplier);
    }

    /// Copy of the committed state
    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> AppResult<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn product(&mut self, id: Uuid) -> AppResult<Option<Product>> {
        Ok(self.working.products.iter().find(|p| p.id == id).cloned())
    }

    async fn warehouse(&mut self, id: Uuid) -> AppResult<Option<Warehouse>> {
        Ok(self.working.warehouses.iter().find(|w| w.id == id).cloned())
    }

    async fn default_warehouse(&mut self) -> AppResult<Option<Warehouse>> {
        Ok(self.working.warehouses.iter().find(|w| w.is_default).cloned())
    }

    async fn customer(&mut self, id: Uuid) -> AppResult<Option<Customer>> {
        Ok(self.working.customers.iter().find(|c| c.id == id).cloned())
    }

    async fn supplier(&mut self, id: Uuid) -> AppResult<Option<Supplier>> {
        Ok(self.working.suppliers.iter().find(|s| s.id == id).cloned())
    }

    async fn item_by_id(&mut self, id: Uuid) -> AppResult<Option<Item>> {
        Ok(self.working.item(id).cloned())
    }

    async fn item_by_barcode(&mut self, barcode: &str) -> AppResult<Option<Item>> {
        Ok(self.working.items.iter().find(|i| i.barcode == barcode).cloned())
    }

    async fn item_by_quantity(&mut self, query: QuantityMatch) -> AppResult<Option<Item>> {
        Ok(self
            .working
            .items
            .iter()
            .find(|i| {
                i.product_id == query.product_id
                    && i.current_quantity == query.quantity
                    && i.state == query.state
                    && query.warehouse_id.map_or(true, |w| i.warehouse_id == Some(w))
            })
            .cloned())
    }

    async fn next_barcode_sequence(&mut self, product_id: Uuid) -> AppResult<i64> {
        let max = self
            .working
            .items
            .iter()
            .filter(|i| i.product_id == product_id)
            .map(|i| i.barcode_sequence)
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }

    async fn insert_item(&mut self, item: &Item) -> AppResult<()> {
        self.working.items.push(item.clone());
        Ok(())
    }

    async fn update_item(&mut self, item: &Item) -> AppResult<()> {
        if let Some(existing) = self.working.items.iter_mut().find(|i| i.id == item.id) {
            *existing = item.clone();
        }
        Ok(())
    }

    async fn delete_item(&mut self, id: Uuid) -> AppResult<()> {
        self.working.items.retain(|i| i.id != id);
        self.working.links.retain(|l| l.item_id != id);
        self.working.virtual_barcodes.retain(|v| v.item_id != id);
        Ok(())
    }

    async fn virtual_barcode(&mut self, barcode: &str) -> AppResult<Option<VirtualBarcode>> {
        Ok(self
            .working
            .virtual_barcodes
            .iter()
            .find(|v| v.barcode == barcode)
            .cloned())
    }

    async fn virtual_barcodes_for_item(
        &mut self,
        item_id: Uuid,
    ) -> AppResult<Vec<VirtualBarcode>> {
        Ok(self
            .working
            .virtual_barcodes
            .iter()
            .filter(|v| v.item_id == item_id)
            .cloned()
            .collect())
    }

    async fn insert_virtual_barcode(&mut self, mapping: &VirtualBarcode) -> AppResult<()> {
        self.working.virtual_barcodes.push(mapping.clone());
        Ok(())
    }

    async fn mark_virtual_barcode_used(&mut self, barcode: &str) -> AppResult<()> {
        if let Some(v) = self
            .working
            .virtual_barcodes
            .iter_mut()
            .find(|v| v.barcode == barcode)
        {
            v.used = true;
        }
        Ok(())
    }

    async fn order(&mut self, id: Uuid) -> AppResult<Option<Order>> {
        Ok(self.working.order(id).cloned())
    }

    async fn order_codes_with_stem(&mut self, stem: &str) -> AppResult<Vec<String>> {
        Ok(self
            .working
            .orders
            .iter()
            .filter(|o| o.code.starts_with(stem))
            .map(|o| o.code.clone())
            .collect())
    }

    async fn insert_order(&mut self, order: &Order) -> AppResult<()> {
        self.working.orders.push(order.clone());
        Ok(())
    }

    async fn update_order(&mut self, order: &Order) -> AppResult<()> {
        if let Some(existing) = self.working.orders.iter_mut().find(|o| o.id == order.id) {
            *existing = order.clone();
        }
        Ok(())
    }

    async fn delete_order(&mut self, id: Uuid) -> AppResult<()> {
        let lines: Vec<Uuid> = self
            .working
            .order_products
            .iter()
            .filter(|op| op.order_id == id)
            .map(|op| op.id)
            .collect();
        self.working
            .links
            .retain(|l| !lines.contains(&l.order_product_id));
        self.working.order_products.retain(|op| op.order_id != id);
        self.working.orders.retain(|o| o.id != id);
        Ok(())
    }

    async fn order_products(&mut self, order_id: Uuid) -> AppResult<Vec<OrderProduct>> {
        Ok(self
            .working
            .order_products
            .iter()
            .filter(|op| op.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn order_product(&mut self, id: Uuid) -> AppResult<Option<OrderProduct>> {
        Ok(self
            .working
            .order_products
            .iter()
            .find(|op| op.id == id)
            .cloned())
    }

    async fn insert_order_product(&mut self, line: &OrderProduct) -> AppResult<()> {
        self.working.order_products.push(line.clone());
        Ok(())
    }

    async fn update_order_product(&mut self, line: &OrderProduct) -> AppResult<()> {
        if let Some(existing) = self
            .working
            .order_products
            .iter_mut()
            .find(|op| op.id == line.id)
        {
            *existing = line.clone();
        }
        Ok(())
    }

    async fn delete_order_product(&mut self, id: Uuid) -> AppResult<()> {
        self.working.links.retain(|l| l.order_product_id != id);
        self.working.order_products.retain(|op| op.id != id);
        Ok(())
    }

    async fn links_for_order_product(
        &mut self,
        order_product_id: Uuid,
    ) -> AppResult<Vec<ItemLink>> {
        Ok(self
            .working
            .links
            .iter()
            .filter(|l| l.order_product_id == order_product_id)
            .cloned()
            .collect())
    }

    async fn links_for_item(&mut self, item_id: Uuid) -> AppResult<Vec<ItemLink>> {
        Ok(self
            .working
            .links
            .iter()
            .filter(|l| l.item_id == item_id)
            .cloned()
            .collect())
    }

    async fn upsert_link(&mut self, link: &ItemLink) -> AppResult<()> {
        match self.working.links.iter_mut().find(|l| {
            l.order_product_id == link.order_product_id && l.item_id == link.item_id
        }) {
            Some(existing) => existing.quantity = link.quantity,
            None => self.working.links.push(link.clone()),
        }
        Ok(())
    }

    async fn delete_link(&mut self, order_product_id: Uuid, item_id: Uuid) -> AppResult<()> {
        self.working
            .links
            .retain(|l| !(l.order_product_id == order_product_id && l.item_id == item_id));
        Ok(())
    }

    async fn insert_movement(&mut self, movement: &InventoryMovement) -> AppResult<()> {
        self.working.movements.push(movement.clone());
        Ok(())
    }

    async fn movements_for_item(&mut self, item_id: Uuid) -> AppResult<Vec<InventoryMovement>> {
        Ok(self
            .working
            .movements
            .iter()
            .filter(|m| m.item_id == item_id)
            .cloned()
            .collect())
    }

    async fn latest_movement(&mut self, item_id: Uuid) -> AppResult<Option<InventoryMovement>> {
        Ok(self
            .working
            .movements
            .iter()
            .rev()
            .find(|m| m.item_id == item_id)
            .cloned())
    }

    async fn find_movements(
        &mut self,
        filter: &MovementFilter,
        sort: SortDirection,
        pagination: Pagination,
    ) -> AppResult<(Vec<InventoryMovement>, u64)> {
        let mut matching: Vec<InventoryMovement> = self
            .working
            .movements
            .iter()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect();
        if sort == SortDirection::Desc {
            matching.reverse();
        }
        let total = matching.len() as u64;
        let page = matching
            .into_iter()
            .skip(pagination.offset() as usize)
            .take(pagination.limit() as usize)
            .collect();
        Ok((page, total))
    }

    async fn ledger_mismatches(&mut self) -> AppResult<Vec<LedgerMismatch>> {
        let state = &self.working;
        Ok(state
            .items
            .iter()
            .filter_map(|item| {
                let latest = state
                    .movements
                    .iter()
                    .rev()
                    .find(|m| m.item_id == item.id)
                    .map(|m| m.balance_after);
                (latest != Some(item.current_quantity)).then(|| LedgerMismatch {
                    item_id: item.id,
                    current_quantity: item.current_quantity,
                    ledger_balance: latest,
                })
            })
            .collect())
    }

    async fn invoice_candidates(
        &mut self,
        scope: CandidateScope,
    ) -> AppResult<Vec<InvoiceCandidate>> {
        let state = &self.working;
        let mut sales: Vec<&Order> = state
            .orders
            .iter()
            .filter(|o| o.order_type == OrderType::Sale && o.state == OrderState::Completed)
            .filter(|o| scope.customer_id.map_or(true, |c| o.customer_id == Some(c)))
            .filter(|o| scope.sale_order_id.map_or(true, |id| o.id == id))
            .collect();
        sales.sort_by_key(|o| o.dispatch_date());

        let mut candidates = Vec::new();
        for order in sales {
            let lines = state
                .order_products
                .iter()
                .filter(|op| op.order_id == order.id)
                .filter(|op| scope.product_id.map_or(true, |p| op.product_id == p));
            for line in lines {
                let items = state
                    .links
                    .iter()
                    .filter(|l| l.order_product_id == line.id)
                    .filter_map(|l| state.item(l.item_id))
                    .filter(|i| i.state == ItemState::Sold && !i.is_invoiced);
                for item in items {
                    candidates.push(InvoiceCandidate {
                        item: item.clone(),
                        order_id: order.id,
                        order_code: order.code.clone(),
                        dispatched_at: order.dispatch_date(),
                        billed_quantity: state.billed_quantity(item.id),
                    });
                }
            }
        }
        Ok(candidates)
    }

    async fn billed_quantity(&mut self, item_id: Uuid) -> AppResult<Decimal> {
        Ok(self.working.billed_quantity(item_id))
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        Ok(())
    }
}
