//! Storage seam for the engine
//!
//! Every engine read and write goes through a [`StoreTx`] obtained from a
//! [`Store`]. A transaction that is dropped without `commit` discards its
//! writes.

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use shared::{
    Customer, InventoryMovement, InvoiceCandidate, Item, ItemLink, ItemState, LedgerMismatch,
    MovementFilter, Order, OrderProduct, Pagination, Product, SortDirection, Supplier,
    VirtualBarcode, Warehouse,
};

use crate::error::AppResult;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Source of transactions
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> AppResult<Box<dyn StoreTx>>;
}

/// Scope of an invoice candidate scan
#[derive(Debug, Clone, Copy, Default)]
pub struct CandidateScope {
    pub customer_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    /// Restrict to one sale order
    pub sale_order_id: Option<Uuid>,
}

/// Exact-quantity lookup used when only a quantity was scanned
#[derive(Debug, Clone, Copy)]
pub struct QuantityMatch {
    pub product_id: Uuid,
    pub quantity: Decimal,
    pub warehouse_id: Option<Uuid>,
    pub state: ItemState,
}

/// One open unit of work
#[async_trait]
pub trait StoreTx: Send {
    // Catalog collaborators
    async fn product(&mut self, id: Uuid) -> AppResult<Option<Product>>;
    async fn warehouse(&mut self, id: Uuid) -> AppResult<Option<Warehouse>>;
    async fn default_warehouse(&mut self) -> AppResult<Option<Warehouse>>;
    async fn customer(&mut self, id: Uuid) -> AppResult<Option<Customer>>;
    async fn supplier(&mut self, id: Uuid) -> AppResult<Option<Supplier>>;

    // Items (rows returned here are locked until the transaction ends)
    async fn item_by_id(&mut self, id: Uuid) -> AppResult<Option<Item>>;
    async fn item_by_barcode(&mut self, barcode: &str) -> AppResult<Option<Item>>;
    /// Oldest unlocked item with exactly the given quantity
    async fn item_by_quantity(&mut self, query: QuantityMatch) -> AppResult<Option<Item>>;
    async fn next_barcode_sequence(&mut self, product_id: Uuid) -> AppResult<i64>;
    async fn insert_item(&mut self, item: &Item) -> AppResult<()>;
    async fn update_item(&mut self, item: &Item) -> AppResult<()>;
    /// Removes the item with its links and virtual barcodes
    async fn delete_item(&mut self, id: Uuid) -> AppResult<()>;

    async fn virtual_barcode(&mut self, barcode: &str) -> AppResult<Option<VirtualBarcode>>;
    async fn virtual_barcodes_for_item(&mut self, item_id: Uuid)
        -> AppResult<Vec<VirtualBarcode>>;
    async fn insert_virtual_barcode(&mut self, mapping: &VirtualBarcode) -> AppResult<()>;
    async fn mark_virtual_barcode_used(&mut self, barcode: &str) -> AppResult<()>;

    // Orders
    async fn order(&mut self, id: Uuid) -> AppResult<Option<Order>>;
    /// Codes starting with `stem`
    async fn order_codes_with_stem(&mut self, stem: &str) -> AppResult<Vec<String>>;
    async fn insert_order(&mut self, order: &Order) -> AppResult<()>;
    async fn update_order(&mut self, order: &Order) -> AppResult<()>;
    async fn delete_order(&mut self, id: Uuid) -> AppResult<()>;

    async fn order_products(&mut self, order_id: Uuid) -> AppResult<Vec<OrderProduct>>;
    async fn order_product(&mut self, id: Uuid) -> AppResult<Option<OrderProduct>>;
    async fn insert_order_product(&mut self, line: &OrderProduct) -> AppResult<()>;
    async fn update_order_product(&mut self, line: &OrderProduct) -> AppResult<()>;
    async fn delete_order_product(&mut self, id: Uuid) -> AppResult<()>;

    // Item <-> order line links
    async fn links_for_order_product(&mut self, order_product_id: Uuid)
        -> AppResult<Vec<ItemLink>>;
    async fn links_for_item(&mut self, item_id: Uuid) -> AppResult<Vec<ItemLink>>;
    /// Insert or replace the link's quantity
    async fn upsert_link(&mut self, link: &ItemLink) -> AppResult<()>;
    async fn delete_link(&mut self, order_product_id: Uuid, item_id: Uuid) -> AppResult<()>;

    // Ledger (append-only)
    async fn insert_movement(&mut self, movement: &InventoryMovement) -> AppResult<()>;
    /// Oldest first
    async fn movements_for_item(&mut self, item_id: Uuid) -> AppResult<Vec<InventoryMovement>>;
    async fn latest_movement(&mut self, item_id: Uuid) -> AppResult<Option<InventoryMovement>>;
    async fn find_movements(
        &mut self,
        filter: &MovementFilter,
        sort: SortDirection,
        pagination: Pagination,
    ) -> AppResult<(Vec<InventoryMovement>, u64)>;
    async fn ledger_mismatches(&mut self) -> AppResult<Vec<LedgerMismatch>>;

    // Billing
    /// Sold, not invoiced items of completed sales, oldest dispatch first
    async fn invoice_candidates(&mut self, scope: CandidateScope)
        -> AppResult<Vec<InvoiceCandidate>>;
    /// Quantity of an item claimed by non-cancelled partial invoices
    async fn billed_quantity(&mut self, item_id: Uuid) -> AppResult<Decimal>;

    async fn commit(self: Box<Self>) -> AppResult<()>;
    async fn rollback(self: Box<Self>) -> AppResult<()>;
}
