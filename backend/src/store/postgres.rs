//! PostgreSQL store
//!
//! Item rows read through a transaction are locked with `FOR UPDATE`; quantity
//! matching skips rows already locked by another transaction so two concurrent
//! scans never pick the same item.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use shared::{
    Customer, InventoryMovement, InvoiceCandidate, Item, ItemLink, LedgerMismatch,
    MovementFilter, Order, OrderProduct, OrderType, Pagination, Product, SortDirection, Supplier,
    UnknownVariant, VirtualBarcode, Warehouse,
};

use super::{CandidateScope, QuantityMatch, Store, StoreTx};
use crate::config::DatabaseConfig;
use crate::error::{AppError, AppResult};

/// Pooled PostgreSQL store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool from configuration
    pub async fn connect(config: &DatabaseConfig) -> AppResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending schema migrations
    pub async fn migrate(&self) -> AppResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.into()))
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> AppResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

// ============================================================================
// Row types
// ============================================================================

fn parse_column<T>(value: &str) -> AppResult<T>
where
    T: FromStr<Err = UnknownVariant>,
{
    value
        .parse()
        .map_err(|e: UnknownVariant| AppError::Internal(e.to_string()))
}

fn parse_order_type(value: &str) -> AppResult<OrderType> {
    value
        .parse()
        .map_err(|_| AppError::StrategyNotFound(value.to_string()))
}

fn item_columns(alias: &str) -> String {
    [
        "id",
        "product_id",
        "warehouse_id",
        "state",
        "original_quantity",
        "current_quantity",
        "unit",
        "lot_number",
        "container_number",
        "item_number",
        "barcode",
        "barcode_sequence",
        "parent_item_id",
        "transformed_from_item_id",
        "is_partition",
        "is_invoiced",
        "invoiced_date",
        "cost",
        "origin_order_id",
        "created_at",
        "updated_at",
    ]
    .iter()
    .map(|c| format!("{alias}{c}"))
    .collect::<Vec<_>>()
    .join(", ")
}

const ORDER_COLUMNS: &str = "id, code, order_type, state, source_warehouse_id, \
    destination_warehouse_id, customer_id, supplier_id, parent_order_id, notes, \
    dispatched_at, created_at, updated_at";

const ORDER_PRODUCT_COLUMNS: &str = "id, order_id, product_id, requested_quantity, \
    requested_packages, confirmed_quantity, confirmed_packages, delivered_quantity, \
    delivered_packages, unit_price, vat_included, invoice_percentage, created_at, updated_at";

const MOVEMENT_COLUMNS: &str = "id, item_id, product_id, movement_type, quantity, \
    balance_before, balance_after, order_id, order_product_id, source_warehouse_id, \
    destination_warehouse_id, related_item_id, reason, created_at";

#[derive(Debug, FromRow)]
struct ItemRow {
    id: Uuid,
    product_id: Uuid,
    warehouse_id: Option<Uuid>,
    state: String,
    original_quantity: Decimal,
    current_quantity: Decimal,
    unit: String,
    lot_number: Option<String>,
    container_number: Option<String>,
    item_number: Option<String>,
    barcode: String,
    barcode_sequence: i64,
    parent_item_id: Option<Uuid>,
    transformed_from_item_id: Option<Uuid>,
    is_partition: bool,
    is_invoiced: bool,
    invoiced_date: Option<DateTime<Utc>>,
    cost: Option<Decimal>,
    origin_order_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ItemRow {
    fn into_item(self) -> AppResult<Item> {
        Ok(Item {
            id: self.id,
            product_id: self.product_id,
            warehouse_id: self.warehouse_id,
            state: parse_column(&self.state)?,
            original_quantity: self.original_quantity,
            current_quantity: self.current_quantity,
            unit: self.unit,
            lot_number: self.lot_number,
            container_number: self.container_number,
            item_number: self.item_number,
            barcode: self.barcode,
            barcode_sequence: self.barcode_sequence,
            parent_item_id: self.parent_item_id,
            transformed_from_item_id: self.transformed_from_item_id,
            is_partition: self.is_partition,
            is_invoiced: self.is_invoiced,
            invoiced_date: self.invoiced_date,
            cost: self.cost,
            origin_order_id: self.origin_order_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct OrderRow {
    id: Uuid,
    code: String,
    order_type: String,
    state: String,
    source_warehouse_id: Option<Uuid>,
    destination_warehouse_id: Option<Uuid>,
    customer_id: Option<Uuid>,
    supplier_id: Option<Uuid>,
    parent_order_id: Option<Uuid>,
    notes: Option<String>,
    dispatched_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_order(self) -> AppResult<Order> {
        Ok(Order {
            id: self.id,
            code: self.code,
            order_type: parse_order_type(&self.order_type)?,
            state: parse_column(&self.state)?,
            source_warehouse_id: self.source_warehouse_id,
            destination_warehouse_id: self.destination_warehouse_id,
            customer_id: self.customer_id,
            supplier_id: self.supplier_id,
            parent_order_id: self.parent_order_id,
            notes: self.notes,
            dispatched_at: self.dispatched_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct OrderProductRow {
    id: Uuid,
    order_id: Uuid,
    product_id: Uuid,
    requested_quantity: Decimal,
    requested_packages: Decimal,
    confirmed_quantity: Decimal,
    confirmed_packages: Decimal,
    delivered_quantity: Decimal,
    delivered_packages: Decimal,
    unit_price: Decimal,
    vat_included: bool,
    invoice_percentage: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<OrderProductRow> for OrderProduct {
    fn from(row: OrderProductRow) -> Self {
        OrderProduct {
            id: row.id,
            order_id: row.order_id,
            product_id: row.product_id,
            requested_quantity: row.requested_quantity,
            requested_packages: row.requested_packages,
            confirmed_quantity: row.confirmed_quantity,
            confirmed_packages: row.confirmed_packages,
            delivered_quantity: row.delivered_quantity,
            delivered_packages: row.delivered_packages,
            unit_price: row.unit_price,
            vat_included: row.vat_included,
            invoice_percentage: row.invoice_percentage,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct MovementRow {
    id: Uuid,
    item_id: Uuid,
    product_id: Uuid,
    movement_type: String,
    quantity: Decimal,
    balance_before: Decimal,
    balance_after: Decimal,
    order_id: Option<Uuid>,
    order_product_id: Option<Uuid>,
    source_warehouse_id: Option<Uuid>,
    destination_warehouse_id: Option<Uuid>,
    related_item_id: Option<Uuid>,
    reason: Option<String>,
    created_at: DateTime<Utc>,
}

impl MovementRow {
    fn into_movement(self) -> AppResult<InventoryMovement> {
        Ok(InventoryMovement {
            id: self.id,
            item_id: self.item_id,
            product_id: self.product_id,
            movement_type: parse_column(&self.movement_type)?,
            quantity: self.quantity,
            balance_before: self.balance_before,
            balance_after: self.balance_after,
            order_id: self.order_id,
            order_product_id: self.order_product_id,
            source_warehouse_id: self.source_warehouse_id,
            destination_warehouse_id: self.destination_warehouse_id,
            related_item_id: self.related_item_id,
            reason: self.reason,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct CandidateRow {
    #[sqlx(flatten)]
    item: ItemRow,
    sale_order_id: Uuid,
    sale_order_code: String,
    dispatch_date: DateTime<Utc>,
    billed_quantity: Decimal,
}

#[derive(Debug, FromRow)]
struct MismatchRow {
    item_id: Uuid,
    current_quantity: Decimal,
    ledger_balance: Option<Decimal>,
}

#[derive(Debug, FromRow)]
struct ProductRow {
    id: Uuid,
    code: String,
    name: String,
    unit: String,
    units_per_package: Option<Decimal>,
}

#[derive(Debug, FromRow)]
struct WarehouseRow {
    id: Uuid,
    code: String,
    name: String,
    is_default: bool,
}

#[derive(Debug, FromRow)]
struct PartyRow {
    id: Uuid,
    name: String,
}

#[derive(Debug, FromRow)]
struct VirtualBarcodeRow {
    barcode: String,
    item_id: Uuid,
    used: bool,
    created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct LinkRow {
    order_product_id: Uuid,
    item_id: Uuid,
    quantity: Decimal,
}

impl From<LinkRow> for ItemLink {
    fn from(row: LinkRow) -> Self {
        ItemLink {
            order_product_id: row.order_product_id,
            item_id: row.item_id,
            quantity: row.quantity,
        }
    }
}

fn push_movement_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &MovementFilter) {
    if let Some(item_id) = filter.item_id {
        builder.push(" AND item_id = ").push_bind(item_id);
    }
    if let Some(product_id) = filter.product_id {
        builder.push(" AND product_id = ").push_bind(product_id);
    }
    if let Some(order_id) = filter.order_id {
        builder.push(" AND order_id = ").push_bind(order_id);
    }
    if let Some(movement_type) = filter.movement_type {
        builder
            .push(" AND movement_type = ")
            .push_bind(movement_type.as_str());
    }
    if let Some(warehouse_id) = filter.warehouse_id {
        builder
            .push(" AND (source_warehouse_id = ")
            .push_bind(warehouse_id)
            .push(" OR destination_warehouse_id = ")
            .push_bind(warehouse_id)
            .push(")");
    }
    if let Some(period) = &filter.period {
        if let Some(start) = period.start {
            builder.push(" AND created_at >= ").push_bind(start);
        }
        if let Some(end) = period.end {
            builder.push(" AND created_at <= ").push_bind(end);
        }
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn product(&mut self, id: Uuid) -> AppResult<Option<Product>> {
        let row = sqlx::query_as::<_, ProductRow>(
            "SELECT id, code, name, unit, units_per_package FROM products WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(|r| Product {
            id: r.id,
            code: r.code,
            name: r.name,
            unit: r.unit,
            units_per_package: r.units_per_package,
        }))
    }

    async fn warehouse(&mut self, id: Uuid) -> AppResult<Option<Warehouse>> {
        let row = sqlx::query_as::<_, WarehouseRow>(
            "SELECT id, code, name, is_default FROM warehouses WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(|r| Warehouse {
            id: r.id,
            code: r.code,
            name: r.name,
            is_default: r.is_default,
        }))
    }

    async fn default_warehouse(&mut self) -> AppResult<Option<Warehouse>> {
        let row = sqlx::query_as::<_, WarehouseRow>(
            "SELECT id, code, name, is_default FROM warehouses WHERE is_default LIMIT 1",
        )
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(|r| Warehouse {
            id: r.id,
            code: r.code,
            name: r.name,
            is_default: r.is_default,
        }))
    }

    async fn customer(&mut self, id: Uuid) -> AppResult<Option<Customer>> {
        let row = sqlx::query_as::<_, PartyRow>("SELECT id, name FROM customers WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(|r| Customer {
            id: r.id,
            name: r.name,
        }))
    }

    async fn supplier(&mut self, id: Uuid) -> AppResult<Option<Supplier>> {
        let row = sqlx::query_as::<_, PartyRow>("SELECT id, name FROM suppliers WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(|r| Supplier {
            id: r.id,
            name: r.name,
        }))
    }

    async fn item_by_id(&mut self, id: Uuid) -> AppResult<Option<Item>> {
        let sql = format!("SELECT {} FROM items WHERE id = $1 FOR UPDATE", item_columns(""));
        sqlx::query_as::<_, ItemRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(ItemRow::into_item)
            .transpose()
    }

    async fn item_by_barcode(&mut self, barcode: &str) -> AppResult<Option<Item>> {
        let sql = format!(
            "SELECT {} FROM items WHERE barcode = $1 FOR UPDATE",
            item_columns("")
        );
        sqlx::query_as::<_, ItemRow>(&sql)
            .bind(barcode)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(ItemRow::into_item)
            .transpose()
    }

    async fn item_by_quantity(&mut self, query: QuantityMatch) -> AppResult<Option<Item>> {
        let sql = format!(
            r#"
            SELECT {} FROM items
            WHERE product_id = $1
              AND current_quantity = $2
              AND state = $3
              AND ($4::uuid IS NULL OR warehouse_id = $4)
            ORDER BY created_at, id
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
            item_columns("")
        );
        sqlx::query_as::<_, ItemRow>(&sql)
            .bind(query.product_id)
            .bind(query.quantity)
            .bind(query.state.as_str())
            .bind(query.warehouse_id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(ItemRow::into_item)
            .transpose()
    }

    async fn next_barcode_sequence(&mut self, product_id: Uuid) -> AppResult<i64> {
        // Serialize sequence allocation per product
        sqlx::query("SELECT id FROM products WHERE id = $1 FOR UPDATE")
            .bind(product_id)
            .execute(&mut *self.tx)
            .await?;
        let next = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(MAX(barcode_sequence), 0) + 1 FROM items WHERE product_id = $1",
        )
        .bind(product_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(next)
    }

    async fn insert_item(&mut self, item: &Item) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO items (
                id, product_id, warehouse_id, state, original_quantity, current_quantity,
                unit, lot_number, container_number, item_number, barcode, barcode_sequence,
                parent_item_id, transformed_from_item_id, is_partition, is_invoiced,
                invoiced_date, cost, origin_order_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21)
            "#,
        )
        .bind(item.id)
        .bind(item.product_id)
        .bind(item.warehouse_id)
        .bind(item.state.as_str())
        .bind(item.original_quantity)
        .bind(item.current_quantity)
        .bind(&item.unit)
        .bind(&item.lot_number)
        .bind(&item.container_number)
        .bind(&item.item_number)
        .bind(&item.barcode)
        .bind(item.barcode_sequence)
        .bind(item.parent_item_id)
        .bind(item.transformed_from_item_id)
        .bind(item.is_partition)
        .bind(item.is_invoiced)
        .bind(item.invoiced_date)
        .bind(item.cost)
        .bind(item.origin_order_id)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_item(&mut self, item: &Item) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE items
            SET warehouse_id = $2, state = $3, current_quantity = $4, is_invoiced = $5,
                invoiced_date = $6, cost = $7, updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(item.id)
        .bind(item.warehouse_id)
        .bind(item.state.as_str())
        .bind(item.current_quantity)
        .bind(item.is_invoiced)
        .bind(item.invoiced_date)
        .bind(item.cost)
        .bind(item.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_item(&mut self, id: Uuid) -> AppResult<()> {
        // Links and virtual barcodes cascade
        sqlx::query("DELETE FROM items WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn virtual_barcode(&mut self, barcode: &str) -> AppResult<Option<VirtualBarcode>> {
        let row = sqlx::query_as::<_, VirtualBarcodeRow>(
            "SELECT barcode, item_id, used, created_at FROM virtual_barcodes WHERE barcode = $1 FOR UPDATE",
        )
        .bind(barcode)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(|r| VirtualBarcode {
            barcode: r.barcode,
            item_id: r.item_id,
            used: r.used,
            created_at: r.created_at,
        }))
    }

    async fn virtual_barcodes_for_item(
        &mut self,
        item_id: Uuid,
    ) -> AppResult<Vec<VirtualBarcode>> {
        let rows = sqlx::query_as::<_, VirtualBarcodeRow>(
            "SELECT barcode, item_id, used, created_at FROM virtual_barcodes WHERE item_id = $1 ORDER BY created_at",
        )
        .bind(item_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| VirtualBarcode {
                barcode: r.barcode,
                item_id: r.item_id,
                used: r.used,
                created_at: r.created_at,
            })
            .collect())
    }

    async fn insert_virtual_barcode(&mut self, mapping: &VirtualBarcode) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO virtual_barcodes (barcode, item_id, used, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(&mapping.barcode)
        .bind(mapping.item_id)
        .bind(mapping.used)
        .bind(mapping.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn mark_virtual_barcode_used(&mut self, barcode: &str) -> AppResult<()> {
        sqlx::query("UPDATE virtual_barcodes SET used = TRUE WHERE barcode = $1")
            .bind(barcode)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn order(&mut self, id: Uuid) -> AppResult<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, OrderRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(OrderRow::into_order)
            .transpose()
    }

    async fn order_codes_with_stem(&mut self, stem: &str) -> AppResult<Vec<String>> {
        let codes = sqlx::query_scalar::<_, String>(
            "SELECT code FROM orders WHERE starts_with(code, $1)",
        )
        .bind(stem)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(codes)
    }

    async fn insert_order(&mut self, order: &Order) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, code, order_type, state, source_warehouse_id, destination_warehouse_id,
                customer_id, supplier_id, parent_order_id, notes, dispatched_at,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(order.id)
        .bind(&order.code)
        .bind(order.order_type.as_str())
        .bind(order.state.as_str())
        .bind(order.source_warehouse_id)
        .bind(order.destination_warehouse_id)
        .bind(order.customer_id)
        .bind(order.supplier_id)
        .bind(order.parent_order_id)
        .bind(&order.notes)
        .bind(order.dispatched_at)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_order(&mut self, order: &Order) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE orders
            SET state = $2, source_warehouse_id = $3, destination_warehouse_id = $4,
                customer_id = $5, supplier_id = $6, notes = $7, dispatched_at = $8,
                updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(order.id)
        .bind(order.state.as_str())
        .bind(order.source_warehouse_id)
        .bind(order.destination_warehouse_id)
        .bind(order.customer_id)
        .bind(order.supplier_id)
        .bind(&order.notes)
        .bind(order.dispatched_at)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_order(&mut self, id: Uuid) -> AppResult<()> {
        // Order products and their links cascade
        sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn order_products(&mut self, order_id: Uuid) -> AppResult<Vec<OrderProduct>> {
        let sql = format!(
            "SELECT {ORDER_PRODUCT_COLUMNS} FROM order_products WHERE order_id = $1 ORDER BY created_at, id"
        );
        let rows = sqlx::query_as::<_, OrderProductRow>(&sql)
            .bind(order_id)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(rows.into_iter().map(OrderProduct::from).collect())
    }

    async fn order_product(&mut self, id: Uuid) -> AppResult<Option<OrderProduct>> {
        let sql = format!("SELECT {ORDER_PRODUCT_COLUMNS} FROM order_products WHERE id = $1");
        let row = sqlx::query_as::<_, OrderProductRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(OrderProduct::from))
    }

    async fn insert_order_product(&mut self, line: &OrderProduct) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO order_products (
                id, order_id, product_id, requested_quantity, requested_packages,
                confirmed_quantity, confirmed_packages, delivered_quantity, delivered_packages,
                unit_price, vat_included, invoice_percentage, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(line.id)
        .bind(line.order_id)
        .bind(line.product_id)
        .bind(line.requested_quantity)
        .bind(line.requested_packages)
        .bind(line.confirmed_quantity)
        .bind(line.confirmed_packages)
        .bind(line.delivered_quantity)
        .bind(line.delivered_packages)
        .bind(line.unit_price)
        .bind(line.vat_included)
        .bind(line.invoice_percentage)
        .bind(line.created_at)
        .bind(line.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_order_product(&mut self, line: &OrderProduct) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE order_products
            SET requested_quantity = $2, requested_packages = $3, confirmed_quantity = $4,
                confirmed_packages = $5, delivered_quantity = $6, delivered_packages = $7,
                unit_price = $8, vat_included = $9, invoice_percentage = $10, updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(line.id)
        .bind(line.requested_quantity)
        .bind(line.requested_packages)
        .bind(line.confirmed_quantity)
        .bind(line.confirmed_packages)
        .bind(line.delivered_quantity)
        .bind(line.delivered_packages)
        .bind(line.unit_price)
        .bind(line.vat_included)
        .bind(line.invoice_percentage)
        .bind(line.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_order_product(&mut self, id: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM order_products WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn links_for_order_product(
        &mut self,
        order_product_id: Uuid,
    ) -> AppResult<Vec<ItemLink>> {
        let rows = sqlx::query_as::<_, LinkRow>(
            "SELECT order_product_id, item_id, quantity FROM order_product_items WHERE order_product_id = $1",
        )
        .bind(order_product_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(ItemLink::from).collect())
    }

    async fn links_for_item(&mut self, item_id: Uuid) -> AppResult<Vec<ItemLink>> {
        let rows = sqlx::query_as::<_, LinkRow>(
            "SELECT order_product_id, item_id, quantity FROM order_product_items WHERE item_id = $1",
        )
        .bind(item_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(ItemLink::from).collect())
    }

    async fn upsert_link(&mut self, link: &ItemLink) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO order_product_items (order_product_id, item_id, quantity)
            VALUES ($1, $2, $3)
            ON CONFLICT (order_product_id, item_id) DO UPDATE SET quantity = EXCLUDED.quantity
            "#,
        )
        .bind(link.order_product_id)
        .bind(link.item_id)
        .bind(link.quantity)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_link(&mut self, order_product_id: Uuid, item_id: Uuid) -> AppResult<()> {
        sqlx::query(
            "DELETE FROM order_product_items WHERE order_product_id = $1 AND item_id = $2",
        )
        .bind(order_product_id)
        .bind(item_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_movement(&mut self, movement: &InventoryMovement) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO inventory_movements (
                id, item_id, product_id, movement_type, quantity, balance_before, balance_after,
                order_id, order_product_id, source_warehouse_id, destination_warehouse_id,
                related_item_id, reason, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(movement.id)
        .bind(movement.item_id)
        .bind(movement.product_id)
        .bind(movement.movement_type.as_str())
        .bind(movement.quantity)
        .bind(movement.balance_before)
        .bind(movement.balance_after)
        .bind(movement.order_id)
        .bind(movement.order_product_id)
        .bind(movement.source_warehouse_id)
        .bind(movement.destination_warehouse_id)
        .bind(movement.related_item_id)
        .bind(&movement.reason)
        .bind(movement.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn movements_for_item(&mut self, item_id: Uuid) -> AppResult<Vec<InventoryMovement>> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM inventory_movements WHERE item_id = $1 ORDER BY seq"
        );
        sqlx::query_as::<_, MovementRow>(&sql)
            .bind(item_id)
            .fetch_all(&mut *self.tx)
            .await?
            .into_iter()
            .map(MovementRow::into_movement)
            .collect()
    }

    async fn latest_movement(&mut self, item_id: Uuid) -> AppResult<Option<InventoryMovement>> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM inventory_movements WHERE item_id = $1 ORDER BY seq DESC LIMIT 1"
        );
        sqlx::query_as::<_, MovementRow>(&sql)
            .bind(item_id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(MovementRow::into_movement)
            .transpose()
    }

    async fn find_movements(
        &mut self,
        filter: &MovementFilter,
        sort: SortDirection,
        pagination: Pagination,
    ) -> AppResult<(Vec<InventoryMovement>, u64)> {
        let mut count = QueryBuilder::<Postgres>::new(
            "SELECT COUNT(*) FROM inventory_movements WHERE TRUE",
        );
        push_movement_filter(&mut count, filter);
        let total = count
            .build_query_scalar::<i64>()
            .fetch_one(&mut *self.tx)
            .await?;

        let mut query = QueryBuilder::<Postgres>::new(format!(
            "SELECT {MOVEMENT_COLUMNS} FROM inventory_movements WHERE TRUE"
        ));
        push_movement_filter(&mut query, filter);
        query
            .push(format!(" ORDER BY created_at {0}, seq {0}", sort.as_sql()))
            .push(" LIMIT ")
            .push_bind(pagination.limit() as i64)
            .push(" OFFSET ")
            .push_bind(pagination.offset() as i64);
        let rows = query
            .build_query_as::<MovementRow>()
            .fetch_all(&mut *self.tx)
            .await?;

        let movements = rows
            .into_iter()
            .map(MovementRow::into_movement)
            .collect::<AppResult<Vec<_>>>()?;
        Ok((movements, total.max(0) as u64))
    }

    async fn ledger_mismatches(&mut self) -> AppResult<Vec<LedgerMismatch>> {
        let rows = sqlx::query_as::<_, MismatchRow>(
            r#"
            SELECT i.id AS item_id, i.current_quantity, m.balance_after AS ledger_balance
            FROM items i
            LEFT JOIN LATERAL (
                SELECT balance_after FROM inventory_movements
                WHERE item_id = i.id
                ORDER BY seq DESC
                LIMIT 1
            ) m ON TRUE
            WHERE m.balance_after IS DISTINCT FROM i.current_quantity
            ORDER BY i.created_at, i.id
            "#,
        )
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| LedgerMismatch {
                item_id: r.item_id,
                current_quantity: r.current_quantity,
                ledger_balance: r.ledger_balance,
            })
            .collect())
    }

    async fn invoice_candidates(
        &mut self,
        scope: CandidateScope,
    ) -> AppResult<Vec<InvoiceCandidate>> {
        let sql = format!(
            r#"
            SELECT {},
                   o.id AS sale_order_id,
                   o.code AS sale_order_code,
                   COALESCE(o.dispatched_at, o.created_at) AS dispatch_date,
                   COALESCE((
                       SELECT SUM(pl.quantity)
                       FROM order_product_items pl
                       JOIN order_products pop ON pop.id = pl.order_product_id
                       JOIN orders po ON po.id = pop.order_id
                       WHERE pl.item_id = i.id
                         AND po.order_type = 'partial-invoice'
                         AND po.state <> 'cancelled'
                   ), 0) AS billed_quantity
            FROM items i
            JOIN order_product_items l ON l.item_id = i.id
            JOIN order_products op ON op.id = l.order_product_id
            JOIN orders o ON o.id = op.order_id
            WHERE o.order_type = 'sale'
              AND o.state = 'completed'
              AND i.state = 'sold'
              AND NOT i.is_invoiced
              AND ($1::uuid IS NULL OR o.customer_id = $1)
              AND ($2::uuid IS NULL OR op.product_id = $2)
              AND ($3::uuid IS NULL OR o.id = $3)
            ORDER BY COALESCE(o.dispatched_at, o.created_at), i.created_at, i.id
            "#,
            item_columns("i.")
        );
        let rows = sqlx::query_as::<_, CandidateRow>(&sql)
            .bind(scope.customer_id)
            .bind(scope.product_id)
            .bind(scope.sale_order_id)
            .fetch_all(&mut *self.tx)
            .await?;

        rows.into_iter()
            .map(|r| {
                Ok(InvoiceCandidate {
                    item: r.item.into_item()?,
                    order_id: r.sale_order_id,
                    order_code: r.sale_order_code,
                    dispatched_at: r.dispatch_date,
                    billed_quantity: r.billed_quantity,
                })
            })
            .collect()
    }

    async fn billed_quantity(&mut self, item_id: Uuid) -> AppResult<Decimal> {
        let billed = sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT COALESCE(SUM(l.quantity), 0)
            FROM order_product_items l
            JOIN order_products op ON op.id = l.order_product_id
            JOIN orders o ON o.id = op.order_id
            WHERE l.item_id = $1
              AND o.order_type = 'partial-invoice'
              AND o.state <> 'cancelled'
            "#,
        )
        .bind(item_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(billed)
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
