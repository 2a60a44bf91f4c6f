//! Movement strategies
//!
//! One strategy per order type decides how adding, changing or removing an
//! item on an order maps onto item state machine calls. The registry maps
//! every [`OrderType`] to its strategy with an exhaustive match.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use shared::{Item, ItemInput, ItemLink, Order, OrderProduct, OrderState, OrderType, Product};

use super::allocator::FifoAllocator;
use super::item::{ItemLookup, ItemService, MovementContext};
use super::ledger::Ledger;
use crate::error::{AppError, AppResult};
use crate::store::StoreTx;

mod adjustment;
mod out;
mod partial_invoice;
mod purchase;
mod returns;
mod sale;
mod transfer;
mod transform;

pub use adjustment::AdjustmentStrategy;
pub use out::OutStrategy;
pub use partial_invoice::PartialInvoiceStrategy;
pub use purchase::PurchaseStrategy;
pub use returns::ReturnStrategy;
pub use sale::SaleStrategy;
pub use transfer::TransferStrategy;
pub use transform::TransformStrategy;

/// Everything a strategy needs about one item on one order line
#[derive(Debug, Clone, Copy)]
pub struct MovementRequest<'a> {
    pub input: &'a ItemInput,
    pub order: &'a Order,
    pub order_product: &'a OrderProduct,
    pub product: &'a Product,
    /// State the order is moving to
    pub order_state: OrderState,
    pub reverse: bool,
}

impl<'a> MovementRequest<'a> {
    pub fn context(&self) -> MovementContext {
        MovementContext::for_order(self.order, self.order_product, self.reverse)
    }

    pub fn lookup(&self) -> ItemLookup {
        ItemLookup::from_input(self.input, Some(self.product.id))
    }

    /// Input warehouse, else the order's destination, else the catalog default
    pub(crate) async fn destination_warehouse(&self, tx: &mut dyn StoreTx) -> AppResult<Uuid> {
        if let Some(id) = self.input.warehouse_id.or(self.order.destination_warehouse_id) {
            return Ok(id);
        }
        tx.default_warehouse()
            .await?
            .map(|w| w.id)
            .ok_or_else(|| {
                AppError::validation(
                    "destination_warehouse_id",
                    "No destination warehouse given and no default warehouse configured",
                )
            })
    }

    pub(crate) async fn link(&self, tx: &mut dyn StoreTx, item: &Item, quantity: Decimal) -> AppResult<()> {
        tx.upsert_link(&ItemLink {
            order_product_id: self.order_product.id,
            item_id: item.id,
            quantity,
        })
        .await
    }

    pub(crate) async fn unlink(&self, tx: &mut dyn StoreTx, item_id: Uuid) -> AppResult<()> {
        tx.delete_link(self.order_product.id, item_id).await
    }

    /// Reject items of a different product than the line
    pub(crate) fn ensure_product(&self, item: &Item) -> AppResult<()> {
        if item.product_id != self.product.id {
            return Err(AppError::validation(
                "product_id",
                format!(
                    "Item {} does not belong to product {}",
                    item.barcode, self.product.code
                ),
            ));
        }
        Ok(())
    }
}

/// How one order type moves its items
#[async_trait]
pub trait MovementStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Put an item on the order; returns every item touched or minted
    async fn create(&self, tx: &mut dyn StoreTx, req: MovementRequest<'_>) -> AppResult<Vec<Item>>;

    /// Re-apply the order's current state to an item already on it
    async fn update(&self, tx: &mut dyn StoreTx, req: MovementRequest<'_>) -> AppResult<Item>;

    /// Take an item off the order, undoing what `create` did
    async fn delete(&self, tx: &mut dyn StoreTx, req: MovementRequest<'_>) -> AppResult<()>;
}

pub struct StrategyRegistry {
    purchase: PurchaseStrategy,
    sale: SaleStrategy,
    transfer: TransferStrategy,
    returns: ReturnStrategy,
    adjustment: AdjustmentStrategy,
    transform: TransformStrategy,
    out: OutStrategy,
    partial_invoice: PartialInvoiceStrategy,
}

impl StrategyRegistry {
    pub fn new(items: Arc<ItemService>, ledger: Arc<Ledger>, allocator: Arc<FifoAllocator>) -> Self {
        Self {
            purchase: PurchaseStrategy::new(items.clone()),
            sale: SaleStrategy::new(items.clone()),
            transfer: TransferStrategy::new(items.clone()),
            returns: ReturnStrategy::new(items.clone()),
            adjustment: AdjustmentStrategy::new(items.clone(), ledger.clone()),
            transform: TransformStrategy::new(items.clone(), ledger.clone()),
            out: OutStrategy::new(items.clone(), ledger),
            partial_invoice: PartialInvoiceStrategy::new(items, allocator),
        }
    }

    pub fn for_order_type(&self, order_type: OrderType) -> &dyn MovementStrategy {
        match order_type {
            OrderType::Purchase | OrderType::In => &self.purchase,
            OrderType::Sale => &self.sale,
            OrderType::Transfer => &self.transfer,
            OrderType::Return => &self.returns,
            OrderType::Adjustment => &self.adjustment,
            OrderType::Transform => &self.transform,
            OrderType::Out => &self.out,
            OrderType::PartialInvoice => &self.partial_invoice,
        }
    }

    /// Strategy for a stored type name
    pub fn for_type_name(&self, name: &str) -> AppResult<&dyn MovementStrategy> {
        let order_type: OrderType = name
            .parse()
            .map_err(|_| AppError::StrategyNotFound(name.to_string()))?;
        Ok(self.for_order_type(order_type))
    }
}
