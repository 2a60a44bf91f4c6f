//! Orders, order lines and the inputs that drive them

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ItemInput;
use crate::types::UnknownVariant;

/// Business document types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum OrderType {
    Purchase,
    Sale,
    Transfer,
    Return,
    Adjustment,
    Transform,
    Out,
    In,
    PartialInvoice,
}

impl OrderType {
    pub const ALL: [OrderType; 9] = [
        OrderType::Purchase,
        OrderType::Sale,
        OrderType::Transfer,
        OrderType::Return,
        OrderType::Adjustment,
        OrderType::Transform,
        OrderType::Out,
        OrderType::In,
        OrderType::PartialInvoice,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Purchase => "purchase",
            OrderType::Sale => "sale",
            OrderType::Transfer => "transfer",
            OrderType::Return => "return",
            OrderType::Adjustment => "adjustment",
            OrderType::Transform => "transform",
            OrderType::Out => "out",
            OrderType::In => "in",
            OrderType::PartialInvoice => "partial-invoice",
        }
    }

    /// Prefix of the human-readable order code
    pub fn code_prefix(&self) -> &'static str {
        match self {
            OrderType::Purchase => "PO",
            OrderType::Sale => "SO",
            OrderType::Transfer => "TR",
            OrderType::Return => "RT",
            OrderType::Adjustment => "AJ",
            OrderType::Transform => "TF",
            OrderType::Out => "OUT",
            OrderType::In => "IN",
            OrderType::PartialInvoice => "PI",
        }
    }

    /// Orders whose items are minted by the order itself
    pub fn creates_items(&self) -> bool {
        matches!(
            self,
            OrderType::Purchase | OrderType::In | OrderType::Transform
        )
    }
}

impl FromStr for OrderType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownVariant::new("order type", s))
    }
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order lifecycle state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    #[default]
    Draft,
    Confirmed,
    Processing,
    Completed,
    Cancelled,
}

impl OrderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Draft => "draft",
            OrderState::Confirmed => "confirmed",
            OrderState::Processing => "processing",
            OrderState::Completed => "completed",
            OrderState::Cancelled => "cancelled",
        }
    }

    /// Only draft and confirmed orders accept item changes
    pub fn is_mutable(&self) -> bool {
        matches!(self, OrderState::Draft | OrderState::Confirmed)
    }
}

impl FromStr for OrderState {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(OrderState::Draft),
            "confirmed" => Ok(OrderState::Confirmed),
            "processing" => Ok(OrderState::Processing),
            "completed" => Ok(OrderState::Completed),
            "cancelled" => Ok(OrderState::Cancelled),
            other => Err(UnknownVariant::new("order state", other)),
        }
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A business document moving inventory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: Uuid,
    /// `PREFIX-YYMMDD-N`
    pub code: String,
    pub order_type: OrderType,
    pub state: OrderState,
    pub source_warehouse_id: Option<Uuid>,
    pub destination_warehouse_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub supplier_id: Option<Uuid>,
    pub parent_order_id: Option<Uuid>,
    pub notes: Option<String>,
    /// First time the order reached `completed`
    pub dispatched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Date used for FIFO ordering of dispatched stock
    pub fn dispatch_date(&self) -> DateTime<Utc> {
        self.dispatched_at.unwrap_or(self.created_at)
    }
}

/// Line item joining an order to a product and its items
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderProduct {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub requested_quantity: Decimal,
    pub requested_packages: Decimal,
    pub confirmed_quantity: Decimal,
    pub confirmed_packages: Decimal,
    pub delivered_quantity: Decimal,
    pub delivered_packages: Decimal,
    pub unit_price: Decimal,
    pub vat_included: bool,
    /// Share of the line billed on this document (split billing)
    pub invoice_percentage: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Association of an item with an order line
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemLink {
    pub order_product_id: Uuid,
    pub item_id: Uuid,
    pub quantity: Decimal,
}

/// One requested line on a create/update
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderLineInput {
    pub product_id: Uuid,
    /// Defaults to the sum of the line's item quantities
    pub requested_quantity: Option<Decimal>,
    #[serde(default)]
    pub unit_price: Decimal,
    #[serde(default)]
    pub vat_included: bool,
    pub invoice_percentage: Option<Decimal>,
    #[serde(default)]
    pub items: Vec<ItemInput>,
}

impl OrderLineInput {
    pub fn new(product_id: Uuid, items: Vec<ItemInput>) -> Self {
        Self {
            product_id,
            requested_quantity: None,
            unit_price: Decimal::ZERO,
            vat_included: false,
            invoice_percentage: None,
            items,
        }
    }

    /// Requested quantity, falling back to the item quantities
    pub fn effective_requested_quantity(&self) -> Decimal {
        self.requested_quantity.unwrap_or_else(|| {
            self.items
                .iter()
                .filter_map(|i| i.quantity)
                .sum::<Decimal>()
        })
    }
}

/// Input for creating an order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderInput {
    pub order_type: OrderType,
    pub source_warehouse_id: Option<Uuid>,
    pub destination_warehouse_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub supplier_id: Option<Uuid>,
    pub parent_order_id: Option<Uuid>,
    pub notes: Option<String>,
    #[serde(default)]
    pub lines: Vec<OrderLineInput>,
}

impl CreateOrderInput {
    pub fn new(order_type: OrderType) -> Self {
        Self {
            order_type,
            source_warehouse_id: None,
            destination_warehouse_id: None,
            customer_id: None,
            supplier_id: None,
            parent_order_id: None,
            notes: None,
            lines: Vec::new(),
        }
    }
}

/// Order header fields that may be patched on update
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderPatch {
    pub state: Option<OrderState>,
    pub source_warehouse_id: Option<Uuid>,
    pub destination_warehouse_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub supplier_id: Option<Uuid>,
    pub notes: Option<String>,
}

impl OrderPatch {
    pub fn state(state: OrderState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }
}

/// Input for updating an order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateOrderInput {
    /// Full desired line list; `None` re-applies the current items
    pub lines: Option<Vec<OrderLineInput>>,
    #[serde(default)]
    pub patch: OrderPatch,
}

/// Input for adding one item to an order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddItemInput {
    pub product_id: Uuid,
    pub item: ItemInput,
    pub unit_price: Option<Decimal>,
}

/// Format an order code: `PREFIX-YYMMDD-N`
pub fn generate_order_code(order_type: OrderType, date: NaiveDate, sequence: i64) -> String {
    format!(
        "{}-{}-{}",
        order_type.code_prefix(),
        date.format("%y%m%d"),
        sequence
    )
}

/// The `PREFIX-YYMMDD-` part shared by all codes of a type and day
pub fn order_code_stem(order_type: OrderType, date: NaiveDate) -> String {
    format!("{}-{}-", order_type.code_prefix(), date.format("%y%m%d"))
}

/// Sequence suffix of a code with the given stem
pub fn parse_order_code_sequence(code: &str, stem: &str) -> Option<i64> {
    code.strip_prefix(stem)?.parse().ok()
}

/// Packages for a quantity, rounded half away from zero
pub fn package_count(quantity: Decimal, units_per_package: Option<Decimal>) -> Decimal {
    match units_per_package {
        Some(upp) if upp > Decimal::ZERO => {
            (quantity / upp).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        }
        _ => Decimal::ZERO,
    }
}
