//! Partial-invoice (remission billing) models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Item;

/// A sold, not fully billed item from a completed sale
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvoiceCandidate {
    pub item: Item,
    pub order_id: Uuid,
    pub order_code: String,
    pub dispatched_at: DateTime<Utc>,
    /// Quantity already claimed by non-cancelled partial invoices
    pub billed_quantity: Decimal,
}

impl InvoiceCandidate {
    pub fn remaining_quantity(&self) -> Decimal {
        (self.item.current_quantity - self.billed_quantity).max(Decimal::ZERO)
    }
}

/// One slice of a FIFO allocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Allocation {
    pub item: Item,
    pub quantity_to_invoice: Decimal,
    pub source_order_id: Uuid,
    pub source_order_code: String,
}

/// Outcome of checking one partial-invoice line
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvoiceLineCheck {
    pub product_id: Uuid,
    pub requested: Decimal,
    pub available: Decimal,
    pub is_satisfiable: bool,
}

/// Outcome of `validate_partial_invoice_order`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartialInvoiceValidation {
    pub order_id: Uuid,
    pub is_valid: bool,
    pub lines: Vec<InvoiceLineCheck>,
    pub problems: Vec<String>,
}
