//! Validation utilities for the inventory engine
//!
//! Pure checks run before any mutation is attempted.

use std::collections::HashSet;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{ItemInput, ItemKey, OrderLineInput, OrderType};

// ============================================================================
// Quantity and Price Validations
// ============================================================================

/// Validate that a quantity is strictly positive
pub fn validate_positive_quantity(quantity: Decimal) -> Result<(), &'static str> {
    if quantity <= Decimal::ZERO {
        return Err("Quantity must be positive");
    }
    Ok(())
}

/// Validate that a resulting item balance is not negative
pub fn validate_non_negative_balance(balance: Decimal) -> Result<(), &'static str> {
    if balance < Decimal::ZERO {
        return Err("Item quantity cannot go below zero");
    }
    Ok(())
}

/// Validate invoice percentage is in (0, 100]
pub fn validate_invoice_percentage(percentage: Decimal) -> Result<(), &'static str> {
    if percentage <= Decimal::ZERO || percentage > Decimal::ONE_HUNDRED {
        return Err("Invoice percentage must be greater than 0 and at most 100");
    }
    Ok(())
}

/// Validate unit price is not negative
pub fn validate_unit_price(price: Decimal) -> Result<(), &'static str> {
    if price < Decimal::ZERO {
        return Err("Unit price cannot be negative");
    }
    Ok(())
}

// ============================================================================
// Identifier Validations
// ============================================================================

/// Validate barcode format (1-64 printable characters, no whitespace)
pub fn validate_barcode(barcode: &str) -> Result<(), &'static str> {
    if barcode.is_empty() {
        return Err("Barcode cannot be empty");
    }
    if barcode.len() > 64 {
        return Err("Barcode must be at most 64 characters");
    }
    if barcode.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err("Barcode cannot contain whitespace");
    }
    Ok(())
}

/// Validate order code format: `PREFIX-YYMMDD-N`
pub fn validate_order_code(code: &str) -> Result<(), &'static str> {
    let mut parts = code.split('-');
    let (Some(prefix), Some(date), Some(seq), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err("Order code must have the form PREFIX-YYMMDD-N");
    };

    if !OrderType::ALL.iter().any(|t| t.code_prefix() == prefix) {
        return Err("Unknown order code prefix");
    }
    if date.len() != 6 || !date.chars().all(|c| c.is_ascii_digit()) {
        return Err("Order code date must be YYMMDD");
    }
    if seq.is_empty() || !seq.chars().all(|c| c.is_ascii_digit()) {
        return Err("Order code sequence must be numeric");
    }
    Ok(())
}

/// Validate that an item input names at least one way to identify it
pub fn validate_item_identification(
    input: &ItemInput,
    product_id: Option<Uuid>,
) -> Result<(), &'static str> {
    let has_barcode = input
        .barcode
        .as_deref()
        .map_or(false, |b| !b.trim().is_empty());
    let has_quantity_match = input.quantity.is_some() && product_id.is_some();
    if input.id.is_none() && !has_barcode && !has_quantity_match {
        return Err("Item must be identified by id, barcode or product and quantity");
    }
    Ok(())
}

// ============================================================================
// Order Line Validations
// ============================================================================

/// First stable key that appears more than once across the lines
pub fn find_duplicate_item_key(lines: &[OrderLineInput]) -> Option<ItemKey> {
    let mut seen = HashSet::new();
    lines
        .iter()
        .flat_map(|line| line.items.iter())
        .filter_map(ItemInput::key)
        .find(|key| !seen.insert(key.clone()))
}

/// Validate the numeric fields of one order line
pub fn validate_order_line(line: &OrderLineInput) -> Result<(), &'static str> {
    validate_unit_price(line.unit_price)?;
    if let Some(percentage) = line.invoice_percentage {
        validate_invoice_percentage(percentage)?;
    }
    if let Some(requested) = line.requested_quantity {
        if requested < Decimal::ZERO {
            return Err("Requested quantity cannot be negative");
        }
    }
    for item in &line.items {
        if let Some(quantity) = item.quantity {
            validate_positive_quantity(quantity)?;
        }
        if let Some(consumed) = item.consumed_quantity {
            validate_positive_quantity(consumed)?;
        }
        if let Some(barcode) = item.barcode.as_deref() {
            validate_barcode(barcode.trim())?;
        }
    }
    Ok(())
}

/// Validate source/destination warehouses of a transfer
pub fn validate_transfer_warehouses(
    source: Option<Uuid>,
    destination: Option<Uuid>,
) -> Result<(), &'static str> {
    match (source, destination) {
        (Some(s), Some(d)) if s == d => Err("Transfer source and destination must differ"),
        (Some(_), Some(_)) => Ok(()),
        _ => Err("Transfer requires source and destination warehouses"),
    }
}
