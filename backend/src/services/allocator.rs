//! FIFO invoice allocator
//!
//! Matches a billing quantity against sold, not yet invoiced items of a
//! customer's completed sales, oldest dispatch first. Either the full quantity
//! is allocated or nothing is.

use std::collections::HashSet;

use rust_decimal::Decimal;
use tracing::debug;
use uuid::Uuid;

use shared::{validate_positive_quantity, Allocation, InvoiceCandidate};

use crate::error::{AppError, AppResult};
use crate::store::{CandidateScope, StoreTx};

/// Plan an allocation over `candidates`, which must already be oldest first
pub fn plan_fifo_allocation(
    candidates: &[InvoiceCandidate],
    product_id: Uuid,
    requested: Decimal,
) -> AppResult<Vec<Allocation>> {
    validate_positive_quantity(requested).map_err(|m| AppError::validation("quantity", m))?;

    let mut seen = HashSet::new();
    let eligible: Vec<&InvoiceCandidate> = candidates
        .iter()
        .filter(|c| c.item.product_id == product_id)
        .filter(|c| c.remaining_quantity() > Decimal::ZERO)
        .filter(|c| seen.insert(c.item.id))
        .collect();

    let available: Decimal = eligible.iter().map(|c| c.remaining_quantity()).sum();
    if available < requested {
        return Err(AppError::InsufficientInventory {
            product_id,
            requested,
            available,
        });
    }

    let mut needed = requested;
    let mut allocations = Vec::new();
    for candidate in eligible {
        if needed <= Decimal::ZERO {
            break;
        }
        let take = candidate.remaining_quantity().min(needed);
        needed -= take;
        allocations.push(Allocation {
            item: candidate.item.clone(),
            quantity_to_invoice: take,
            source_order_id: candidate.order_id,
            source_order_code: candidate.order_code.clone(),
        });
    }
    Ok(allocations)
}

#[derive(Debug, Default)]
pub struct FifoAllocator;

impl FifoAllocator {
    pub fn new() -> Self {
        Self
    }

    /// Eligible items for a customer and product, oldest dispatch first
    pub async fn candidates(
        &self,
        tx: &mut dyn StoreTx,
        customer_id: Uuid,
        product_id: Uuid,
    ) -> AppResult<Vec<InvoiceCandidate>> {
        tx.invoice_candidates(CandidateScope {
            customer_id: Some(customer_id),
            product_id: Some(product_id),
            sale_order_id: None,
        })
        .await
    }

    /// Total billable quantity for a customer and product
    pub async fn available(
        &self,
        tx: &mut dyn StoreTx,
        customer_id: Uuid,
        product_id: Uuid,
    ) -> AppResult<Decimal> {
        let candidates = self.candidates(tx, customer_id, product_id).await?;
        Ok(candidates.iter().map(|c| c.remaining_quantity()).sum())
    }

    pub async fn allocate(
        &self,
        tx: &mut dyn StoreTx,
        customer_id: Uuid,
        product_id: Uuid,
        quantity: Decimal,
    ) -> AppResult<Vec<Allocation>> {
        let candidates = self.candidates(tx, customer_id, product_id).await?;
        let allocations = plan_fifo_allocation(&candidates, product_id, quantity)?;

        debug!(
            %customer_id,
            %product_id,
            requested = %quantity,
            items = allocations.len(),
            "FIFO allocation planned"
        );
        Ok(allocations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use shared::{Item, ItemState};

    fn candidate(product_id: Uuid, quantity: i64, billed: i64, age_days: i64) -> InvoiceCandidate {
        let now = Utc::now();
        InvoiceCandidate {
            item: Item {
                id: Uuid::new_v4(),
                product_id,
                warehouse_id: None,
                state: ItemState::Sold,
                original_quantity: Decimal::from(quantity),
                current_quantity: Decimal::from(quantity),
                unit: "kg".into(),
                lot_number: None,
                container_number: None,
                item_number: None,
                barcode: format!("P-{quantity}-{age_days}"),
                barcode_sequence: 1,
                parent_item_id: None,
                transformed_from_item_id: None,
                is_partition: false,
                is_invoiced: false,
                invoiced_date: None,
                cost: None,
                origin_order_id: None,
                created_at: now,
                updated_at: now,
            },
            order_id: Uuid::new_v4(),
            order_code: format!("SO-240307-{age_days}"),
            dispatched_at: now - Duration::days(age_days),
            billed_quantity: Decimal::from(billed),
        }
    }

    #[test]
    fn test_takes_oldest_first() {
        let product = Uuid::new_v4();
        let candidates = vec![candidate(product, 60, 0, 10), candidate(product, 40, 0, 5)];

        let plan = plan_fifo_allocation(&candidates, product, Decimal::from(80)).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].quantity_to_invoice, Decimal::from(60));
        assert_eq!(plan[1].quantity_to_invoice, Decimal::from(20));
        assert_eq!(plan[0].source_order_id, candidates[0].order_id);
    }

    #[test]
    fn test_shortfall_allocates_nothing() {
        let product = Uuid::new_v4();
        let candidates = vec![candidate(product, 60, 0, 10), candidate(product, 40, 0, 5)];

        let err = plan_fifo_allocation(&candidates, product, Decimal::from(150)).unwrap_err();
        match err {
            AppError::InsufficientInventory {
                requested,
                available,
                ..
            } => {
                assert_eq!(requested, Decimal::from(150));
                assert_eq!(available, Decimal::from(100));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_partially_billed_items_offer_their_remainder() {
        let product = Uuid::new_v4();
        let candidates = vec![candidate(product, 60, 50, 10), candidate(product, 40, 0, 5)];

        let plan = plan_fifo_allocation(&candidates, product, Decimal::from(30)).unwrap();
        assert_eq!(plan[0].quantity_to_invoice, Decimal::from(10));
        assert_eq!(plan[1].quantity_to_invoice, Decimal::from(20));
    }

    #[test]
    fn test_ignores_other_products_and_duplicates() {
        let product = Uuid::new_v4();
        let first = candidate(product, 10, 0, 3);
        let candidates = vec![
            candidate(Uuid::new_v4(), 500, 0, 9),
            first.clone(),
            first,
        ];

        let err = plan_fifo_allocation(&candidates, product, Decimal::from(15)).unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_INVENTORY");
    }

    #[test]
    fn test_rejects_non_positive_request() {
        let product = Uuid::new_v4();
        let err = plan_fifo_allocation(&[], product, Decimal::ZERO).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
