//! Order lifecycle
//!
//! Every public entry point runs in one transaction: header validation, item
//! movements through the order type's strategy and line totals either all
//! commit or none do. Events go out after the commit.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

use shared::{
    find_duplicate_item_key, generate_order_code, order_code_stem, package_count,
    parse_order_code_sequence, validate_item_identification, validate_order_line,
    validate_transfer_warehouses, AddItemInput, CreateOrderInput, ItemInput, ItemLink, Order,
    OrderLineInput, OrderPatch, OrderProduct, OrderState, OrderType, Product, UpdateOrderInput,
};

use super::coordinator::TransactionCoordinator;
use super::events::{OrderEvent, OrderEventKind};
use super::order_diff::{desired_items, diff_order_items, LinkedItem};
use super::strategy::{MovementRequest, StrategyRegistry};
use crate::config::EngineConfig;
use crate::error::{AppError, AppResult};
use crate::store::StoreTx;

pub struct OrderService {
    coordinator: Arc<TransactionCoordinator>,
    strategies: Arc<StrategyRegistry>,
    engine: EngineConfig,
}

fn request<'a>(
    order: &'a Order,
    line: &'a OrderProduct,
    product: &'a Product,
    input: &'a ItemInput,
    reverse: bool,
) -> MovementRequest<'a> {
    MovementRequest {
        input,
        order,
        order_product: line,
        product,
        order_state: order.state,
        reverse,
    }
}

fn ensure_mutable(order: &Order) -> AppResult<()> {
    if !order.state.is_mutable() {
        return Err(AppError::InvalidState(format!(
            "Order {} is {} and can no longer be changed",
            order.code, order.state
        )));
    }
    Ok(())
}

fn validate_lines(order_type: OrderType, lines: &[OrderLineInput]) -> AppResult<()> {
    for line in lines {
        validate_order_line(line).map_err(|m| AppError::validation("lines", m))?;
        if !order_type.creates_items() {
            for item in &line.items {
                validate_item_identification(item, Some(line.product_id))
                    .map_err(|m| AppError::validation("items", m))?;
            }
        }
    }
    if let Some(key) = find_duplicate_item_key(lines) {
        return Err(AppError::validation(
            "items",
            format!("Item {key:?} appears more than once"),
        ));
    }
    Ok(())
}

fn new_order_product(order: &Order, line: &OrderLineInput) -> OrderProduct {
    let now = Utc::now();
    OrderProduct {
        id: Uuid::new_v4(),
        order_id: order.id,
        product_id: line.product_id,
        requested_quantity: line.effective_requested_quantity(),
        requested_packages: Decimal::ZERO,
        confirmed_quantity: Decimal::ZERO,
        confirmed_packages: Decimal::ZERO,
        delivered_quantity: Decimal::ZERO,
        delivered_packages: Decimal::ZERO,
        unit_price: line.unit_price,
        vat_included: line.vat_included,
        invoice_percentage: line.invoice_percentage.unwrap_or(Decimal::ONE_HUNDRED),
        created_at: now,
        updated_at: now,
    }
}

fn apply_patch(order: &mut Order, patch: &OrderPatch) {
    if let Some(state) = patch.state {
        order.state = state;
    }
    if patch.source_warehouse_id.is_some() {
        order.source_warehouse_id = patch.source_warehouse_id;
    }
    if patch.destination_warehouse_id.is_some() {
        order.destination_warehouse_id = patch.destination_warehouse_id;
    }
    if patch.customer_id.is_some() {
        order.customer_id = patch.customer_id;
    }
    if patch.supplier_id.is_some() {
        order.supplier_id = patch.supplier_id;
    }
    if patch.notes.is_some() {
        order.notes = patch.notes.clone();
    }
}

impl OrderService {
    pub fn new(
        coordinator: Arc<TransactionCoordinator>,
        strategies: Arc<StrategyRegistry>,
        engine: EngineConfig,
    ) -> Self {
        Self {
            coordinator,
            strategies,
            engine,
        }
    }

    // ========================================================================
    // Public entry points
    // ========================================================================

    pub async fn create(&self, input: CreateOrderInput) -> AppResult<Order> {
        let mut tx = self.coordinator.begin().await?;
        let result = self.create_in(tx.as_mut(), input).await;
        let order = self.coordinator.complete(tx, result).await?;

        info!(order_id = %order.id, code = %order.code, order_type = %order.order_type, "Order created");
        self.coordinator
            .publish(OrderEvent::new(OrderEventKind::Created, order.clone()));
        Ok(order)
    }

    pub async fn update(&self, id: Uuid, input: UpdateOrderInput) -> AppResult<Order> {
        let mut tx = self.coordinator.begin().await?;
        let result = self.update_in(tx.as_mut(), id, input).await;
        let order = self.coordinator.complete(tx, result).await?;

        info!(order_id = %order.id, code = %order.code, state = %order.state, "Order updated");
        self.coordinator
            .publish(OrderEvent::new(OrderEventKind::Updated, order.clone()));
        Ok(order)
    }

    /// Reverse every item movement and remove the order; returns its last state
    pub async fn delete(&self, id: Uuid) -> AppResult<Order> {
        let mut tx = self.coordinator.begin().await?;
        let result = self.delete_in(tx.as_mut(), id).await;
        let order = self.coordinator.complete(tx, result).await?;

        info!(order_id = %order.id, code = %order.code, "Order deleted");
        self.coordinator
            .publish(OrderEvent::new(OrderEventKind::Deleted, order.clone()));
        Ok(order)
    }

    pub async fn add_item(&self, order_id: Uuid, input: AddItemInput) -> AppResult<Order> {
        let mut tx = self.coordinator.begin().await?;
        let result = self.add_item_in(tx.as_mut(), order_id, input).await;
        let order = self.coordinator.complete(tx, result).await?;

        info!(order_id = %order.id, code = %order.code, "Item added to order");
        self.coordinator
            .publish(OrderEvent::new(OrderEventKind::ItemAdded, order.clone()));
        Ok(order)
    }

    pub async fn remove_item(&self, order_id: Uuid, item_id: Uuid) -> AppResult<Order> {
        let mut tx = self.coordinator.begin().await?;
        let result = self.remove_item_in(tx.as_mut(), order_id, item_id).await;
        let order = self.coordinator.complete(tx, result).await?;

        info!(order_id = %order.id, code = %order.code, %item_id, "Item removed from order");
        self.coordinator
            .publish(OrderEvent::new(OrderEventKind::ItemRemoved, order.clone()));
        Ok(order)
    }

    pub async fn get(&self, id: Uuid) -> AppResult<Order> {
        let mut tx = self.coordinator.begin().await?;
        let result = Self::load(tx.as_mut(), id).await;
        self.coordinator.discard(tx, result).await
    }

    /// Lines of an order with their recomputed totals
    pub async fn lines(&self, id: Uuid) -> AppResult<Vec<OrderProduct>> {
        let mut tx = self.coordinator.begin().await?;
        let result = tx.order_products(id).await;
        self.coordinator.discard(tx, result).await
    }

    // ========================================================================
    // Transaction-level operations
    // ========================================================================

    pub async fn create_in(&self, tx: &mut dyn StoreTx, input: CreateOrderInput) -> AppResult<Order> {
        validate_lines(input.order_type, &input.lines)?;

        let now = Utc::now();
        let mut order = Order {
            id: Uuid::new_v4(),
            code: String::new(),
            order_type: input.order_type,
            state: OrderState::Draft,
            source_warehouse_id: input.source_warehouse_id,
            destination_warehouse_id: input.destination_warehouse_id,
            customer_id: input.customer_id,
            supplier_id: input.supplier_id,
            parent_order_id: input.parent_order_id,
            notes: input.notes,
            dispatched_at: None,
            created_at: now,
            updated_at: now,
        };
        self.validate_header(tx, &mut order).await?;
        order.code = self.next_code(tx, order.order_type).await?;
        tx.insert_order(&order).await?;

        let strategy = self.strategies.for_order_type(order.order_type);
        for line in &input.lines {
            let product = Self::product(tx, line.product_id).await?;
            let order_product = new_order_product(&order, line);
            tx.insert_order_product(&order_product).await?;

            for item in &line.items {
                strategy
                    .create(tx, request(&order, &order_product, &product, item, false))
                    .await?;
            }
        }

        self.recompute(tx, &order).await?;
        Ok(order)
    }

    pub async fn update_in(
        &self,
        tx: &mut dyn StoreTx,
        id: Uuid,
        input: UpdateOrderInput,
    ) -> AppResult<Order> {
        let mut order = Self::load(tx, id).await?;
        ensure_mutable(&order)?;
        if let Some(lines) = &input.lines {
            validate_lines(order.order_type, lines)?;
        }

        apply_patch(&mut order, &input.patch);
        self.validate_header(tx, &mut order).await?;
        let now = Utc::now();
        if order.state == OrderState::Completed && order.dispatched_at.is_none() {
            order.dispatched_at = Some(now);
        }
        order.updated_at = now;
        tx.update_order(&order).await?;

        match input.lines {
            Some(lines) => self.apply_lines(tx, &order, &lines).await?,
            None => self.refresh_items(tx, &order).await?,
        }

        self.recompute(tx, &order).await?;
        Ok(order)
    }

    pub async fn delete_in(&self, tx: &mut dyn StoreTx, id: Uuid) -> AppResult<Order> {
        let order = Self::load(tx, id).await?;
        ensure_mutable(&order)?;

        let strategy = self.strategies.for_order_type(order.order_type);
        for line in tx.order_products(order.id).await? {
            let product = Self::product(tx, line.product_id).await?;
            for link in tx.links_for_order_product(line.id).await? {
                let input = ItemInput::by_id(link.item_id);
                strategy
                    .delete(tx, request(&order, &line, &product, &input, true))
                    .await?;
            }
            tx.delete_order_product(line.id).await?;
        }
        tx.delete_order(order.id).await?;
        Ok(order)
    }

    pub async fn add_item_in(
        &self,
        tx: &mut dyn StoreTx,
        order_id: Uuid,
        input: AddItemInput,
    ) -> AppResult<Order> {
        let order = Self::load(tx, order_id).await?;
        ensure_mutable(&order)?;
        let line_input = OrderLineInput {
            unit_price: input.unit_price.unwrap_or(Decimal::ZERO),
            ..OrderLineInput::new(input.product_id, vec![input.item.clone()])
        };
        validate_lines(order.order_type, std::slice::from_ref(&line_input))?;

        let product = Self::product(tx, input.product_id).await?;
        if let Some(key) = input.item.key() {
            for linked in self.linked_items(tx, order.id).await? {
                if linked.matches(&key) {
                    return Err(AppError::validation(
                        "item",
                        format!("Item {} is already on order {}", linked.barcode, order.code),
                    ));
                }
            }
        }

        let existing = tx
            .order_products(order.id)
            .await?
            .into_iter()
            .find(|op| op.product_id == product.id);
        let order_product = match existing {
            Some(mut op) => {
                if let Some(price) = input.unit_price {
                    op.unit_price = price;
                    op.updated_at = Utc::now();
                    tx.update_order_product(&op).await?;
                }
                op
            }
            None => {
                let op = new_order_product(&order, &line_input);
                tx.insert_order_product(&op).await?;
                op
            }
        };

        self.strategies
            .for_order_type(order.order_type)
            .create(tx, request(&order, &order_product, &product, &input.item, false))
            .await?;
        self.recompute(tx, &order).await?;
        Ok(order)
    }

    pub async fn remove_item_in(
        &self,
        tx: &mut dyn StoreTx,
        order_id: Uuid,
        item_id: Uuid,
    ) -> AppResult<Order> {
        let order = Self::load(tx, order_id).await?;
        ensure_mutable(&order)?;

        let mut found = None;
        for line in tx.order_products(order.id).await? {
            let links = tx.links_for_order_product(line.id).await?;
            if links.iter().any(|l| l.item_id == item_id) {
                found = Some(line);
                break;
            }
        }
        let line = found.ok_or_else(|| {
            AppError::NotFound(format!("Item {item_id} on order {}", order.code))
        })?;

        let product = Self::product(tx, line.product_id).await?;
        let input = ItemInput::by_id(item_id);
        self.strategies
            .for_order_type(order.order_type)
            .delete(tx, request(&order, &line, &product, &input, true))
            .await?;
        tx.delete_link(line.id, item_id).await?;

        self.recompute(tx, &order).await?;
        Ok(order)
    }

    // ========================================================================
    // Line processing
    // ========================================================================

    /// Reconcile the order's items with a full desired line list
    async fn apply_lines(
        &self,
        tx: &mut dyn StoreTx,
        order: &Order,
        lines: &[OrderLineInput],
    ) -> AppResult<()> {
        let strategy = self.strategies.for_order_type(order.order_type);
        let existing = tx.order_products(order.id).await?;
        let current = self.linked_items(tx, order.id).await?;
        let diff = diff_order_items(&current, desired_items(lines));

        debug!(
            order = %order.code,
            add = diff.to_add.len(),
            keep = diff.to_keep.len(),
            remove = diff.to_remove.len(),
            "Order item diff"
        );

        // Each submitted line takes the first unused line of its product
        let mut used = vec![false; existing.len()];
        let mut targets = Vec::with_capacity(lines.len());
        for line in lines {
            let slot = existing
                .iter()
                .enumerate()
                .position(|(i, op)| !used[i] && op.product_id == line.product_id);
            let op = match slot {
                Some(i) => {
                    used[i] = true;
                    let mut op = existing[i].clone();
                    op.requested_quantity = line.effective_requested_quantity();
                    op.unit_price = line.unit_price;
                    op.vat_included = line.vat_included;
                    op.invoice_percentage =
                        line.invoice_percentage.unwrap_or(op.invoice_percentage);
                    op.updated_at = Utc::now();
                    tx.update_order_product(&op).await?;
                    op
                }
                None => {
                    let op = new_order_product(order, line);
                    tx.insert_order_product(&op).await?;
                    op
                }
            };
            let product = Self::product(tx, line.product_id).await?;
            targets.push((op, product));
        }

        for linked in &diff.to_remove {
            let Some(line) = existing.iter().find(|op| op.id == linked.order_product_id) else {
                continue;
            };
            let product = Self::product(tx, linked.product_id).await?;
            let input = ItemInput::by_id(linked.item_id);
            strategy
                .delete(tx, request(order, line, &product, &input, true))
                .await?;
        }

        for (linked, desired) in &diff.to_keep {
            let (line, product) = &targets[desired.line_index];
            if linked.order_product_id != line.id {
                self.move_link(tx, linked, line.id).await?;
            }
            let input = ItemInput {
                id: desired.input.id.or(Some(linked.item_id)),
                ..desired.input.clone()
            };
            strategy
                .update(tx, request(order, line, product, &input, false))
                .await?;
        }

        for desired in &diff.to_add {
            let (line, product) = &targets[desired.line_index];
            strategy
                .create(tx, request(order, line, product, &desired.input, false))
                .await?;
        }

        for (i, op) in existing.iter().enumerate() {
            if !used[i] && tx.links_for_order_product(op.id).await?.is_empty() {
                tx.delete_order_product(op.id).await?;
            }
        }
        Ok(())
    }

    /// Re-apply the order's state to every linked item
    async fn refresh_items(&self, tx: &mut dyn StoreTx, order: &Order) -> AppResult<()> {
        let strategy = self.strategies.for_order_type(order.order_type);
        for line in tx.order_products(order.id).await? {
            let product = Self::product(tx, line.product_id).await?;
            for link in tx.links_for_order_product(line.id).await? {
                let input = ItemInput::by_id(link.item_id);
                strategy
                    .update(tx, request(order, &line, &product, &input, false))
                    .await?;
            }
        }
        Ok(())
    }

    async fn move_link(&self, tx: &mut dyn StoreTx, linked: &LinkedItem, to: Uuid) -> AppResult<()> {
        let quantity = tx
            .links_for_order_product(linked.order_product_id)
            .await?
            .into_iter()
            .find(|l| l.item_id == linked.item_id)
            .map(|l| l.quantity)
            .unwrap_or(Decimal::ZERO);
        tx.delete_link(linked.order_product_id, linked.item_id).await?;
        tx.upsert_link(&ItemLink {
            order_product_id: to,
            item_id: linked.item_id,
            quantity,
        })
        .await
    }

    /// Confirmed and delivered totals follow the linked items
    async fn recompute(&self, tx: &mut dyn StoreTx, order: &Order) -> AppResult<()> {
        for mut line in tx.order_products(order.id).await? {
            let product = Self::product(tx, line.product_id).await?;
            let links = tx.links_for_order_product(line.id).await?;

            let mut confirmed = Decimal::ZERO;
            if order.state != OrderState::Cancelled {
                for link in &links {
                    confirmed += if order.order_type == OrderType::PartialInvoice {
                        link.quantity
                    } else {
                        tx.item_by_id(link.item_id)
                            .await?
                            .map(|item| item.current_quantity)
                            .unwrap_or(Decimal::ZERO)
                    };
                }
            }
            let delivered = if order.state == OrderState::Completed {
                confirmed
            } else {
                Decimal::ZERO
            };

            let upp = product.units_per_package;
            let before = line.clone();
            line.confirmed_quantity = confirmed;
            line.delivered_quantity = delivered;
            line.requested_packages = package_count(line.requested_quantity, upp);
            line.confirmed_packages = package_count(confirmed, upp);
            line.delivered_packages = package_count(delivered, upp);
            if line != before {
                line.updated_at = Utc::now();
                tx.update_order_product(&line).await?;
            }
        }
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn load(tx: &mut dyn StoreTx, id: Uuid) -> AppResult<Order> {
        tx.order(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order {id}")))
    }

    async fn product(tx: &mut dyn StoreTx, id: Uuid) -> AppResult<Product> {
        tx.product(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Product {id}")))
    }

    async fn linked_items(&self, tx: &mut dyn StoreTx, order_id: Uuid) -> AppResult<Vec<LinkedItem>> {
        let mut linked = Vec::new();
        for line in tx.order_products(order_id).await? {
            for link in tx.links_for_order_product(line.id).await? {
                if let Some(item) = tx.item_by_id(link.item_id).await? {
                    let virtual_barcodes = tx
                        .virtual_barcodes_for_item(item.id)
                        .await?
                        .into_iter()
                        .map(|v| v.barcode)
                        .collect();
                    linked.push(LinkedItem {
                        item_id: item.id,
                        barcode: item.barcode,
                        virtual_barcodes,
                        order_product_id: line.id,
                        product_id: line.product_id,
                    });
                }
            }
        }
        Ok(linked)
    }

    /// Next `PREFIX-YYMMDD-N` for today's business day
    async fn next_code(&self, tx: &mut dyn StoreTx, order_type: OrderType) -> AppResult<String> {
        let today = Utc::now()
            .with_timezone(&self.engine.order_code_offset())
            .date_naive();
        let stem = order_code_stem(order_type, today);
        let last = tx
            .order_codes_with_stem(&stem)
            .await?
            .iter()
            .filter_map(|code| parse_order_code_sequence(code, &stem))
            .max()
            .unwrap_or(0);
        Ok(generate_order_code(order_type, today, last + 1))
    }

    /// Check references and per-type header rules; fills in the default destination
    async fn validate_header(&self, tx: &mut dyn StoreTx, order: &mut Order) -> AppResult<()> {
        for (field, warehouse_id) in [
            ("source_warehouse_id", order.source_warehouse_id),
            ("destination_warehouse_id", order.destination_warehouse_id),
        ] {
            if let Some(id) = warehouse_id {
                if tx.warehouse(id).await?.is_none() {
                    return Err(AppError::NotFound(format!("Warehouse {id} ({field})")));
                }
            }
        }
        if let Some(id) = order.customer_id {
            tx.customer(id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Customer {id}")))?;
        }
        if let Some(id) = order.supplier_id {
            tx.supplier(id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Supplier {id}")))?;
        }
        if let Some(id) = order.parent_order_id {
            tx.order(id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Parent order {id}")))?;
        }

        match order.order_type {
            OrderType::Purchase | OrderType::In => {
                if order.destination_warehouse_id.is_none() {
                    let default = tx.default_warehouse().await?.ok_or_else(|| {
                        AppError::validation(
                            "destination_warehouse_id",
                            "A destination warehouse is required",
                        )
                    })?;
                    order.destination_warehouse_id = Some(default.id);
                }
            }
            OrderType::Transfer => {
                validate_transfer_warehouses(
                    order.source_warehouse_id,
                    order.destination_warehouse_id,
                )
                .map_err(|m| AppError::validation("destination_warehouse_id", m))?;
            }
            OrderType::PartialInvoice => {
                if order.customer_id.is_none() {
                    return Err(AppError::validation(
                        "customer_id",
                        "Partial invoices need a customer",
                    ));
                }
            }
            OrderType::Sale
            | OrderType::Return
            | OrderType::Adjustment
            | OrderType::Transform
            | OrderType::Out => {}
        }
        Ok(())
    }
}
