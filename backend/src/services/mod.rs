//! Engine services for the stockflow inventory engine

use std::sync::Arc;

pub mod allocator;
pub mod coordinator;
pub mod events;
pub mod invoice;
pub mod item;
pub mod ledger;
pub mod movement;
pub mod order;
pub mod order_diff;
pub mod strategy;

pub use allocator::{plan_fifo_allocation, FifoAllocator};
pub use coordinator::TransactionCoordinator;
pub use events::{BroadcastEventSink, EventError, EventSink, OrderEvent, OrderEventKind};
pub use invoice::InvoiceService;
pub use item::{synthesize_movements, ItemLookup, ItemService, MovementContext};
pub use ledger::Ledger;
pub use movement::MovementService;
pub use order::OrderService;
pub use order_diff::{desired_items, diff_order_items, DesiredItem, LinkedItem, OrderDiff};
pub use strategy::{MovementRequest, MovementStrategy, StrategyRegistry};

use crate::config::EngineConfig;
use crate::store::Store;

/// All engine services wired over one store and event sink
#[derive(Clone)]
pub struct EngineServices {
    pub coordinator: Arc<TransactionCoordinator>,
    pub ledger: Arc<Ledger>,
    pub items: Arc<ItemService>,
    pub allocator: Arc<FifoAllocator>,
    pub strategies: Arc<StrategyRegistry>,
    pub orders: Arc<OrderService>,
    pub movements: Arc<MovementService>,
    pub invoices: Arc<InvoiceService>,
}

impl EngineServices {
    pub fn new(store: Arc<dyn Store>, events: Arc<dyn EventSink>, engine: EngineConfig) -> Self {
        let coordinator = Arc::new(TransactionCoordinator::new(store, events));
        let ledger = Arc::new(Ledger::new());
        let allocator = Arc::new(FifoAllocator::new());
        let items = Arc::new(ItemService::new(ledger.clone(), coordinator.clone()));
        let strategies = Arc::new(StrategyRegistry::new(
            items.clone(),
            ledger.clone(),
            allocator.clone(),
        ));
        let orders = Arc::new(OrderService::new(
            coordinator.clone(),
            strategies.clone(),
            engine,
        ));
        let movements = Arc::new(MovementService::new(
            coordinator.clone(),
            items.clone(),
            ledger.clone(),
        ));
        let invoices = Arc::new(InvoiceService::new(
            coordinator.clone(),
            items.clone(),
            allocator.clone(),
        ));

        Self {
            coordinator,
            ledger,
            items,
            allocator,
            strategies,
            orders,
            movements,
            invoices,
        }
    }
}
