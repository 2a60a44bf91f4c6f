//! Stockflow inventory movement and order fulfillment engine
//!
//! Items are traceable lots whose quantity, warehouse and custody state change
//! only through orders. Every change is recorded in an append-only ledger.

pub mod config;
pub mod error;
pub mod services;
pub mod store;

pub use config::{Config, EngineConfig};
pub use error::{AppError, AppResult};
pub use services::EngineServices;
pub use store::{MemoryStore, PgStore, Store, StoreTx};
