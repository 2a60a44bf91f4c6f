//! Domain models for the inventory movement engine

mod catalog;
mod invoice;
mod item;
mod movement;
mod order;

pub use catalog::*;
pub use invoice::*;
pub use item::*;
pub use movement::*;
pub use order::*;
