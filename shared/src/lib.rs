//! Shared types and models for the stockflow inventory engine
//!
//! This crate contains the domain records, their string forms and the pure
//! helpers (code generation, package rounding, input validation) used by the
//! backend services and storage adapters.

pub mod models;
pub mod types;
pub mod validation;

pub use models::*;
pub use types::*;
pub use validation::*;
