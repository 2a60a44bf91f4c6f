//! Error handling for the stockflow inventory engine
//!
//! Every engine failure maps onto one variant with a stable machine code, so an
//! outer layer can translate errors without matching on messages.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation error: {message}")]
    Validation { field: String, message: String },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Business logic errors
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Insufficient inventory for product {product_id}: requested {requested}, available {available}")]
    InsufficientInventory {
        product_id: Uuid,
        requested: Decimal,
        available: Decimal,
    },

    #[error("No movement strategy for order type: {0}")]
    StrategyNotFound(String),

    #[error("Ledger invariant violated: {0}")]
    LedgerInvariant(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error")]
    InternalError(#[from] anyhow::Error),
}

impl AppError {
    /// Shorthand for a field-level validation failure
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation { .. } | AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::InvalidState(_) => "STATE_ERROR",
            AppError::InsufficientInventory { .. } => "INSUFFICIENT_INVENTORY",
            AppError::StrategyNotFound(_) => "STRATEGY_NOT_FOUND",
            AppError::LedgerInvariant(_) => "LEDGER_INVARIANT",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Internal(_) | AppError::InternalError(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type alias for engine operations
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(AppError::validation("quantity", "bad").code(), "VALIDATION_ERROR");
        assert_eq!(AppError::NotFound("Item".into()).code(), "NOT_FOUND");
        assert_eq!(AppError::InvalidState("x".into()).code(), "STATE_ERROR");
        assert_eq!(
            AppError::StrategyNotFound("consignment".into()).code(),
            "STRATEGY_NOT_FOUND"
        );
    }

    #[test]
    fn test_insufficient_inventory_message_carries_amounts() {
        let err = AppError::InsufficientInventory {
            product_id: Uuid::nil(),
            requested: Decimal::from(150),
            available: Decimal::from(100),
        };
        let msg = err.to_string();
        assert!(msg.contains("requested 150"));
        assert!(msg.contains("available 100"));
    }
}
