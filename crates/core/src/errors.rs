use thiserror::Error;

use crate::domain::order::{OrderId, OrderStatus};
use crate::domain::product::ProductId;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid order transition from {from:?} to {to:?}")]
    InvalidOrderTransition { from: OrderStatus, to: OrderStatus },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Failures of order create/modify/cancel. Every variant except `Persistence`
/// is user-correctable and must reach the caller untouched.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient stock for product {product_id}: available {available}, requested {requested}")]
    InsufficientStock { product_id: ProductId, available: u32, requested: u32 },
    #[error("edit window expired for order {order_id} ({elapsed_secs}s since creation)")]
    EditWindowExpired { order_id: OrderId, elapsed_secs: i64 },
    #[error("order {0} not found")]
    OrderNotFound(OrderId),
    #[error("product {0} not found")]
    ProductNotFound(ProductId),
    #[error("order {0} is cancelled")]
    OrderCancelled(OrderId),
    #[error("quantity must be greater than zero")]
    InvalidQuantity,
    #[error("ledger persistence failure: {0}")]
    Persistence(String),
}

impl LedgerError {
    pub fn is_user_correctable(&self) -> bool {
        !matches!(self, Self::Persistence(_))
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested record does not exist.",
            Self::Conflict { .. } => {
                "The request conflicts with the current state of the order or stock."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let unassigned = || "unassigned".to_owned();
        match value {
            ApplicationError::Domain(_) => Self::BadRequest {
                message: "domain validation failed".to_owned(),
                correlation_id: unassigned(),
            },
            ApplicationError::Ledger(error) => match error {
                LedgerError::OrderNotFound(_) | LedgerError::ProductNotFound(_) => {
                    Self::NotFound { message: error.to_string(), correlation_id: unassigned() }
                }
                LedgerError::InsufficientStock { .. }
                | LedgerError::EditWindowExpired { .. }
                | LedgerError::OrderCancelled(_) => {
                    Self::Conflict { message: error.to_string(), correlation_id: unassigned() }
                }
                LedgerError::InvalidQuantity => {
                    Self::BadRequest { message: error.to_string(), correlation_id: unassigned() }
                }
                LedgerError::Persistence(message) => {
                    Self::ServiceUnavailable { message, correlation_id: unassigned() }
                }
            },
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id: unassigned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: unassigned() }
            }
        }
    }
}
