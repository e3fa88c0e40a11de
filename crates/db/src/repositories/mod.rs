use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use ventix_core::domain::conversation::ConversationMessage;
use ventix_core::domain::intent::ProductFilters;
use ventix_core::domain::order::{NewOrder, Order, OrderId};
use ventix_core::domain::product::{Product, ProductId};
use ventix_core::errors::{ApplicationError, LedgerError};

pub mod conversation;
pub mod memory;
pub mod order;
pub mod product;

pub use conversation::SqlConversationRepository;
pub use memory::{InMemoryCommerceStore, InMemoryConversationRepository};
pub use order::{SqlOrderLedger, SqlOrderRepository};
pub use product::SqlProductRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for LedgerError {
    fn from(value: RepositoryError) -> Self {
        LedgerError::Persistence(value.to_string())
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        ApplicationError::Persistence(value.to_string())
    }
}

#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn find_by_id(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError>;
    async fn save(&self, product: Product) -> Result<(), RepositoryError>;
    async fn list(&self) -> Result<Vec<Product>, RepositoryError>;
    /// In-stock products matching every present filter, most stock first.
    async fn search(
        &self,
        filters: &ProductFilters,
        limit: usize,
    ) -> Result<Vec<Product>, RepositoryError>;
    async fn list_low_stock(&self, threshold: u32) -> Result<Vec<Product>, RepositoryError>;
    async fn stock_of(&self, id: &ProductId) -> Result<Option<u32>, RepositoryError>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError>;
    /// Newest first.
    async fn list(&self, limit: usize) -> Result<Vec<Order>, RepositoryError>;
    /// Orders of `user_id` created at or after `since`, newest first.
    async fn list_recent_for_user(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>, RepositoryError>;
    async fn latest_pending_for_user(&self, user_id: &str)
        -> Result<Option<Order>, RepositoryError>;
}

/// Atomic stock-reserving order operations.
///
/// Each call runs as one read-modify-write unit against the product stock
/// counter and the order row; on error nothing is changed.
#[async_trait]
pub trait OrderLedger: Send + Sync {
    async fn create(&self, order: NewOrder) -> Result<Order, LedgerError>;
    async fn modify(&self, id: &OrderId, new_quantity: u32) -> Result<Order, LedgerError>;
    /// Idempotent: cancelling a cancelled order returns it unchanged.
    async fn cancel(&self, id: &OrderId) -> Result<Order, LedgerError>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// The last `limit` messages of `user_id`, oldest first.
    async fn load_recent(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>, RepositoryError>;
    async fn append(
        &self,
        user_id: &str,
        message: &ConversationMessage,
    ) -> Result<(), RepositoryError>;
    async fn load_shown_products(&self, user_id: &str) -> Result<Vec<ProductId>, RepositoryError>;
    async fn save_shown_products(
        &self,
        user_id: &str,
        products: &[ProductId],
        updated_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}
