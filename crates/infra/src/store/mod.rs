//! Persistence seams for orders, payments and the read-only collaborators
//! (catalog, user directory).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use fmshop_core::{ExpectedVersion, Money, OrderId, ProductId, UserId};
use fmshop_orders::{Order, ProductSnapshot};
use fmshop_payments::{Payment, Provider};

pub mod in_memory;
pub mod postgres;

pub use in_memory::{InMemoryCatalog, InMemorySettlementStore, InMemoryUserDirectory};
pub use postgres::PostgresStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Optimistic version check failed; reload and retry.
    #[error("concurrency conflict: {0}")]
    Conflict(String),

    #[error("duplicate record: {0}")]
    Duplicate(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// Catalog entry as seen at order-creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    pub unit: String,
}

impl Product {
    pub fn snapshot(&self) -> ProductSnapshot {
        ProductSnapshot {
            product_id: self.id,
            name: self.name.clone(),
            price: self.price,
            unit: self.unit.clone(),
        }
    }
}

/// Identity data used for shipping defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub location: Option<String>,
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, id: UserId) -> Result<Option<UserProfile>, StoreError>;
}

/// Durable orders and payments.
///
/// `save_order` and `save_settlement` are guarded by the order's version as
/// loaded; a concurrent writer turns into [`StoreError::Conflict`].
#[async_trait]
pub trait SettlementStore: Send + Sync {
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError>;

    async fn save_order(&self, order: &Order, expected: ExpectedVersion) -> Result<(), StoreError>;

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, StoreError>;

    /// Newest first.
    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>, StoreError>;

    /// Orders in `pending` or `awaiting_payment` last touched before
    /// `cutoff`, oldest first.
    async fn stale_open_orders(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>, StoreError>;

    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError>;

    async fn save_payment(&self, payment: &Payment) -> Result<(), StoreError>;

    async fn payment_by_ref(
        &self,
        provider: Provider,
        provider_ref: &str,
    ) -> Result<Option<Payment>, StoreError>;

    /// Oldest attempt first.
    async fn payments_for_order(&self, order_id: OrderId) -> Result<Vec<Payment>, StoreError>;

    /// Write an order transition together with its payments as one unit.
    async fn save_settlement(
        &self,
        order: &Order,
        expected: ExpectedVersion,
        payments: &[Payment],
    ) -> Result<(), StoreError>;
}
