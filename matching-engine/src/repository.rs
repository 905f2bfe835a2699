//! Storage contract for orders and the audit log

use crate::fill::Fill;
use crate::order::Order;
use crate::types::OrderId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Order already exists: {0}")]
    Duplicate(OrderId),
    #[error("Order not found: {0}")]
    NotFound(OrderId),
    #[error("Write conflict: order {0} is no longer unfilled")]
    Conflict(OrderId),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
    #[error("Lock error")]
    Poisoned,
    #[error("Storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Which orders a scan returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderFilter {
    All,
    Unfilled,
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        match self {
            OrderFilter::All => true,
            OrderFilter::Unfilled => !order.is_filled(),
        }
    }
}

/// Immutable audit record of a rejected submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub logtime: DateTime<Utc>,
    pub message: String,
}

impl LogEntry {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            logtime: Utc::now(),
            message: message.into(),
        }
    }
}

/// Durable store of orders and audit entries.
///
/// Scans return orders in insertion order. `record_fill` is all-or-nothing:
/// if either side of the fill is already filled in the store it returns
/// [`RepositoryError::Conflict`] and applies nothing.
pub trait OrderRepository: Send + Sync {
    fn insert(&self, order: &Order) -> Result<(), RepositoryError>;

    fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError>;

    fn scan(&self, filter: OrderFilter) -> Result<Vec<Order>, RepositoryError>;

    fn record_fill(&self, fill: &Fill) -> Result<(), RepositoryError>;

    fn append_log(&self, entry: &LogEntry) -> Result<(), RepositoryError>;

    fn logs(&self) -> Result<Vec<LogEntry>, RepositoryError>;
}
