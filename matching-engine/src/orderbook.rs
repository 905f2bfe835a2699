//! In-memory order book backed by an insertion-ordered map

use crate::fill::Fill;
use crate::order::Order;
use crate::repository::{LogEntry, OrderFilter, OrderRepository, RepositoryError};
use crate::types::OrderId;
use indexmap::IndexMap;
use std::sync::RwLock;

/// Non-durable [`OrderRepository`]
#[derive(Debug, Default)]
pub struct OrderBook {
    /// Orders keyed by id, in insertion order
    orders: RwLock<IndexMap<OrderId, Order>>,
    log: RwLock<Vec<LogEntry>>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of orders in the book, filled or not
    pub fn len(&self) -> Result<usize, RepositoryError> {
        let orders = self.orders.read().map_err(|_| RepositoryError::Poisoned)?;
        Ok(orders.len())
    }

    pub fn is_empty(&self) -> Result<bool, RepositoryError> {
        Ok(self.len()? == 0)
    }
}

impl OrderRepository for OrderBook {
    fn insert(&self, order: &Order) -> Result<(), RepositoryError> {
        let mut orders = self.orders.write().map_err(|_| RepositoryError::Poisoned)?;
        if orders.contains_key(&order.id) {
            return Err(RepositoryError::Duplicate(order.id));
        }
        orders.insert(order.id, order.clone());
        Ok(())
    }

    fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let orders = self.orders.read().map_err(|_| RepositoryError::Poisoned)?;
        Ok(orders.get(&id).cloned())
    }

    fn scan(&self, filter: OrderFilter) -> Result<Vec<Order>, RepositoryError> {
        let orders = self.orders.read().map_err(|_| RepositoryError::Poisoned)?;
        Ok(orders.values().filter(|o| filter.matches(o)).cloned().collect())
    }

    fn record_fill(&self, fill: &Fill) -> Result<(), RepositoryError> {
        let mut orders = self.orders.write().map_err(|_| RepositoryError::Poisoned)?;

        // Validate everything before touching the map
        for side in [&fill.taker, &fill.maker] {
            match orders.get(&side.id) {
                None => return Err(RepositoryError::NotFound(side.id)),
                Some(stored) if stored.is_filled() => return Err(RepositoryError::Conflict(side.id)),
                Some(_) => {}
            }
        }
        if let Some(child) = &fill.child {
            if orders.contains_key(&child.id) {
                return Err(RepositoryError::Duplicate(child.id));
            }
        }

        orders.insert(fill.taker.id, fill.taker.clone());
        orders.insert(fill.maker.id, fill.maker.clone());
        if let Some(child) = &fill.child {
            orders.insert(child.id, child.clone());
        }
        Ok(())
    }

    fn append_log(&self, entry: &LogEntry) -> Result<(), RepositoryError> {
        let mut log = self.log.write().map_err(|_| RepositoryError::Poisoned)?;
        log.push(entry.clone());
        Ok(())
    }

    fn logs(&self) -> Result<Vec<LogEntry>, RepositoryError> {
        let log = self.log.read().map_err(|_| RepositoryError::Poisoned)?;
        Ok(log.clone())
    }
}
