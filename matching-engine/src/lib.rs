//! Swapbook - Matching Engine
//!
//! Matches signed swap orders between two settlement platforms. Every new
//! order is persisted, then filled against the first compatible resting
//! order; partial fills leave a child order resting in the book.

pub mod engine;
pub mod fill;
pub mod order;
pub mod orderbook;
pub mod repository;
pub mod types;

pub use engine::{EngineConfig, EngineError, MatchOutcome, MatchingEngine};
pub use fill::{Fill, FillError};
pub use order::{NewOrder, Order, OrderError};
pub use orderbook::OrderBook;
pub use repository::{LogEntry, OrderFilter, OrderRepository, RepositoryError};
pub use types::*;
