//! Matching Engine - inserts orders and fills them against the resting book

use crate::fill::{self, Fill, FillError};
use crate::order::Order;
use crate::repository::{OrderFilter, OrderRepository, RepositoryError};
use crate::types::OrderId;
use chrono::Utc;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("Fill error: {0}")]
    Arithmetic(#[from] FillError),
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Tuning knobs for the matching loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Consecutive write conflicts tolerated before aborting a submission
    pub max_conflict_retries: u32,
    /// Upper bound on fills produced by one submission
    pub max_fills_per_order: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 3,
            max_fills_per_order: 10_000,
        }
    }
}

/// Everything one `insert_and_match` call did
#[derive(Debug, Clone, Serialize)]
pub struct MatchOutcome {
    /// Id of the submitted order
    pub order_id: OrderId,
    /// Fills in the order they were committed
    pub fills: Vec<Fill>,
    /// Work item left resting in the book, if any
    pub resting: Option<OrderId>,
}

impl MatchOutcome {
    pub fn is_matched(&self) -> bool {
        !self.fills.is_empty()
    }
}

/// The main matching engine
pub struct MatchingEngine {
    book: Arc<dyn OrderRepository>,
    /// Serializes scan-then-write sequences
    write_lock: Mutex<()>,
    config: EngineConfig,
}

impl MatchingEngine {
    pub fn new(book: Arc<dyn OrderRepository>, config: EngineConfig) -> Self {
        Self {
            book,
            write_lock: Mutex::new(()),
            config,
        }
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    /// Underlying repository
    pub fn book(&self) -> &Arc<dyn OrderRepository> {
        &self.book
    }

    /// Persist `incoming` and fill it against resting orders.
    ///
    /// Each iteration takes the first compatible resting order in repository
    /// order, commits the fill atomically and continues with the child order
    /// if one was produced. Stops when nothing compatible is left, or when
    /// fills keep conflicting past `max_conflict_retries`; the work item then
    /// stays resting with every earlier fill kept.
    pub fn insert_and_match(&self, incoming: Order) -> Result<MatchOutcome, EngineError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| EngineError::InternalError("Lock error".to_string()))?;

        let order_id = incoming.id;
        self.book.insert(&incoming)?;
        tracing::debug!(order = %order_id, "Order inserted");

        let mut fills = Vec::new();
        let mut current = Some(incoming);
        let mut conflicts = 0u32;

        while let Some(work) = current.take() {
            if fills.len() >= self.config.max_fills_per_order {
                tracing::warn!(order = %order_id, fills = fills.len(), "Fill limit reached, leaving remainder resting");
                current = Some(work);
                break;
            }

            let candidates = self.book.scan(OrderFilter::Unfilled)?;
            tracing::debug!(order = %work.id, candidates = candidates.len(), "Scanning book");

            let Some(existing) = candidates.iter().find(|existing| fill::is_compatible(&work, existing)) else {
                current = Some(work);
                break;
            };

            let fill = fill::resolve(&work, existing, Utc::now())?;
            match self.book.record_fill(&fill) {
                Ok(()) => {
                    conflicts = 0;
                    tracing::info!(
                        taker = %fill.taker.id,
                        maker = %fill.maker.id,
                        child = ?fill.child.as_ref().map(|c| c.id),
                        "Orders filled"
                    );
                    current = fill.child.clone();
                    fills.push(fill);
                }
                Err(RepositoryError::Conflict(id)) => {
                    conflicts += 1;
                    // Someone else may have filled the work item itself
                    current = self.book.get(work.id)?.filter(|o| !o.is_filled());
                    if conflicts > self.config.max_conflict_retries {
                        tracing::warn!(
                            order = %work.id,
                            attempts = conflicts,
                            "Fills keep conflicting, leaving order resting"
                        );
                        break;
                    }
                    tracing::warn!(order = %work.id, conflicting = %id, attempt = conflicts, "Fill conflicted, rescanning");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(MatchOutcome {
            order_id,
            fills,
            resting: current.map(|o| o.id),
        })
    }

    /// Every order in the book, in repository order
    pub fn orders(&self) -> Result<Vec<Order>, EngineError> {
        Ok(self.book.scan(OrderFilter::All)?)
    }
}
