//! Order types and structures

use crate::types::{Amount, Currency, OrderId, Platform};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrderError {
    #[error("Invalid amount: {field} must be positive, got {value}")]
    NonPositiveAmount { field: &'static str, value: Amount },
    #[error("Missing currency: {0}")]
    MissingCurrency(&'static str),
    #[error("Buy and sell currency are both {0}")]
    SameCurrency(Currency),
    #[error("Order {0} is already filled")]
    AlreadyFilled(OrderId),
}

/// A request to exchange `sell_amount` of `sell_currency` for at least
/// `buy_amount` of `buy_currency`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub sender_pk: String,
    pub receiver_pk: String,
    pub buy_currency: Currency,
    pub sell_currency: Currency,
    pub buy_amount: Amount,
    pub sell_amount: Amount,
    pub platform: Platform,
    /// Client signature; derived child orders carry none
    pub signature: Option<String>,
    /// Set exactly once, together with `counterparty_id`
    pub filled: Option<DateTime<Utc>>,
    pub counterparty_id: Option<OrderId>,
    /// Parent order this one was split from
    pub creator_id: Option<OrderId>,
}

/// Fields of a signed order as submitted by a client
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub sender_pk: String,
    pub receiver_pk: String,
    pub buy_currency: Currency,
    pub sell_currency: Currency,
    pub buy_amount: Amount,
    pub sell_amount: Amount,
    pub platform: Platform,
    pub signature: String,
}

impl Order {
    /// Build a fresh, unfilled order from a submission
    pub fn new(request: NewOrder) -> Result<Self, OrderError> {
        validate(
            &request.buy_currency,
            &request.sell_currency,
            request.buy_amount,
            request.sell_amount,
        )?;

        Ok(Self {
            id: OrderId::new(),
            sender_pk: request.sender_pk,
            receiver_pk: request.receiver_pk,
            buy_currency: request.buy_currency,
            sell_currency: request.sell_currency,
            buy_amount: request.buy_amount,
            sell_amount: request.sell_amount,
            platform: request.platform,
            signature: Some(request.signature),
            filled: None,
            counterparty_id: None,
            creator_id: None,
        })
    }

    /// Resting order for the unmatched remainder of `self`.
    ///
    /// Keeps the parent's parties, currencies and platform.
    pub fn spawn_child(&self, buy_amount: Amount, sell_amount: Amount) -> Result<Self, OrderError> {
        validate(&self.buy_currency, &self.sell_currency, buy_amount, sell_amount)?;

        Ok(Self {
            id: OrderId::new(),
            sender_pk: self.sender_pk.clone(),
            receiver_pk: self.receiver_pk.clone(),
            buy_currency: self.buy_currency.clone(),
            sell_currency: self.sell_currency.clone(),
            buy_amount,
            sell_amount,
            platform: self.platform,
            signature: None,
            filled: None,
            counterparty_id: None,
            creator_id: Some(self.id),
        })
    }

    /// Check if order has been matched
    pub fn is_filled(&self) -> bool {
        self.filled.is_some()
    }

    /// Record the match against `counterparty`. Allowed once.
    pub fn mark_filled(&mut self, counterparty: OrderId, at: DateTime<Utc>) -> Result<(), OrderError> {
        if self.is_filled() {
            return Err(OrderError::AlreadyFilled(self.id));
        }
        self.filled = Some(at);
        self.counterparty_id = Some(counterparty);
        Ok(())
    }
}

fn validate(
    buy_currency: &Currency,
    sell_currency: &Currency,
    buy_amount: Amount,
    sell_amount: Amount,
) -> Result<(), OrderError> {
    if buy_currency.as_str().is_empty() {
        return Err(OrderError::MissingCurrency("buy_currency"));
    }
    if sell_currency.as_str().is_empty() {
        return Err(OrderError::MissingCurrency("sell_currency"));
    }
    if buy_currency == sell_currency {
        return Err(OrderError::SameCurrency(buy_currency.clone()));
    }
    if !buy_amount.is_positive() {
        return Err(OrderError::NonPositiveAmount { field: "buy_amount", value: buy_amount });
    }
    if !sell_amount.is_positive() {
        return Err(OrderError::NonPositiveAmount { field: "sell_amount", value: sell_amount });
    }
    Ok(())
}
