use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use swapbook_matching_engine::{Amount, Currency, NewOrder, Order, OrderId, Platform};

/// Top-level fields every trade request must carry
pub const REQUEST_FIELDS: [&str; 2] = ["sig", "payload"];

/// Fields every signed payload must carry
pub const PAYLOAD_COLUMNS: [&str; 7] = [
    "sender_pk",
    "receiver_pk",
    "buy_currency",
    "sell_currency",
    "buy_amount",
    "sell_amount",
    "platform",
];

/// POST /trade body
#[derive(Debug, Clone, Deserialize)]
pub struct TradeRequest {
    pub sig: String,
    pub payload: OrderPayload,
}

/// The signed part of a trade request
#[derive(Debug, Clone, Deserialize)]
pub struct OrderPayload {
    pub sender_pk: String,
    pub receiver_pk: String,
    pub buy_currency: Currency,
    pub sell_currency: Currency,
    pub buy_amount: Amount,
    pub sell_amount: Amount,
    pub platform: Platform,
}

impl TradeRequest {
    pub fn into_new_order(self) -> NewOrder {
        NewOrder {
            sender_pk: self.payload.sender_pk,
            receiver_pk: self.payload.receiver_pk,
            buy_currency: self.payload.buy_currency,
            sell_currency: self.payload.sell_currency,
            buy_amount: self.payload.buy_amount,
            sell_amount: self.payload.sell_amount,
            platform: self.payload.platform,
            signature: self.sig,
        }
    }
}

/// One row of GET /order_book
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookEntry {
    pub id: OrderId,
    pub sender_pk: String,
    pub receiver_pk: String,
    pub buy_currency: Currency,
    pub sell_currency: Currency,
    /// Amounts go out as JSON numbers
    #[serde(with = "rust_decimal::serde::float")]
    pub buy_amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub sell_amount: Decimal,
    pub signature: Option<String>,
    pub platform: Platform,
    pub filled: Option<DateTime<Utc>>,
    pub counterparty_id: Option<OrderId>,
    pub creator_id: Option<OrderId>,
}

impl From<Order> for OrderBookEntry {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            sender_pk: order.sender_pk,
            receiver_pk: order.receiver_pk,
            buy_currency: order.buy_currency,
            sell_currency: order.sell_currency,
            buy_amount: order.buy_amount.as_decimal(),
            sell_amount: order.sell_amount.as_decimal(),
            signature: order.signature,
            platform: order.platform,
            filled: order.filled,
            counterparty_id: order.counterparty_id,
            creator_id: order.creator_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookResponse {
    pub data: Vec<OrderBookEntry>,
}
