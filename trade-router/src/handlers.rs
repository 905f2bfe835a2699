use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use std::sync::Arc;
use swapbook_matching_engine::{Order, OrderError, Platform};
use thiserror::Error;

use crate::auth::SignatureVerifier;
use crate::message::signed_message;
use crate::state::AppState;
use crate::types::{OrderBookEntry, OrderBookResponse, TradeRequest, PAYLOAD_COLUMNS, REQUEST_FIELDS};

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/trade", post(trade))
        .route("/order_book", get(order_book))
        .with_state(state)
}

/// Why a trade request never reached the engine
#[derive(Error, Debug)]
pub enum TradeRejection {
    #[error("{0} not received by Trade")]
    MissingField(&'static str),
    #[error("Malformed request: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Invalid order: {0}")]
    InvalidOrder(#[from] OrderError),
    #[error("Signature check failed for {0} order")]
    BadSignature(Platform),
}

/// GET /health
pub async fn health() -> Json<Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Validate a raw request and turn it into an order ready for matching
pub fn parse_trade(content: &Value, verifier: &dyn SignatureVerifier) -> Result<Order, TradeRejection> {
    for field in REQUEST_FIELDS {
        if content.get(field).is_none() {
            return Err(TradeRejection::MissingField(field));
        }
    }
    let payload = &content["payload"];
    for column in PAYLOAD_COLUMNS {
        if payload.get(column).is_none() {
            return Err(TradeRejection::MissingField(column));
        }
    }

    let request: TradeRequest = serde_json::from_value(content.clone())?;

    let message = signed_message(payload)?;
    let platform = request.payload.platform;
    if !verifier.verify(platform, message.as_bytes(), &request.sig, &request.payload.sender_pk) {
        return Err(TradeRejection::BadSignature(platform));
    }

    Ok(Order::new(request.into_new_order())?)
}

/// POST /trade - 验证签名并撮合
pub async fn trade(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Json<bool> {
    let content = match body {
        Ok(Json(content)) => content,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "Unreadable trade request");
            state.audit(rejection.body_text());
            return Json(false);
        }
    };

    let order = match parse_trade(&content, state.verifier.as_ref()) {
        Ok(order) => order,
        Err(e) => {
            tracing::warn!(error = %e, "Trade rejected");
            state.audit(content.to_string());
            return Json(false);
        }
    };

    let engine = state.engine.clone();
    match tokio::task::spawn_blocking(move || engine.insert_and_match(order)).await {
        Ok(Ok(outcome)) => {
            tracing::info!(
                order = %outcome.order_id,
                fills = outcome.fills.len(),
                resting = ?outcome.resting,
                "Trade accepted"
            );
            Json(true)
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Matching failed");
            state.audit(serde_json::json!({ "error": e.to_string(), "request": content }).to_string());
            Json(false)
        }
        Err(e) => {
            tracing::error!(error = %e, "Matching task panicked");
            state.audit(serde_json::json!({ "error": e.to_string(), "request": content }).to_string());
            Json(false)
        }
    }
}

/// GET /order_book - 所有订单
pub async fn order_book(
    State(state): State<Arc<AppState>>,
) -> Result<Json<OrderBookResponse>, (StatusCode, Json<Value>)> {
    match state.engine.orders() {
        Ok(orders) => Ok(Json(OrderBookResponse {
            data: orders.into_iter().map(OrderBookEntry::from).collect(),
        })),
        Err(e) => {
            tracing::error!(error = %e, "Failed to read order book");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tests::{algorand_sign, algorand_signer};
    use crate::auth::{algorand_address, PlatformVerifier};
    use crate::db::Database;
    use axum::body::Body;
    use axum::http::Request;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use swapbook_matching_engine::{
        EngineConfig, Fill, LogEntry, OrderBook, OrderFilter, OrderId, OrderRepository, RepositoryError,
    };
    use tower::ServiceExt;

    struct AcceptAll;

    impl SignatureVerifier for AcceptAll {
        fn verify(&self, _: Platform, _: &[u8], _: &str, _: &str) -> bool {
            true
        }
    }

    fn state_with(verifier: Arc<dyn SignatureVerifier>) -> (Arc<OrderBook>, Arc<AppState>) {
        let book = Arc::new(OrderBook::new());
        let state = AppState::new(book.clone(), verifier, EngineConfig::default());
        (book, Arc::new(state))
    }

    fn payload(buy: &str, sell: &str, buy_amount: u32, sell_amount: u32) -> Value {
        json!({
            "sender_pk": "sender",
            "receiver_pk": "receiver",
            "buy_currency": buy,
            "sell_currency": sell,
            "buy_amount": buy_amount,
            "sell_amount": sell_amount,
            "platform": "Ethereum",
        })
    }

    async fn post_trade(state: Arc<AppState>, body: String) -> bool {
        let response = create_router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/trade")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn get_order_book_json(state: Arc<AppState>) -> Value {
        let response = create_router(state)
            .oneshot(Request::builder().uri("/order_book").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn get_order_book(state: Arc<AppState>) -> OrderBookResponse {
        serde_json::from_value(get_order_book_json(state).await).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let response = health().await;
        assert_eq!(response.0["status"], "ok");
    }

    #[tokio::test]
    async fn test_missing_fields_are_logged() {
        let (book, state) = state_with(Arc::new(AcceptAll));

        let no_sig = json!({ "payload": payload("A", "B", 1, 1) });
        assert!(!post_trade(state.clone(), no_sig.to_string()).await);

        let mut partial = payload("A", "B", 1, 1);
        partial.as_object_mut().unwrap().remove("platform");
        let no_platform = json!({ "sig": "0x", "payload": partial });
        assert!(!post_trade(state.clone(), no_platform.to_string()).await);

        let logs = book.logs().unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(serde_json::from_str::<Value>(&logs[0].message).unwrap(), no_sig);
        assert!(book.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_invalid_input_is_rejected() {
        let (book, state) = state_with(Arc::new(AcceptAll));

        assert!(!post_trade(state.clone(), "not json".to_string()).await);

        let zero = json!({ "sig": "0x", "payload": payload("A", "B", 0, 1) });
        assert!(!post_trade(state.clone(), zero.to_string()).await);

        let mut unknown = payload("A", "B", 1, 1);
        unknown["platform"] = json!("Solana");
        let unknown = json!({ "sig": "0x", "payload": unknown });
        assert!(!post_trade(state.clone(), unknown.to_string()).await);

        assert_eq!(book.logs().unwrap().len(), 3);
        assert!(book.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_bad_signature_is_rejected() {
        let (book, state) = state_with(Arc::new(PlatformVerifier));

        let request = json!({ "sig": "0xdeadbeef", "payload": payload("A", "B", 1, 1) });
        assert!(!post_trade(state, request.to_string()).await);

        assert_eq!(book.logs().unwrap().len(), 1);
        assert!(book.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_matching_orders_end_to_end() {
        let (book, state) = state_with(Arc::new(AcceptAll));

        let order1 = json!({ "sig": "0x01", "payload": payload("CUR_B", "CUR_A", 10, 10) });
        let order2 = json!({ "sig": "0x02", "payload": payload("CUR_A", "CUR_B", 10, 10) });
        assert!(post_trade(state.clone(), order1.to_string()).await);
        assert!(post_trade(state.clone(), order2.to_string()).await);

        let listed = get_order_book(state).await.data;
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|o| o.filled.is_some() && o.creator_id.is_none()));
        assert_eq!(listed[0].counterparty_id, Some(listed[1].id));
        assert_eq!(listed[1].counterparty_id, Some(listed[0].id));
        assert_eq!(listed[0].signature.as_deref(), Some("0x01"));
        assert_eq!(listed[0].sell_amount, dec!(10));
        assert!(book.logs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_order_book_amounts_are_numbers() {
        let (_, state) = state_with(Arc::new(AcceptAll));
        let mut fractional = payload("CUR_B", "CUR_A", 10, 4);
        fractional["sell_amount"] = json!(2.5);
        let request = json!({ "sig": "0x01", "payload": fractional });
        assert!(post_trade(state.clone(), request.to_string()).await);

        let listed = get_order_book_json(state).await;
        let row = &listed["data"][0];
        assert_eq!(row["buy_amount"], json!(10.0));
        assert_eq!(row["sell_amount"], json!(2.5));
    }

    #[tokio::test]
    async fn test_signed_algorand_order_with_sqlite_book() {
        let db: Arc<dyn OrderRepository> = Arc::new(Database::in_memory().unwrap());
        let state = Arc::new(AppState::new(db.clone(), Arc::new(PlatformVerifier), EngineConfig::default()));

        let signer = algorand_signer();
        let address = algorand_address(&signer.verifying_key());
        let signed = |buy: &str, sell: &str, buy_amount: u32, sell_amount: u32| {
            let body = json!({
                "sender_pk": address,
                "receiver_pk": "0x0000000000000000000000000000000000000001",
                "buy_currency": buy,
                "sell_currency": sell,
                "buy_amount": buy_amount,
                "sell_amount": sell_amount,
                "platform": "Algorand",
            });
            let sig = algorand_sign(&signer, signed_message(&body).unwrap().as_bytes());
            json!({ "sig": sig, "payload": body }).to_string()
        };

        assert!(post_trade(state.clone(), signed("Ethereum", "Algorand", 200, 100)).await);
        assert!(post_trade(state.clone(), signed("Algorand", "Ethereum", 25, 50)).await);

        let listed = get_order_book(state).await.data;
        assert_eq!(listed.len(), 3);
        let child = &listed[2];
        assert_eq!(child.creator_id, Some(listed[0].id));
        assert_eq!(child.buy_amount, dec!(150));
        assert_eq!(child.sell_amount, dec!(75));
        assert!(child.filled.is_none());
        assert!(child.signature.is_none());
        assert!(db.logs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_accepts_payload_signed_with_python_json_dumps() {
        let (book, state) = state_with(Arc::new(PlatformVerifier));
        let signer = algorand_signer();
        let address = algorand_address(&signer.verifying_key());

        // Exactly what json.dumps(payload) produces client side
        let payload = format!(
            r#"{{"sender_pk": "{}", "receiver_pk": "r", "buy_currency": "Ethereum", "sell_currency": "Algorand", "buy_amount": 10, "sell_amount": 2.5, "platform": "Algorand"}}"#,
            address
        );
        let sig = algorand_sign(&signer, payload.as_bytes());
        // Sent compact, as requests or fetch would
        let compact: Value = serde_json::from_str(&payload).unwrap();
        let body = json!({ "sig": sig, "payload": compact }).to_string();

        assert!(post_trade(state, body).await);
        assert!(book.logs().unwrap().is_empty());
        let stored = book.scan(OrderFilter::All).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].sell_amount.as_decimal(), dec!(2.5));
    }

    /// Repository whose fills always lose the race to another writer
    struct RacingBook(OrderBook);

    impl OrderRepository for RacingBook {
        fn insert(&self, order: &Order) -> Result<(), RepositoryError> {
            self.0.insert(order)
        }
        fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
            self.0.get(id)
        }
        fn scan(&self, filter: OrderFilter) -> Result<Vec<Order>, RepositoryError> {
            self.0.scan(filter)
        }
        fn record_fill(&self, fill: &Fill) -> Result<(), RepositoryError> {
            Err(RepositoryError::Conflict(fill.maker.id))
        }
        fn append_log(&self, entry: &LogEntry) -> Result<(), RepositoryError> {
            self.0.append_log(entry)
        }
        fn logs(&self) -> Result<Vec<LogEntry>, RepositoryError> {
            self.0.logs()
        }
    }

    #[tokio::test]
    async fn test_conflicting_fills_leave_accepted_order_resting() {
        let book = Arc::new(RacingBook(OrderBook::new()));
        let state = Arc::new(AppState::new(book.clone(), Arc::new(AcceptAll), EngineConfig::default()));

        let resting = json!({ "sig": "0x01", "payload": payload("CUR_B", "CUR_A", 10, 10) });
        let incoming = json!({ "sig": "0x02", "payload": payload("CUR_A", "CUR_B", 10, 10) });
        assert!(post_trade(state.clone(), resting.to_string()).await);
        assert!(post_trade(state.clone(), incoming.to_string()).await);

        // Reported accepted and live as an unfilled order, with nothing audited
        let listed = get_order_book(state).await.data;
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|o| o.filled.is_none() && o.counterparty_id.is_none()));
        assert_eq!(listed[1].signature.as_deref(), Some("0x02"));
        assert!(book.logs().unwrap().is_empty());
    }
}
