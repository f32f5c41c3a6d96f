use axum::{
    Json, Router, debug_handler,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;

use crate::{
    engine::OrderRequest,
    errors::EngineError,
    orders::{Order, OrderStatus, OrderType, Side},
    state::AppState,
    trade::Trade,
};

#[derive(serde::Deserialize)]
pub struct NewOrder {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Option<u64>,
    pub quantity: u64,
}

/// Response to a placed order: final state plus the trades it produced.
#[derive(serde::Serialize, serde::Deserialize)]
pub struct OrderAck {
    pub order_id: u64,
    pub status: OrderStatus,
    pub remaining_quantity: u64,
    pub trades: Vec<Trade>,
}

type ApiError = (StatusCode, Json<Value>);

fn reject(err: EngineError) -> ApiError {
    let status = match &err {
        EngineError::InvalidOrder(_) => StatusCode::BAD_REQUEST,
        EngineError::OrderNotFound(_) => StatusCode::NOT_FOUND,
        EngineError::OrderNotOpen(_) => StatusCode::CONFLICT,
        EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": err.to_string() })))
}

#[debug_handler]
pub async fn create_order(
    State(state): State<AppState>,
    Json(payload): Json<NewOrder>,
) -> Result<Json<OrderAck>, ApiError> {
    let placed = state
        .engine
        .place(OrderRequest {
            symbol: payload.symbol,
            side: payload.side,
            order_type: payload.order_type,
            price: payload.price,
            quantity: payload.quantity,
        })
        .map_err(reject)?;

    Ok(Json(OrderAck {
        order_id: placed.order.id,
        status: placed.order.status,
        remaining_quantity: placed.order.remaining_quantity,
        trades: placed.trades,
    }))
}

#[debug_handler]
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<u64>,
) -> Result<Json<Value>, ApiError> {
    state.engine.cancel(order_id).map_err(reject)?;
    Ok(Json(json!({ "message": "order canceled" })))
}

#[debug_handler]
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<u64>,
) -> Result<Json<Order>, ApiError> {
    let order = state.engine.order(order_id).map_err(reject)?;
    Ok(Json(order))
}

#[debug_handler]
pub async fn get_book(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<Vec<Order>>, ApiError> {
    let orders = state.engine.open_orders(&symbol).map_err(reject)?;
    Ok(Json(orders))
}

#[debug_handler]
pub async fn get_trades(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<Vec<Trade>>, ApiError> {
    let trades = state.engine.trades(&symbol).map_err(reject)?;
    Ok(Json(trades))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/{order_id}", delete(cancel_order).get(get_order))
        .route("/book/{symbol}", get(get_book))
        .route("/trades/{symbol}", get(get_trades))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
