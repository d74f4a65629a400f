//! HTTP API for orders.
//!
//! - `GET  /orders/{order-id}`
//! - `GET  /orders/external/{external-id}`
//! - `POST /orders`
//!
//! Errors are plain text; entities are JSON.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use crate::orders::{Order, OrderInteractor};

/// Body returned for any failed lookup.
pub const NOT_FOUND_BODY: &str = "404: Order could not be found.";

/// Shared handler state.
pub type AppState = Arc<dyn OrderInteractor>;

/// Build the order API router.
pub fn router(orders: AppState) -> Router {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:order_id", get(find_order))
        .route("/orders/external/:external_id", get(find_order_by_external_id))
        .with_state(orders)
        .layer(TraceLayer::new_for_http())
}

fn plain_text(status: StatusCode, body: impl Into<String>) -> Response {
    (status, [(header::CONTENT_TYPE, "text/plain")], body.into()).into_response()
}

/// Get Order
async fn find_order(State(orders): State<AppState>, Path(id): Path<String>) -> Response {
    match orders.find_order(&id).await {
        Ok(order) => Json(order).into_response(),
        Err(e) => {
            debug!(order_id = %id, error = %e, "Order lookup failed");
            plain_text(StatusCode::NOT_FOUND, NOT_FOUND_BODY)
        }
    }
}

/// Get Order by External ID
async fn find_order_by_external_id(
    State(orders): State<AppState>,
    Path(external_id): Path<String>,
) -> Response {
    match orders.find_order_by_external_id(&external_id).await {
        Ok(order) => Json(order).into_response(),
        Err(e) => {
            debug!(external_id = %external_id, error = %e, "Order lookup failed");
            plain_text(StatusCode::NOT_FOUND, NOT_FOUND_BODY)
        }
    }
}

/// Create Order
///
/// The body is parsed here rather than by the `Json` extractor so a
/// malformed body is a 500 carrying the parse error.
async fn create_order(State(orders): State<AppState>, body: Bytes) -> Response {
    let order: Order = match serde_json::from_slice(&body) {
        Ok(order) => order,
        Err(e) => return plain_text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    match orders.create_order(order).await {
        Ok(order) => (StatusCode::CREATED, Json(order)).into_response(),
        Err(e) => {
            error!(error = %e, "Order creation failed");
            plain_text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
