use crate::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

// ── Error helper ─────────────────────────────────────────────────────────────

struct ApiError(anyhow::Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.0.to_string() });
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(e: E) -> Self {
        ApiError(e.into())
    }
}

// ── Router ───────────────────────────────────────────────────────────────────

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/block_externalized", post(block_externalized))
        .route("/preimage_received", post(preimage_received))
        .route("/transaction_received", post(transaction_received))
        .route("/block_height", get(block_height))
        .layer(cors)
        .with_state(state)
}

// ── Push endpoints ───────────────────────────────────────────────────────────
//
// Acknowledge on enqueue. The write happens asynchronously on the worker,
// in arrival order; a processing failure is the worker's to log.

async fn block_externalized(State(s): State<AppState>, Json(raw): Json<Value>) -> StatusCode {
    s.queue.receive_block(raw);
    StatusCode::OK
}

async fn preimage_received(State(s): State<AppState>, Json(raw): Json<Value>) -> StatusCode {
    s.queue.receive_preimage(raw);
    StatusCode::OK
}

async fn transaction_received(State(s): State<AppState>, Json(raw): Json<Value>) -> StatusCode {
    s.queue.receive_transaction(raw);
    StatusCode::OK
}

// ── Diagnostics ──────────────────────────────────────────────────────────────

async fn block_height(State(s): State<AppState>) -> Result<Json<Value>, ApiError> {
    let expected = s.store.lock().await.expected_height()?;
    Ok(Json(json!({ "expected_height": expected })))
}
