mod address;
mod balance;
mod error;
mod fees;
mod health;
mod tx;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::routing::{any, get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};

use walletd_core::{Network, Wallet};

// ==============================================================================
// Application State
// ==============================================================================

pub struct AppState {
    pub wallet: Wallet,
    /// Used when a request does not name a network.
    pub default_network: Network,
    /// Used when a lookup does not pass `offline`.
    pub offline_default: bool,
}

type SharedState = Arc<AppState>;

// ==============================================================================
// Router
// ==============================================================================

/// Raw transactions are bounded by block weight, so 2 MB of JSON covers any
/// standard transaction in hex.
const TX_BODY_LIMIT: usize = 2 * 1024 * 1024;

pub fn build_router(state: AppState, origin: HeaderValue) -> Router {
    // Reflect the origin only on an exact match; anything else gets no
    // CORS headers at all.
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |request_origin: &HeaderValue, _| *request_origin == origin,
        ))
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    let shared = Arc::new(state);

    let lookup_api = Router::new()
        .route("/api/v1/health", get(health::health))
        .route("/api/v1/balance/{address}", get(balance::get_balance))
        .route("/api/v1/utxo/{address}", get(balance::get_utxos))
        .route("/api/v1/tx/{txid}/status", get(tx::get_status))
        .route("/api/v1/fees", get(fees::get_fees))
        .route("/api/v1/address", post(address::derive));

    let tx_api = Router::new()
        .route("/api/v1/tx/build", post(tx::build_transaction))
        .route("/api/v1/tx/validate", post(tx::validate_transaction))
        .route("/api/v1/tx/broadcast", post(tx::broadcast_transaction))
        .layer(DefaultBodyLimit::max(TX_BODY_LIMIT));

    Router::new()
        .merge(lookup_api)
        .merge(tx_api)
        .route("/api", any(api_not_found))
        .route("/api/{*path}", any(api_not_found))
        .layer(cors)
        .with_state(shared)
}

async fn api_not_found() -> error::AppError {
    error::AppError::NotFound("API route not found".to_string())
}
