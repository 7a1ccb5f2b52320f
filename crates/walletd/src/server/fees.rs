use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use walletd_core::fees::FeeEstimate;
use walletd_core::Network;

use super::SharedState;

#[derive(Deserialize)]
pub(super) struct FeeQuery {
    network: Option<Network>,
}

/// Never fails: the estimator degrades to stale cache or fixed rates.
pub(super) async fn get_fees(State(state): State<SharedState>, Query(query): Query<FeeQuery>) -> Json<FeeEstimate> {
    let network = query.network.unwrap_or(state.default_network);
    Json(state.wallet.fees.estimate(network).await)
}
