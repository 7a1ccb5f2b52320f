use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use walletd_core::{Balance, Network, UtxoSet};

use super::error::AppError;
use super::SharedState;

// ==============================================================================
// DTOs
// ==============================================================================

#[derive(Deserialize)]
pub(super) struct LookupQuery {
    network: Option<Network>,
    offline: Option<bool>,
    #[serde(default)]
    force_refresh: bool,
}

#[derive(Serialize)]
pub(super) struct UtxoResponse {
    #[serde(flatten)]
    set: UtxoSet,
    count: usize,
    total_value: u64,
}

// ==============================================================================
// Handlers
// ==============================================================================

pub(super) async fn get_balance(
    State(state): State<SharedState>,
    Path(address): Path<String>,
    Query(query): Query<LookupQuery>,
) -> Result<Json<Balance>, AppError> {
    let network = query.network.unwrap_or(state.default_network);
    let offline = query.offline.unwrap_or(state.offline_default);
    let balance = state.wallet.reader.balance(&address, network, offline).await?;
    Ok(Json(balance))
}

pub(super) async fn get_utxos(
    State(state): State<SharedState>,
    Path(address): Path<String>,
    Query(query): Query<LookupQuery>,
) -> Result<Json<UtxoResponse>, AppError> {
    let network = query.network.unwrap_or(state.default_network);
    let offline = query.offline.unwrap_or(state.offline_default);
    let set = state
        .wallet
        .reader
        .utxos(&address, network, offline, query.force_refresh)
        .await?;
    Ok(Json(UtxoResponse {
        count: set.utxos.len(),
        total_value: set.total_value(),
        set,
    }))
}
