use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use walletd_core::broadcast::BroadcastOutcome;
use walletd_core::builder::{BuildRequest, BuiltTransaction, TxInputSpec, TxOutputSpec};
use walletd_core::codec::{self, ValidationReport};
use walletd_core::{Network, TransactionStatus};

use super::error::AppError;
use super::SharedState;

// ==============================================================================
// DTOs
// ==============================================================================

#[derive(Deserialize)]
pub(super) struct BuildBody {
    inputs: Vec<TxInputSpec>,
    outputs: Vec<TxOutputSpec>,
    #[serde(default, alias = "feeRate")]
    fee_rate: Option<f64>,
    network: Option<Network>,
}

#[derive(Deserialize)]
pub(super) struct RawTxBody {
    #[serde(alias = "rawHex", alias = "hex")]
    raw_hex: String,
    network: Option<Network>,
}

#[derive(Deserialize)]
pub(super) struct StatusQuery {
    network: Option<Network>,
    #[serde(default)]
    force_refresh: bool,
}

// ==============================================================================
// Handlers
// ==============================================================================

pub(super) async fn build_transaction(
    State(state): State<SharedState>,
    Json(body): Json<BuildBody>,
) -> Result<Json<BuiltTransaction>, AppError> {
    let request = BuildRequest {
        inputs: body.inputs,
        outputs: body.outputs,
        fee_rate: body.fee_rate,
        network: body.network.unwrap_or(state.default_network),
    };
    let built = state.wallet.builder.build(&request)?;
    tracing::debug!(txid = %built.txid, fee = built.fee, "built unsigned transaction");
    Ok(Json(built))
}

/// Always 200: an invalid transaction is a normal answer here.
pub(super) async fn validate_transaction(Json(body): Json<RawTxBody>) -> Json<ValidationReport> {
    Json(codec::validate(&body.raw_hex))
}

pub(super) async fn broadcast_transaction(
    State(state): State<SharedState>,
    Json(body): Json<RawTxBody>,
) -> Result<Json<BroadcastOutcome>, AppError> {
    if body.raw_hex.trim().is_empty() {
        return Err(AppError::BadRequest("raw_hex must not be empty".to_string()));
    }
    let network = body.network.unwrap_or(state.default_network);
    let outcome = state.wallet.broadcaster.broadcast(&body.raw_hex, network).await?;
    Ok(Json(outcome))
}

pub(super) async fn get_status(
    State(state): State<SharedState>,
    Path(txid): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<TransactionStatus>, AppError> {
    let network = query.network.unwrap_or(state.default_network);
    let status = state
        .wallet
        .tracker
        .status(&txid, network, query.force_refresh)
        .await?;
    Ok(Json(status))
}
