use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use walletd_core::address::{derive_address, AddressFormat};
use walletd_core::Network;

use super::error::AppError;
use super::SharedState;

// ==============================================================================
// DTOs
// ==============================================================================

#[derive(Deserialize)]
pub(super) struct AddressBody {
    #[serde(alias = "publicKey")]
    public_key: String,
    format: AddressFormat,
    network: Option<Network>,
}

#[derive(Serialize)]
pub(super) struct AddressResponse {
    address: String,
    format: AddressFormat,
    network: Network,
}

// ==============================================================================
// Handler
// ==============================================================================

pub(super) async fn derive(
    State(state): State<SharedState>,
    Json(body): Json<AddressBody>,
) -> Result<Json<AddressResponse>, AppError> {
    let network = body.network.unwrap_or(state.default_network);
    let address = derive_address(&body.public_key, body.format, network)?;
    Ok(Json(AddressResponse {
        address,
        format: body.format,
        network,
    }))
}
