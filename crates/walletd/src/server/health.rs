use std::collections::BTreeMap;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use walletd_core::reader::STALE_SOURCE;
use walletd_core::Network;

use super::SharedState;

/// Long-lived addresses whose balance lookups exercise the explorer path.
pub(super) fn reference_address(network: Network) -> &'static str {
    match network {
        Network::Mainnet => "1A1zP1eP5QGefi2DMPTfTLSSLmv7DivfNa",
        Network::Testnet => "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx",
    }
}

// ==============================================================================
// DTOs
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(super) enum Overall {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Serialize)]
pub(super) struct NetworkHealth {
    status: &'static str,
    connection: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl NetworkHealth {
    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

#[derive(Serialize)]
pub(super) struct HealthResponse {
    status: Overall,
    networks: BTreeMap<&'static str, NetworkHealth>,
    cache_entries: usize,
    version: &'static str,
}

// ==============================================================================
// Handler
// ==============================================================================

pub(super) async fn health(State(state): State<SharedState>) -> (StatusCode, Json<HealthResponse>) {
    let mut networks = BTreeMap::new();
    for network in Network::ALL {
        networks.insert(network.as_str(), check_network(&state, network).await);
    }

    let ok = networks.values().filter(|n| n.is_ok()).count();
    let status = match ok {
        n if n == networks.len() => Overall::Healthy,
        0 => Overall::Unhealthy,
        _ => Overall::Degraded,
    };
    if status != Overall::Healthy {
        tracing::warn!(?status, "health check found failing networks");
    }

    let code = match status {
        Overall::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (
        code,
        Json(HealthResponse {
            status,
            networks,
            cache_entries: state.wallet.cache().len(),
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}

async fn check_network(state: &SharedState, network: Network) -> NetworkHealth {
    match state.wallet.reader.refresh_balance(reference_address(network), network).await {
        Ok(balance) if balance.source == STALE_SOURCE => NetworkHealth {
            status: "error",
            connection: "failed",
            source: Some(balance.source),
            error: balance.warning,
        },
        Ok(balance) => NetworkHealth {
            status: "ok",
            connection: "ok",
            source: Some(balance.source),
            error: None,
        },
        Err(e) => NetworkHealth {
            status: "error",
            connection: "failed",
            source: None,
            error: Some(e.to_string()),
        },
    }
}
