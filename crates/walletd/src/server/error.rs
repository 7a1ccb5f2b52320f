use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use walletd_core::address::AddressError;
use walletd_core::broadcast::RejectionKind;
use walletd_core::CoreError;

// ==============================================================================
// Error Type
// ==============================================================================

pub(crate) enum AppError {
    BadRequest(String),
    NotFound(String),
    /// A core failure; status, reason, and details are derived from it.
    Core(CoreError),
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        Self::Core(err)
    }
}

impl From<AddressError> for AppError {
    fn from(err: AddressError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, reason, message, details) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg, None),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg, None),
            Self::Core(err) => {
                let (status, reason) = classify_core_error(&err);
                if status.is_server_error() {
                    tracing::warn!(%status, reason, error = %err, "request failed");
                }
                (status, reason, err.to_string(), core_error_details(&err))
            }
        };

        let mut body = json!({ "error": message, "reason": reason });
        if let Some(details) = details {
            body["details"] = details;
        }
        (status, Json(body)).into_response()
    }
}

// ==============================================================================
// Core Error Mapping
// ==============================================================================

pub(super) fn classify_core_error(err: &CoreError) -> (StatusCode, &'static str) {
    match err {
        CoreError::Validation(decode) => (StatusCode::UNPROCESSABLE_ENTITY, decode.kind.as_str()),
        CoreError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
        CoreError::InvalidOutput(_) => (StatusCode::BAD_REQUEST, "invalid_output"),
        CoreError::InsufficientFunds { .. } => (StatusCode::BAD_REQUEST, "insufficient_funds"),
        CoreError::SourceUnavailable { .. } => (StatusCode::BAD_GATEWAY, "source_unavailable"),
        CoreError::AllSourcesFailed { .. } => (StatusCode::BAD_GATEWAY, "all_sources_failed"),
        CoreError::BroadcastFailed { failures } => {
            let any = |kind: RejectionKind| failures.iter().any(|f| f.kind == kind);
            if any(RejectionKind::AlreadyInChain) {
                (StatusCode::CONFLICT, RejectionKind::AlreadyInChain.as_str())
            } else if any(RejectionKind::InsufficientFee) {
                (StatusCode::TOO_MANY_REQUESTS, RejectionKind::InsufficientFee.as_str())
            } else if any(RejectionKind::RateLimited) {
                (StatusCode::TOO_MANY_REQUESTS, RejectionKind::RateLimited.as_str())
            } else if !failures.is_empty() && failures.iter().all(|f| f.kind == RejectionKind::Malformed) {
                (StatusCode::UNPROCESSABLE_ENTITY, RejectionKind::Malformed.as_str())
            } else {
                (StatusCode::BAD_GATEWAY, "broadcast_failed")
            }
        }
        CoreError::Cache(_) | CoreError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    }
}

fn core_error_details(err: &CoreError) -> Option<Value> {
    match err {
        CoreError::Validation(decode) => Some(json!({
            "kind": decode.kind,
            "offset": decode.offset,
            "context": decode.context,
        })),
        CoreError::InsufficientFunds { inputs, outputs } => Some(json!({
            "inputs": inputs,
            "outputs": outputs,
        })),
        CoreError::SourceUnavailable { source_name, message } => Some(json!({
            "source": source_name,
            "message": message,
        })),
        CoreError::AllSourcesFailed { errors } => Some(Value::Array(
            errors
                .iter()
                .map(|(source, message)| json!({ "source": source, "message": message }))
                .collect(),
        )),
        CoreError::BroadcastFailed { failures } => Some(json!(failures)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use walletd_core::broadcast::ServiceFailure;

    fn failure(kind: RejectionKind) -> ServiceFailure {
        ServiceFailure {
            service: "svc".to_string(),
            kind,
            message: "rejected".to_string(),
        }
    }

    fn broadcast_status(kinds: &[RejectionKind]) -> StatusCode {
        let err = CoreError::BroadcastFailed {
            failures: kinds.iter().copied().map(failure).collect(),
        };
        classify_core_error(&err).0
    }

    #[test]
    fn broadcast_failures_map_by_most_specific_rejection() {
        assert_eq!(
            broadcast_status(&[RejectionKind::Timeout, RejectionKind::AlreadyInChain]),
            StatusCode::CONFLICT
        );
        assert_eq!(
            broadcast_status(&[RejectionKind::InsufficientFee, RejectionKind::ServerError]),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            broadcast_status(&[RejectionKind::RateLimited]),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            broadcast_status(&[RejectionKind::Malformed, RejectionKind::Malformed]),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            broadcast_status(&[RejectionKind::Malformed, RejectionKind::Network]),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(broadcast_status(&[]), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn business_rule_failures_are_client_errors() {
        let (status, reason) = classify_core_error(&CoreError::InsufficientFunds {
            inputs: 1,
            outputs: 2,
        });
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(reason, "insufficient_funds");
    }
}
