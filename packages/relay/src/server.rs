//! HTTP surface
//!
//! `GET /?id=<tx>` (also served at `/transaction`) runs the relay for one
//! transaction. Refusals answer 403, upstream failures 500, both as plain text.

use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::relay::{Relay, RelayError, SwapRequest};

/// Body of a successful run
pub const SENT_BODY: &str = "Sent webhook";

/// Query string of a notify request
#[derive(Debug, Default, Deserialize)]
pub struct NotifyParams {
    pub id: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

impl NotifyParams {
    fn into_request(self) -> Result<SwapRequest, RelayError> {
        let id = self.id.ok_or(RelayError::InvalidRequest)?;
        Ok(SwapRequest {
            id,
            from: self.from,
            to: self.to,
        })
    }
}

impl RelayError {
    pub fn status_code(&self) -> StatusCode {
        if self.is_rejection() {
            StatusCode::FORBIDDEN
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

async fn notify(
    State(relay): State<Arc<Relay>>,
    params: Result<Query<NotifyParams>, QueryRejection>,
) -> Result<&'static str, RelayError> {
    let Ok(Query(params)) = params else {
        return Err(RelayError::InvalidRequest);
    };
    let request = params.into_request()?;

    match relay.process(&request).await {
        Ok(_) => Ok(SENT_BODY),
        Err(e) => {
            if !e.is_rejection() {
                error!("Relay failed for {}: {}", request.id, e);
            }
            Err(e)
        }
    }
}

async fn health() -> &'static str {
    "ok"
}

/// Build the router serving the relay
pub fn create_router(relay: Arc<Relay>) -> Router {
    Router::new()
        .route("/", get(notify))
        .route("/transaction", get(notify))
        .route("/health", get(health))
        .with_state(relay)
}

/// Serve the relay on an already bound listener until the process stops
pub async fn serve(listener: TcpListener, relay: Arc<Relay>) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Relay listening on {}", addr);
    }
    axum::serve(listener, create_router(relay)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::DecodeError;
    use crate::filter::Ineligible;
    use crate::ledger::LedgerError;
    use crate::publisher::NotifyError;

    #[test]
    fn test_missing_id_is_invalid_request() {
        let result = NotifyParams::default().into_request();
        assert!(matches!(result, Err(RelayError::InvalidRequest)));
    }

    #[test]
    fn test_params_keep_legacy_legs() {
        let params = NotifyParams {
            id: Some("abc".to_string()),
            from: Some("1 AR".to_string()),
            to: Some("0.1 ETH".to_string()),
        };
        let request = params.into_request().unwrap();
        assert_eq!(request, SwapRequest::new("abc").with_legs("1 AR", "0.1 ETH"));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(RelayError::InvalidRequest.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(RelayError::AlreadyNotified.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            RelayError::Ineligible(Ineligible::AlreadyFinalized).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            RelayError::from(DecodeError::TickerResolution("t".into())).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            RelayError::Ledger(LedgerError::NotFound("abc".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            RelayError::Notify(NotifyError::MissingWebhook("WEBHOOK".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_rejection_bodies() {
        assert_eq!(RelayError::InvalidRequest.to_string(), "Invalid request");
        assert_eq!(RelayError::AlreadyNotified.to_string(), "Already sent");
        assert_eq!(
            RelayError::Ineligible(Ineligible::MissingProtocolTag).to_string(),
            "Invalid tags"
        );
    }
}
