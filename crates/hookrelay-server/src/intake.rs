//! Inbound webhook endpoints: the provider's verification handshake and
//! notification intake.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::metrics::record_webhook_received;
use crate::state::AppState;

const SUBSCRIBE_MODE: &str = "subscribe";

#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// `GET /meta/webhook`: echoes the challenge when the verify token belongs
/// to a registered app.
pub async fn verify(State(state): State<AppState>, Query(params): Query<VerifyParams>) -> Response {
    let token = match (params.mode.as_deref(), params.verify_token.as_deref()) {
        (Some(SUBSCRIBE_MODE), Some(token)) if !token.is_empty() => token,
        _ => {
            warn!(mode = ?params.mode, "Invalid webhook verification request");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    match state.catalog().find_app_by_verify_token(token).await {
        Ok(Some(app)) => {
            info!(app_id = %app.id, business_id = %app.business_id, "Webhook verified");
            (StatusCode::OK, params.challenge.unwrap_or_default()).into_response()
        }
        Ok(None) => {
            warn!("Webhook verification with unknown verify token");
            StatusCode::FORBIDDEN.into_response()
        }
        Err(e) => {
            error!(error = %e, "Webhook verification failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// `POST /meta/webhook`: acknowledges immediately and fans the unmodified
/// body out in the background.
pub async fn receive(State(state): State<AppState>, body: Bytes) -> StatusCode {
    let parsed: Value = match serde_json::from_slice(&body) {
        Ok(value @ Value::Object(_)) => value,
        _ => {
            record_webhook_received("invalid");
            warn!(bytes = body.len(), "Webhook body is not a JSON object");
            return StatusCode::BAD_REQUEST;
        }
    };

    let Some(phone_number_id) = extract_phone_number_id(&parsed) else {
        record_webhook_received("missing_identifier");
        warn!("Missing phone_number_id in webhook payload");
        return StatusCode::OK;
    };
    record_webhook_received("accepted");
    debug!(%phone_number_id, bytes = body.len(), "Webhook received");

    let fanout = state.fanout.clone();
    tokio::spawn(async move {
        let summary = fanout.dispatch(&phone_number_id, body).await;
        if summary.total_destinations > 0 {
            info!(
                %phone_number_id,
                total = summary.total_destinations,
                queued = summary.queued,
                failed_to_queue = summary.failed_to_queue,
                "Webhook dispatched"
            );
        }
    });

    StatusCode::OK
}

/// Reads `entry[0].changes[0].value.metadata.phone_number_id`. Numeric ids
/// are accepted and rendered as strings.
pub fn extract_phone_number_id(payload: &Value) -> Option<String> {
    let id = payload
        .get("entry")?
        .get(0)?
        .get("changes")?
        .get(0)?
        .get("value")?
        .get("metadata")?
        .get("phone_number_id")?;

    match id {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
