use std::borrow::Cow;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use metrics::{counter, histogram};
use serde_json::{json, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use ht_hooks_core::event::{Direction, Outcome, WebhookPayload};
use ht_hooks_core::signature;
use ht_hooks_storage::{ConfigError, DeliveryLogError, NewDeliveryRecord, PartnerError};

use crate::problem::ProblemResponse;
use crate::router::AppState;

/// Header carrying the HMAC over the raw request body.
pub const HEADER_SIGNATURE: &str = "X-HouseTabz-Signature";

/// Receives one webhook delivery for the addressed partner.
///
/// The handler does exactly one durable write before acknowledging; every
/// authentication failure with an attributable owner is recorded as a failed
/// delivery so misconfiguration shows up in the partner's own error rate
/// instead of being silently rejected.
pub async fn handle(
    State(state): State<AppState>,
    Path(partner_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProblemResponse> {
    let start = Instant::now();

    let partner = match state.storage().partners().fetch(&partner_id).await {
        Ok(partner) => partner,
        Err(PartnerError::NotFound) => {
            // No owner to attribute a record to; the foreign key would
            // reject the insert anyway.
            observe_ack(start, "unknown_partner");
            return Err(ProblemResponse::unknown_partner());
        }
        Err(err) => {
            error!(stage = "ingress", partner_id, error = %err, "failed to load partner");
            observe_ack(start, "storage_error");
            return Err(ProblemResponse::persistence_failure());
        }
    };

    let config = match state.storage().webhook_configs().fetch(&partner.id).await {
        Ok(config) if !config.disabled && partner.active => config,
        Ok(_) | Err(ConfigError::NotFound) => {
            record_failure(&state, &partner.id, &body, "unknown_partner").await?;
            observe_ack(start, "unknown_partner");
            return Err(ProblemResponse::unknown_partner());
        }
        Err(err) => {
            error!(stage = "ingress", partner_id = %partner.id, error = %err, "failed to load webhook config");
            observe_ack(start, "storage_error");
            return Err(ProblemResponse::persistence_failure());
        }
    };

    let Some(provided) = headers
        .get(HEADER_SIGNATURE)
        .and_then(|value| value.to_str().ok())
    else {
        warn!(stage = "ingress", partner_id = %partner.id, "delivery without signature header");
        record_failure(&state, &partner.id, &body, "unauthenticated").await?;
        observe_ack(start, "unauthenticated");
        return Err(ProblemResponse::unauthenticated(format!(
            "missing header {HEADER_SIGNATURE}"
        )));
    };

    if let Err(err) = signature::verify(config.secret.as_bytes(), &body, provided) {
        counter!("webhook_invalid_signature_total").increment(1);
        warn!(stage = "ingress", partner_id = %partner.id, reason = %err, "signature verification failed");
        record_failure(&state, &partner.id, &body, "invalid_signature").await?;
        observe_ack(start, "invalid_signature");
        return Err(ProblemResponse::invalid_signature(err.to_string()));
    }

    let payload = match WebhookPayload::parse(&body) {
        Ok(payload) => payload,
        Err(err) => {
            record_failure(&state, &partner.id, &body, "invalid_payload").await?;
            observe_ack(start, "invalid_payload");
            return Err(ProblemResponse::new(
                StatusCode::BAD_REQUEST,
                "invalid_payload",
                err.to_string(),
            ));
        }
    };

    let record = NewDeliveryRecord {
        id: Cow::Owned(Uuid::new_v4().to_string()),
        partner_id: Cow::Borrowed(partner.id.as_str()),
        event_type: Cow::Owned(payload.event.as_str().to_string()),
        payload_json: Cow::Owned(String::from_utf8_lossy(&body).into_owned()),
        direction: Direction::Inbound,
        outcome: Outcome::Success,
        status_code: Some(StatusCode::OK.as_u16()),
        error_detail: None,
        created_at: state.now(),
    };
    persist(&state, record).await?;

    info!(
        stage = "ingress",
        partner_id = %partner.id,
        event_type = payload.event.as_str(),
        transaction_id = %payload.transaction_id,
        "delivery accepted"
    );
    counter!("webhook_ingress_total", "result" => "success").increment(1);
    observe_ack(start, "success");

    Ok((StatusCode::OK, Json(json!({ "received": true }))).into_response())
}

/// Records a failed delivery attempt with the taxonomy reason.
async fn record_failure(
    state: &AppState,
    partner_id: &str,
    body: &[u8],
    reason: &'static str,
) -> Result<(), ProblemResponse> {
    counter!("webhook_ingress_total", "result" => reason).increment(1);
    let status = match reason {
        "unauthenticated" => StatusCode::UNAUTHORIZED,
        "invalid_signature" => StatusCode::FORBIDDEN,
        "unknown_partner" => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_REQUEST,
    };
    let record = NewDeliveryRecord {
        id: Cow::Owned(Uuid::new_v4().to_string()),
        partner_id: Cow::Owned(partner_id.to_string()),
        event_type: Cow::Owned(event_label(body)),
        payload_json: Cow::Owned(String::from_utf8_lossy(body).into_owned()),
        direction: Direction::Inbound,
        outcome: Outcome::Failure,
        status_code: Some(status.as_u16()),
        error_detail: Some(Cow::Borrowed(reason)),
        created_at: state.now(),
    };
    persist(state, record).await
}

async fn persist(state: &AppState, record: NewDeliveryRecord<'_>) -> Result<(), ProblemResponse> {
    state
        .storage()
        .delivery_log()
        .insert(record)
        .await
        .map_err(|err| {
            match &err {
                DeliveryLogError::MissingPartner => {
                    error!(stage = "ingress", error = %err, "partner vanished during recording")
                }
                DeliveryLogError::Database(db_err) => {
                    error!(stage = "ingress", error = %db_err, "failed to persist delivery record")
                }
            }
            ProblemResponse::persistence_failure()
        })
}

/// Best-effort event label for failure records whose payload never reached
/// full validation.
fn event_label(body: &[u8]) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("event")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| "unknown".to_string())
}

fn observe_ack(start: Instant, result: &'static str) {
    histogram!("webhook_ack_latency_seconds", "result" => result)
        .record(start.elapsed().as_secs_f64());
}
