use std::borrow::Cow;

use axum::{extract::State, http::StatusCode, Json};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use ht_hooks_core::event::{Direction, Outcome, WebhookPayload};
use ht_hooks_core::signature;
use ht_hooks_delivery::DeliveryAttempt;
use ht_hooks_storage::{ConfigError, NewDeliveryRecord, PartnerError};
use url::Url;

use crate::problem::ProblemResponse;
use crate::router::AppState;

/// Relays one platform event to the partner's configured webhook URL.
///
/// The serialized body is signed, delivered once within the configured
/// timeout, and the attempt is recorded whatever the receiver does. Delivery
/// failure is reported in the response body, not as an HTTP error: retrying
/// is the platform caller's decision, this layer never retries.
pub async fn handle(
    State(state): State<AppState>,
    Json(request): Json<DispatchRequest>,
) -> Result<Json<DispatchResponse>, ProblemResponse> {
    let partner = match state.storage().partners().fetch(&request.partner_id).await {
        Ok(partner) if partner.active => partner,
        Ok(_) | Err(PartnerError::NotFound) => return Err(ProblemResponse::unknown_partner()),
        Err(err) => {
            error!(stage = "dispatch", partner_id = %request.partner_id, error = %err, "failed to load partner");
            return Err(ProblemResponse::persistence_failure());
        }
    };

    let config = match state.storage().webhook_configs().fetch(&partner.id).await {
        Ok(config) if !config.disabled => config,
        Ok(_) | Err(ConfigError::NotFound) => return Err(ProblemResponse::unknown_partner()),
        Err(err) => {
            error!(stage = "dispatch", partner_id = %partner.id, error = %err, "failed to load webhook config");
            return Err(ProblemResponse::persistence_failure());
        }
    };

    // The body built here is the exact byte string that is signed, sent, and
    // recorded; receivers verify over these bytes.
    let mut wire = request.payload.clone();
    wire.insert("event".to_string(), Value::String(request.event.clone()));
    let body = Value::Object(wire).to_string();

    let payload = WebhookPayload::parse(body.as_bytes()).map_err(|err| {
        ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            "invalid_payload",
            err.to_string(),
        )
    })?;

    let target = match Url::parse(&config.target_url) {
        Ok(url) => url,
        Err(err) => {
            // Should be unreachable given write-side validation; still record
            // the failed attempt so it is visible to the partner.
            warn!(stage = "dispatch", partner_id = %partner.id, error = %err, "stored target url is invalid");
            let record_id = record_attempt(
                &state,
                &partner.id,
                payload.event.as_str(),
                &body,
                Outcome::Failure,
                None,
                Some("configured target url is invalid".to_string()),
            )
            .await?;
            counter!("webhook_dispatch_total", "result" => "failed").increment(1);
            return Ok(Json(DispatchResponse {
                record_id,
                outcome: Outcome::Failure,
                status_code: None,
                error_detail: Some("configured target url is invalid".to_string()),
            }));
        }
    };

    let sig = signature::sign(config.secret.as_bytes(), body.as_bytes());
    let attempt = state.delivery().deliver(&target, &sig, body.clone()).await;

    let outcome = if attempt.is_success() {
        Outcome::Success
    } else {
        Outcome::Failure
    };
    counter!("webhook_dispatch_total", "result" => dispatch_label(&attempt)).increment(1);

    let record_id = record_attempt(
        &state,
        &partner.id,
        payload.event.as_str(),
        &body,
        outcome,
        attempt.status_code(),
        attempt.error_detail(),
    )
    .await?;

    info!(
        stage = "dispatch",
        partner_id = %partner.id,
        event_type = payload.event.as_str(),
        outcome = outcome.as_str(),
        status = attempt.status_code(),
        "delivery attempt recorded"
    );

    Ok(Json(DispatchResponse {
        record_id,
        outcome,
        status_code: attempt.status_code(),
        error_detail: attempt.error_detail(),
    }))
}

async fn record_attempt(
    state: &AppState,
    partner_id: &str,
    event_type: &str,
    body: &str,
    outcome: Outcome,
    status_code: Option<u16>,
    error_detail: Option<String>,
) -> Result<String, ProblemResponse> {
    let id = Uuid::new_v4().to_string();
    let record = NewDeliveryRecord {
        id: Cow::Borrowed(id.as_str()),
        partner_id: Cow::Borrowed(partner_id),
        event_type: Cow::Borrowed(event_type),
        payload_json: Cow::Borrowed(body),
        direction: Direction::Outbound,
        outcome,
        status_code,
        error_detail: error_detail.map(Cow::Owned),
        created_at: state.now(),
    };

    state
        .storage()
        .delivery_log()
        .insert(record)
        .await
        .map_err(|err| {
            error!(stage = "dispatch", partner_id, error = %err, "failed to persist delivery record");
            ProblemResponse::persistence_failure()
        })?;
    Ok(id)
}

fn dispatch_label(attempt: &DeliveryAttempt) -> &'static str {
    match attempt {
        DeliveryAttempt::Delivered { .. } => "delivered",
        DeliveryAttempt::Rejected { .. } => "rejected",
        DeliveryAttempt::TimedOut => "timeout",
        DeliveryAttempt::Failed { .. } => "failed",
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    pub partner_id: String,
    pub event: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResponse {
    pub record_id: String,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}
