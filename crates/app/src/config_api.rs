use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use url::Url;

use ht_hooks_storage::ConfigError;

use crate::problem::ProblemResponse;
use crate::router::AppState;
use crate::secret::generate_secret;

/// Current configuration with the secret masked.
///
/// The plaintext secret is only ever returned by [`set_url`] on first
/// configuration, [`rotate`], and the explicit [`reveal`] endpoint.
pub async fn get_config(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ConfigView>, ProblemResponse> {
    let partner_id = state.authenticate(&headers)?;
    let config = fetch_config(&state, &partner_id).await?;

    Ok(Json(ConfigView {
        webhook_url: config.target_url,
        rotated_at: config.rotated_at,
        secret_configured: true,
        disabled: config.disabled,
    }))
}

/// Sets or replaces the target URL; the first call provisions the secret.
pub async fn set_url(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SetUrlRequest>,
) -> Result<Json<ConfigUpdated>, ProblemResponse> {
    let partner_id = state.authenticate(&headers)?;
    let target_url = validate_target_url(&request.webhook_url)?;

    let candidate_secret = generate_secret();
    let config = state
        .storage()
        .webhook_configs()
        .upsert_url(
            &partner_id,
            target_url.as_str(),
            &candidate_secret,
            state.now(),
        )
        .await
        .map_err(|err| match err {
            ConfigError::MissingPartner => ProblemResponse::unknown_partner(),
            other => {
                error!(stage = "config", partner_id, error = %other, "failed to store webhook url");
                ProblemResponse::persistence_failure()
            }
        })?;

    // The upsert keeps an existing secret, so equality means this call
    // created the configuration and the secret is shown this one time.
    let created = config.secret == candidate_secret;
    info!(
        stage = "config",
        partner_id,
        webhook_url = %config.target_url,
        created,
        "webhook url configured"
    );

    Ok(Json(ConfigUpdated {
        webhook_url: config.target_url,
        rotated_at: config.rotated_at,
        webhook_secret: created.then_some(config.secret),
    }))
}

/// Atomically replaces the signing secret and returns the new value once.
pub async fn rotate(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SecretView>, ProblemResponse> {
    let partner_id = state.authenticate(&headers)?;

    let new_secret = generate_secret();
    let config = state
        .storage()
        .webhook_configs()
        .rotate_secret(&partner_id, &new_secret, state.now())
        .await
        .map_err(|err| match err {
            ConfigError::NotFound => ProblemResponse::unknown_partner(),
            other => {
                error!(stage = "config", partner_id, error = %other, "failed to rotate secret");
                ProblemResponse::persistence_failure()
            }
        })?;

    counter!("secret_rotations_total").increment(1);
    info!(stage = "config", partner_id, "signing secret rotated");

    Ok(Json(SecretView {
        webhook_secret: config.secret,
        rotated_at: config.rotated_at,
    }))
}

/// Returns the plaintext secret behind explicit, authenticated request.
pub async fn reveal(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SecretView>, ProblemResponse> {
    let partner_id = state.authenticate(&headers)?;
    let config = fetch_config(&state, &partner_id).await?;
    if config.disabled {
        return Err(ProblemResponse::unknown_partner());
    }

    Ok(Json(SecretView {
        webhook_secret: config.secret,
        rotated_at: config.rotated_at,
    }))
}

async fn fetch_config(
    state: &AppState,
    partner_id: &str,
) -> Result<ht_hooks_storage::WebhookConfig, ProblemResponse> {
    state
        .storage()
        .webhook_configs()
        .fetch(partner_id)
        .await
        .map_err(|err| match err {
            ConfigError::NotFound => ProblemResponse::unknown_partner(),
            other => {
                error!(stage = "config", partner_id, error = %other, "failed to load webhook config");
                ProblemResponse::persistence_failure()
            }
        })
}

fn validate_target_url(raw: &str) -> Result<Url, ProblemResponse> {
    let url = Url::parse(raw).map_err(|err| {
        ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            "invalid_url",
            format!("webhook url is not a valid absolute URL: {err}"),
        )
    })?;
    if url.scheme() != "https" {
        return Err(ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            "invalid_url",
            "webhook url must use https",
        ));
    }
    Ok(url)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetUrlRequest {
    pub webhook_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigView {
    pub webhook_url: String,
    pub rotated_at: DateTime<Utc>,
    pub secret_configured: bool,
    pub disabled: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUpdated {
    pub webhook_url: String,
    pub rotated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretView {
    pub webhook_secret: String,
    pub rotated_at: DateTime<Utc>,
}
