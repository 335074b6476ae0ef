use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use ht_hooks_delivery::DeliveryClient;
use ht_hooks_storage::Database;

use crate::auth::{bearer_token, PartnerTokenValidator};
use crate::problem::ProblemResponse;
use crate::{config_api, dispatch, ingress, stats, telemetry};

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    token_validator: PartnerTokenValidator,
    delivery: DeliveryClient,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        storage: Database,
        token_secret: &[u8],
        delivery: DeliveryClient,
    ) -> Self {
        Self {
            metrics,
            storage,
            clock: Arc::new(Utc::now),
            token_validator: PartnerTokenValidator::new(token_secret),
            delivery,
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn delivery(&self) -> &DeliveryClient {
        &self.delivery
    }

    /// Resolves the authenticated partner id from the request headers.
    ///
    /// Token issuance lives in the external auth system; here we only check
    /// the signature and expiry and take `sub` as the partner identity.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<String, ProblemResponse> {
        let token = bearer_token(headers)
            .ok_or_else(|| ProblemResponse::unauthenticated("missing bearer token"))?;
        self.token_validator
            .validate(token, self.now())
            .map_err(|err| ProblemResponse::unauthenticated(err.to_string()))
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/hooks/:partner_id", post(ingress::handle))
        .route("/internal/dispatch", post(dispatch::handle))
        .route(
            "/api/partner/webhook-config",
            get(config_api::get_config).put(config_api::set_url),
        )
        .route(
            "/api/partner/webhook-config/rotate",
            post(config_api::rotate),
        )
        .route(
            "/api/partner/webhook-config/secret",
            get(config_api::reveal),
        )
        .route("/api/partner/stats", get(stats::get_stats))
        .route("/api/partner/logs", get(stats::get_logs))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
        .body(Body::from(body))
        .unwrap()
}
