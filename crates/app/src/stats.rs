use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use ht_hooks_core::aggregate::{aggregate, AggregateError, DateRange, DeliveryRecord};
use ht_hooks_core::event::{Direction, Outcome};
use ht_hooks_storage::PartnerError;

use crate::problem::ProblemResponse;
use crate::router::AppState;

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

/// Headline cards and chart-ready series for the partner dashboard.
///
/// Read-only: the report is recomputed from the delivery log on each call.
/// The aggregation is deterministic over the log, so a materialized cache can
/// be slotted in front of this handler without changing its output.
pub async fn get_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<StatsQuery>,
) -> Result<Json<StatsResponse>, ProblemResponse> {
    let partner_id = state.authenticate(&headers)?;
    let range = parse_range(&query)?;

    if let Err(err) = state.storage().partners().fetch(&partner_id).await {
        counter!("api_stats_requests_total", "result" => "error").increment(1);
        return Err(match err {
            PartnerError::NotFound => ProblemResponse::unknown_partner(),
            other => {
                error!(stage = "stats", partner_id, error = %other, "failed to load partner");
                ProblemResponse::persistence_failure()
            }
        });
    }

    let records = state
        .storage()
        .delivery_log()
        .list_for_partner(&partner_id)
        .await
        .map_err(|err| {
            counter!("api_stats_requests_total", "result" => "error").increment(1);
            error!(stage = "stats", partner_id, error = %err, "failed to load delivery log");
            ProblemResponse::persistence_failure()
        })?;

    let report = aggregate(&records, range);
    counter!("api_stats_requests_total", "result" => "ok").increment(1);

    let volume_series = report
        .buckets
        .iter()
        .map(|bucket| VolumePoint {
            day: bucket.day,
            count: bucket.count,
        })
        .collect();
    let revenue_series = report
        .buckets
        .iter()
        .map(|bucket| RevenuePoint {
            day: bucket.day,
            amount: bucket.revenue,
        })
        .collect();

    Ok(Json(StatsResponse {
        headline: Headline {
            houses_served: report.totals.count,
            total_revenue: report.totals.revenue,
            active_services: report.totals.count,
            webhook_success_rate: report.success_rate,
        },
        volume_series,
        revenue_series,
        totals: Totals {
            count: report.totals.count,
            revenue: report.totals.revenue,
        },
        success_rate: report.success_rate,
        error_rate: report.error_rate,
    }))
}

/// Reverse-chronological page of raw delivery records for manual inspection.
pub async fn get_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<LogsQuery>,
) -> Result<Json<LogsResponse>, ProblemResponse> {
    let partner_id = state.authenticate(&headers)?;

    let page = query.page.unwrap_or(1).max(1);
    let per_page = query
        .per_page
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let offset = (page - 1) * per_page;

    let log_page = state
        .storage()
        .delivery_log()
        .list_page(&partner_id, per_page, offset)
        .await
        .map_err(|err| {
            error!(stage = "stats", partner_id, error = %err, "failed to load delivery log page");
            ProblemResponse::persistence_failure()
        })?;

    Ok(Json(LogsResponse {
        records: log_page.records.iter().map(LogEntry::from_record).collect(),
        total: log_page.total,
        page,
        per_page,
    }))
}

fn parse_range(query: &StatsQuery) -> Result<Option<DateRange>, ProblemResponse> {
    match (&query.start, &query.end) {
        (None, None) => Ok(None),
        (Some(start), Some(end)) => {
            let start = parse_date(start)?;
            let end = parse_date(end)?;
            let range = DateRange::new(start, end).map_err(|err| match err {
                AggregateError::InvalidRange { .. } => {
                    ProblemResponse::invalid_range(err.to_string())
                }
            })?;
            Ok(Some(range))
        }
        _ => Err(ProblemResponse::invalid_range(
            "start and end must be provided together",
        )),
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, ProblemResponse> {
    raw.parse().map_err(|_| {
        ProblemResponse::invalid_range(format!("'{raw}' is not a valid YYYY-MM-DD date"))
    })
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub per_page: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub headline: Headline,
    pub volume_series: Vec<VolumePoint>,
    pub revenue_series: Vec<RevenuePoint>,
    pub totals: Totals,
    pub success_rate: f64,
    pub error_rate: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Headline {
    pub houses_served: u64,
    pub total_revenue: f64,
    pub active_services: u64,
    pub webhook_success_rate: f64,
}

#[derive(Debug, Serialize)]
pub struct VolumePoint {
    pub day: NaiveDate,
    pub count: u64,
}

#[derive(Debug, Serialize)]
pub struct RevenuePoint {
    pub day: NaiveDate,
    pub amount: f64,
}

#[derive(Debug, Serialize)]
pub struct Totals {
    pub count: u64,
    pub revenue: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsResponse {
    pub records: Vec<LogEntry>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: String,
    pub event_type: String,
    pub direction: Direction,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub payload: Value,
}

impl LogEntry {
    fn from_record(record: &DeliveryRecord) -> Self {
        // Recorded payloads are stored verbatim; fall back to the raw string
        // if one ever fails to parse.
        let payload = serde_json::from_str(&record.payload_json)
            .unwrap_or_else(|_| Value::String(record.payload_json.clone()));
        Self {
            id: record.id.clone(),
            event_type: record.event_type.as_str().to_string(),
            direction: record.direction,
            outcome: record.outcome,
            status_code: record.status_code,
            error_detail: record.error_detail.clone(),
            created_at: record.created_at,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
        response::Response,
    };
    use http_body_util::BodyExt;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;
    use std::borrow::Cow;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    use crate::auth::PartnerClaims;
    use crate::{router::app_router, router::AppState, telemetry};
    use ht_hooks_delivery::DeliveryClient;
    use ht_hooks_storage::{Database, NewDeliveryRecord, NewPartner};

    const PARTNER_ID: &str = "p-55";
    const TOKEN_SECRET: &[u8] = b"token-secret";
    const FIXED_NOW: &str = "2024-01-03T00:00:00Z";

    struct TestContext {
        state: AppState,
        database: Database,
        token: String,
    }

    async fn setup_context() -> TestContext {
        let metrics = telemetry::init_metrics().expect("metrics init");
        let database = Database::connect("sqlite::memory:?cache=shared")
            .await
            .expect("connect");
        database.run_migrations().await.expect("migrations");

        let now: DateTime<Utc> = FIXED_NOW.parse().expect("fixed time");
        database
            .partners()
            .insert(&NewPartner {
                id: PARTNER_ID,
                display_name: "Rhythm Energy",
                created_at: now,
            })
            .await
            .expect("insert partner");

        let delivery = DeliveryClient::new(reqwest::Client::new(), Duration::from_millis(500));
        let state = AppState::new(metrics, database.clone(), TOKEN_SECRET, delivery)
            .with_clock(Arc::new(move || now));

        let token = encode(
            &Header::default(),
            &PartnerClaims {
                sub: PARTNER_ID.to_string(),
                exp: now.timestamp() + 3600,
            },
            &EncodingKey::from_secret(TOKEN_SECRET),
        )
        .expect("token encodes");

        TestContext {
            state,
            database,
            token,
        }
    }

    async fn seed_record(
        database: &Database,
        id: &str,
        created_at: &str,
        outcome: Outcome,
        pricing: Option<f64>,
    ) {
        let payload = match pricing {
            Some(amount) => json!({
                "event": "request.authorized",
                "transactionId": format!("T-{id}"),
                "pricing": amount
            }),
            None => json!({
                "event": "request.declined",
                "transactionId": format!("T-{id}")
            }),
        };
        database
            .delivery_log()
            .insert(NewDeliveryRecord {
                id: Cow::Owned(id.to_string()),
                partner_id: Cow::Borrowed(PARTNER_ID),
                event_type: Cow::Owned(payload["event"].as_str().unwrap().to_string()),
                payload_json: Cow::Owned(payload.to_string()),
                direction: Direction::Inbound,
                outcome,
                status_code: Some(if outcome.is_success() { 200 } else { 401 }),
                error_detail: (!outcome.is_success()).then(|| Cow::Borrowed("unauthenticated")),
                created_at: created_at.parse().expect("timestamp"),
            })
            .await
            .expect("seed record");
    }

    async fn seed_scenario(database: &Database) {
        seed_record(database, "a", "2024-01-01T09:00:00Z", Outcome::Success, Some(50.0)).await;
        seed_record(database, "b", "2024-01-01T10:00:00Z", Outcome::Success, Some(70.0)).await;
        seed_record(database, "c", "2024-01-02T09:00:00Z", Outcome::Success, Some(30.0)).await;
        seed_record(database, "d", "2024-01-02T10:00:00Z", Outcome::Failure, None).await;
    }

    async fn get(state: AppState, uri: &str, token: Option<&str>) -> Response {
        let mut request = Request::builder().method(Method::GET).uri(uri);
        if let Some(token) = token {
            request = request.header(
                axum::http::header::AUTHORIZATION,
                format!("Bearer {token}"),
            );
        }
        app_router(state)
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .expect("response")
    }

    async fn json_body(response: Response) -> Value {
        let collected = response.into_body().collect().await.expect("body");
        serde_json::from_slice(&collected.to_bytes()).expect("json")
    }

    #[tokio::test]
    async fn aggregates_the_dashboard_scenario() {
        let ctx = setup_context().await;
        seed_scenario(&ctx.database).await;

        let response = get(
            ctx.state.clone(),
            "/api/partner/stats?start=2024-01-01&end=2024-01-02",
            Some(&ctx.token),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;

        assert_eq!(body["totals"]["count"], json!(4));
        assert_eq!(body["totals"]["revenue"], json!(150.0));
        assert_eq!(body["successRate"], json!(75.0));
        assert_eq!(body["errorRate"], json!(25.0));

        let volume = body["volumeSeries"].as_array().expect("series");
        assert_eq!(volume.len(), 2);
        assert_eq!(volume[0]["day"], json!("2024-01-01"));
        assert_eq!(volume[0]["count"], json!(2));
        assert_eq!(volume[1]["count"], json!(2));

        let revenue = body["revenueSeries"].as_array().expect("series");
        assert_eq!(revenue[0]["amount"], json!(120.0));
        assert_eq!(revenue[1]["amount"], json!(30.0));

        assert_eq!(body["headline"]["housesServed"], json!(4));
        assert_eq!(body["headline"]["webhookSuccessRate"], json!(75.0));
    }

    #[tokio::test]
    async fn stats_without_records_returns_zero_rates() {
        let ctx = setup_context().await;

        let response = get(ctx.state.clone(), "/api/partner/stats", Some(&ctx.token)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;

        assert_eq!(body["totals"]["count"], json!(0));
        assert_eq!(body["successRate"], json!(0.0));
        assert_eq!(body["errorRate"], json!(0.0));
        assert!(body["volumeSeries"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn inverted_range_is_a_client_error() {
        let ctx = setup_context().await;
        seed_scenario(&ctx.database).await;

        let response = get(
            ctx.state.clone(),
            "/api/partner/stats?start=2024-01-02&end=2024-01-01",
            Some(&ctx.token),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["type"], json!("invalid_range"));
    }

    #[tokio::test]
    async fn half_open_range_is_rejected() {
        let ctx = setup_context().await;

        let response = get(
            ctx.state.clone(),
            "/api/partner/stats?start=2024-01-01",
            Some(&ctx.token),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stats_are_stable_across_repeated_reads() {
        let ctx = setup_context().await;
        seed_scenario(&ctx.database).await;

        let first = json_body(get(ctx.state.clone(), "/api/partner/stats", Some(&ctx.token)).await)
            .await;
        let second =
            json_body(get(ctx.state.clone(), "/api/partner/stats", Some(&ctx.token)).await).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn logs_page_is_reverse_chronological() {
        let ctx = setup_context().await;
        seed_scenario(&ctx.database).await;

        let response = get(
            ctx.state.clone(),
            "/api/partner/logs?page=1&per_page=3",
            Some(&ctx.token),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;

        assert_eq!(body["total"], json!(4));
        let records = body["records"].as_array().expect("records");
        assert_eq!(records.len(), 3);
        assert_eq!(records[0]["id"], json!("d"));
        assert_eq!(records[0]["outcome"], json!("failure"));
        assert_eq!(records[0]["errorDetail"], json!("unauthenticated"));
        assert_eq!(records[2]["id"], json!("b"));
        // Raw payload is carried for drill-down.
        assert_eq!(records[2]["payload"]["pricing"], json!(70.0));

        let response = get(
            ctx.state.clone(),
            "/api/partner/logs?page=2&per_page=3",
            Some(&ctx.token),
        )
        .await;
        let body = json_body(response).await;
        let records = body["records"].as_array().expect("records");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["id"], json!("a"));
    }

    #[tokio::test]
    async fn stats_requires_token() {
        let ctx = setup_context().await;
        let response = get(ctx.state.clone(), "/api/partner/stats", None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
