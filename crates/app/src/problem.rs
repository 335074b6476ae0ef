use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ProblemDetails {
    #[serde(rename = "type")]
    problem_type: &'static str,
    title: &'static str,
    detail: String,
}

/// RFC 7807 error response carrying the pipeline's error taxonomy.
pub struct ProblemResponse {
    status: StatusCode,
    body: ProblemDetails,
}

impl ProblemResponse {
    pub fn new<S: Into<String>>(status: StatusCode, problem_type: &'static str, detail: S) -> Self {
        Self {
            status,
            body: ProblemDetails {
                problem_type,
                title: status.canonical_reason().unwrap_or("error"),
                detail: detail.into(),
            },
        }
    }

    /// Missing credentials or signature header.
    pub fn unauthenticated<S: Into<String>>(detail: S) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthenticated", detail)
    }

    /// Signature present but failed verification.
    pub fn invalid_signature<S: Into<String>>(detail: S) -> Self {
        Self::new(StatusCode::FORBIDDEN, "invalid_signature", detail)
    }

    /// No matching partner, config, or active secret.
    pub fn unknown_partner() -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "unknown_partner",
            "no webhook configuration for this partner",
        )
    }

    /// Aggregation query with an inverted or malformed window.
    pub fn invalid_range<S: Into<String>>(detail: S) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_range", detail)
    }

    /// Durable write failed; the sender should retry.
    pub fn persistence_failure() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "persistence_failure",
            "failed to persist delivery record",
        )
    }
}

impl IntoResponse for ProblemResponse {
    fn into_response(self) -> Response {
        let mut response = Json(self.body).into_response();
        *response.status_mut() = self.status;
        response.headers_mut().insert(
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}
