use std::time::Duration;

use reqwest::Client;
use url::Url;

/// Header carrying the HMAC signature on outbound deliveries.
pub const SIGNATURE_HEADER: &str = "X-HouseTabz-Signature";

/// Client that POSTs signed webhook events to a partner's configured URL.
///
/// The client performs exactly one attempt per call and enforces the
/// response-time budget through a per-request timeout. Retry ownership
/// belongs to the platform-side caller of the dispatch API, never this layer.
#[derive(Clone)]
pub struct DeliveryClient {
    http: Client,
    timeout: Duration,
}

impl DeliveryClient {
    /// Creates a new delivery client with the provided per-attempt timeout.
    pub fn new(http: Client, timeout: Duration) -> Self {
        Self { http, timeout }
    }

    /// Delivers one signed payload and classifies the receiver's response.
    ///
    /// The body must be the exact byte string the signature was computed
    /// over; it is forwarded verbatim.
    pub async fn deliver(&self, target: &Url, signature: &str, body: String) -> DeliveryAttempt {
        let result = self
            .http
            .post(target.clone())
            .timeout(self.timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status().as_u16();
                if response.status().is_success() {
                    DeliveryAttempt::Delivered { status }
                } else {
                    DeliveryAttempt::Rejected { status }
                }
            }
            Err(err) if err.is_timeout() => DeliveryAttempt::TimedOut,
            Err(err) => DeliveryAttempt::Failed {
                detail: err.to_string(),
            },
        }
    }
}

/// Result of one outbound delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryAttempt {
    /// Receiver acknowledged with a 2xx status.
    Delivered { status: u16 },
    /// Receiver responded with a non-2xx status.
    Rejected { status: u16 },
    /// No response within the configured budget.
    TimedOut,
    /// Transport-level failure (DNS, refused connection, TLS).
    Failed { detail: String },
}

impl DeliveryAttempt {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    /// HTTP status observed on the wire, when one exists.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Delivered { status } | Self::Rejected { status } => Some(*status),
            Self::TimedOut | Self::Failed { .. } => None,
        }
    }

    /// Failure detail suitable for the delivery record, `None` on success.
    pub fn error_detail(&self) -> Option<String> {
        match self {
            Self::Delivered { .. } => None,
            Self::Rejected { status } => Some(format!("receiver responded with status {status}")),
            Self::TimedOut => Some("delivery timed out".to_string()),
            Self::Failed { detail } => Some(detail.clone()),
        }
    }
}
