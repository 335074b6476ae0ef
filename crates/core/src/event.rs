use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

/// Event taxonomy carried on the wire in the `event` field.
///
/// The taxonomy is versioned additively: partners switch on the string value,
/// so new types are appended and existing strings are never repurposed.
/// Unrecognized values are preserved verbatim through [`EventType::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    RequestAuthorized,
    RequestDeclined,
    BillCreated,
    PaymentAuthorized,
    Other(String),
}

impl EventType {
    /// Maps a wire string onto the taxonomy. Total: unknown strings land in
    /// [`EventType::Other`] rather than being rejected.
    pub fn parse(value: &str) -> Self {
        match value {
            "request.authorized" => Self::RequestAuthorized,
            "request.declined" => Self::RequestDeclined,
            "bill.created" => Self::BillCreated,
            "payment.authorized" => Self::PaymentAuthorized,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns the wire representation of the event type.
    pub fn as_str(&self) -> &str {
        match self {
            Self::RequestAuthorized => "request.authorized",
            Self::RequestDeclined => "request.declined",
            Self::BillCreated => "bill.created",
            Self::PaymentAuthorized => "payment.authorized",
            Self::Other(value) => value,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        if value.is_empty() {
            return Err(D::Error::custom("event type must not be empty"));
        }
        Ok(Self::parse(&value))
    }
}

/// Webhook payload shared by the one-time (`transactionId`) and
/// recurring-billing (`houseId`) event families.
///
/// Unknown fields are retained in `extra` so the payload round-trips without
/// losing partner-specific data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub event: EventType,
    pub transaction_id: String,
    #[serde(default)]
    pub pricing: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub house_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl WebhookPayload {
    /// Parses and validates a raw JSON payload received on the wire.
    pub fn parse(raw: &[u8]) -> Result<Self, PayloadError> {
        let text = std::str::from_utf8(raw).map_err(|_| PayloadError::NotUtf8)?;
        let payload: Self = serde_json::from_str(text)?;
        if payload.transaction_id.is_empty() {
            return Err(PayloadError::MissingField("transactionId"));
        }
        Ok(payload)
    }
}

/// Errors produced while decoding an incoming payload.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload must be valid UTF-8")]
    NotUtf8,
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("failed to parse payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Direction of a delivery attempt relative to this platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    /// Returns the canonical database representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

impl FromStr for Direction {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "inbound" => Ok(Self::Inbound),
            "outbound" => Ok(Self::Outbound),
            _ => Err(()),
        }
    }
}

/// Outcome of a delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl FromStr for Outcome {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            _ => Err(()),
        }
    }
}
