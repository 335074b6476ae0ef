use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validates partner bearer tokens minted by the external auth system.
///
/// Tokens are HS256 JWTs whose `sub` claim is the partner id. Expiry is
/// checked against the caller-supplied clock so tests can pin time.
#[derive(Clone)]
pub struct PartnerTokenValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl PartnerTokenValidator {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.validate_aud = false;
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.required_spec_claims.clear();
        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Validates the token and returns the authenticated partner id.
    pub fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<String, TokenError> {
        let data = decode::<PartnerClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|err| TokenError::Invalid(format!("{err}")))?;
        let claims = data.claims;

        if claims.sub.is_empty() {
            return Err(TokenError::Invalid("missing_subject".to_string()));
        }
        if now.timestamp() >= claims.exp {
            return Err(TokenError::Invalid("token_expired".to_string()));
        }
        Ok(claims.sub)
    }
}

/// Claims carried by partner bearer tokens.
#[derive(Debug, Serialize, Deserialize)]
pub struct PartnerClaims {
    pub sub: String,
    pub exp: i64,
}

/// Errors produced during token validation.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token: {0}")]
    Invalid(String),
}

/// Extracts the bearer token from an `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
}
