use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

const SCHEME_PREFIX: &str = "sha256=";

/// Computes the `X-HouseTabz-Signature` value for a payload.
///
/// The MAC covers the exact bytes that go on the wire. Callers must sign the
/// serialized body they transmit, never a re-serialized copy, so both sides
/// agree without canonicalization.
pub fn sign(secret: &[u8], payload: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret).expect("hmac accepts keys of any length");
    mac.update(payload);
    format!("{SCHEME_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}

/// Verifies a signature header against the raw payload bytes and secret.
///
/// Comparison is constant-time; verification is stateless and mutates nothing.
pub fn verify(secret: &[u8], payload: &[u8], provided: &str) -> Result<(), SignatureError> {
    let hex_part = provided
        .strip_prefix(SCHEME_PREFIX)
        .ok_or(SignatureError::MissingPrefix)?;
    let provided_bytes = hex::decode(hex_part).map_err(|_| SignatureError::InvalidEncoding)?;

    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret).expect("hmac accepts keys of any length");
    mac.update(payload);
    let expected = mac.finalize().into_bytes();
    let expected_bytes: &[u8] = expected.as_ref();

    if expected_bytes.ct_eq(provided_bytes.as_slice()).into() {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Reasons a provided signature fails verification.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature must start with '{SCHEME_PREFIX}'")]
    MissingPrefix,
    #[error("signature is not valid hex")]
    InvalidEncoding,
    #[error("signature mismatch")]
    Mismatch,
}
