use rand::rngs::OsRng;
use rand::RngCore;

/// Number of random bytes in a signing secret (256 bits).
const SECRET_LEN: usize = 32;

/// Generates a new webhook signing secret.
///
/// 32 bytes from the operating system CSPRNG, hex-encoded for safe transport
/// and display. The plaintext value is returned to the caller exactly once
/// per generation/rotation and must never be logged.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_LEN];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
