//! Shared-secret and nonce generation

use rand::RngCore;

/// Generate a 256-bit hex token for cluster/node authentication.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Generate a random request nonce (128-bit, hex).
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
