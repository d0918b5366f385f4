//! HMAC-SHA256 request signing for the Bybit v5 API.

use crate::{Error, Result};
use hmac::{Hmac, KeyInit, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Sign `payload` with the API secret and return the lowercase hex digest.
#[allow(clippy::result_large_err)]
pub fn sign(api_secret: &str, payload: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(api_secret.as_bytes()).map_err(|e| Error::Signing {
        message: format!("Failed to create HMAC: {}", e),
    })?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Signature for a REST call: `timestamp + apiKey + recvWindow + payload`, where
/// payload is the query string for GET and the JSON body for POST.
#[allow(clippy::result_large_err)]
pub fn sign_rest_request(
    api_key: &str,
    api_secret: &str,
    timestamp_ms: i64,
    recv_window_ms: u64,
    payload: &str,
) -> Result<String> {
    let message = format!("{}{}{}{}", timestamp_ms, api_key, recv_window_ms, payload);
    sign(api_secret, &message)
}

/// Signature for the private WebSocket `auth` operation.
#[allow(clippy::result_large_err)]
pub fn sign_ws_auth(api_secret: &str, expires_ms: i64) -> Result<String> {
    sign(api_secret, &format!("GET/realtime{}", expires_ms))
}
