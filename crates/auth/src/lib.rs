//! HMAC-SHA256 bearer tokens scoped to one chat identity.
//!
//! Token layout: `base64url(timestamp) + "." + base64url(signature)` where
//! `signature = HMAC_SHA256(secret, owner_id || timestamp)` and both parts
//! use unpadded URL-safe base64. The token authenticates backend ↔ gateway
//! RPCs (`X-Auth-Token`) and tool-originating send requests.

use {
    base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD},
    hmac::{Hmac, Mac},
    sha2::Sha256,
    tracing::warn,
};

use larkin_common::time::unix_now;

type HmacSha256 = Hmac<Sha256>;

/// Mint a token for `owner_id` signed with `secret`, stamped with the
/// current unix time.
#[must_use]
pub fn generate_token(secret: &str, owner_id: &str) -> String {
    generate_token_at(secret, owner_id, unix_now())
}

/// Mint a token with an explicit timestamp (exposed for verification tests).
#[must_use]
pub fn generate_token_at(secret: &str, owner_id: &str, timestamp: u64) -> String {
    let ts = timestamp.to_string();
    let Some(signature) = sign(secret, owner_id, &ts) else {
        return String::new();
    };
    format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(ts.as_bytes()),
        URL_SAFE_NO_PAD.encode(signature)
    )
}

/// Verify `token` against `owner_id` and `secret`.
///
/// Returns the embedded timestamp on success, `None` on any parse or
/// signature failure. The signature comparison is constant-time.
#[must_use]
pub fn verify_token(token: &str, owner_id: &str, secret: &str) -> Option<u64> {
    if token.is_empty() {
        return None;
    }
    let (ts_b64, sig_b64) = token.split_once('.')?;
    if sig_b64.contains('.') {
        return None;
    }

    let ts_bytes = URL_SAFE_NO_PAD.decode(ts_b64).ok()?;
    let ts_str = String::from_utf8(ts_bytes).ok()?;
    let timestamp: u64 = ts_str.parse().ok()?;

    let received = URL_SAFE_NO_PAD.decode(sig_b64).ok()?;
    let mut mac = new_mac(secret)?;
    mac.update(owner_id.as_bytes());
    mac.update(ts_str.as_bytes());
    mac.verify_slice(&received).ok()?;

    Some(timestamp)
}

/// Constant-time equality for two opaque token strings.
///
/// Used by the backend's global check, where the expected value is the stored
/// token rather than a recomputed signature.
#[must_use]
pub fn tokens_match(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() || a.is_empty() {
        return false;
    }
    let diff = a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y));
    diff == 0
}

fn sign(secret: &str, owner_id: &str, timestamp: &str) -> Option<Vec<u8>> {
    let mut mac = new_mac(secret)?;
    mac.update(owner_id.as_bytes());
    mac.update(timestamp.as_bytes());
    Some(mac.finalize().into_bytes().to_vec())
}

fn new_mac(secret: &str) -> Option<HmacSha256> {
    match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => Some(mac),
        // HMAC accepts any key length; this arm is unreachable in practice.
        Err(e) => {
            warn!(error = %e, "hmac key rejected");
            None
        },
    }
}
