// SPDX-FileCopyrightText: 2026 Paydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Webhook signature verification.
//!
//! The platform signs the raw request body with HMAC-SHA256 over the channel
//! secret and sends it base64-encoded in the `x-line-signature` header.
//! Verification is constant-time via `Mac::verify_slice`; any malformed
//! input fails closed.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verifies `signature_b64` against the raw body. Returns false on any
/// decode or key failure; never panics.
pub fn verify_signature(channel_secret: &str, body: &[u8], signature_b64: &str) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(channel_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);

    let Ok(claimed) = BASE64.decode(signature_b64) else {
        return false;
    };

    mac.verify_slice(&claimed).is_ok()
}

/// Computes the signature the platform would send for `body`. Test helper,
/// also used by gateway tests to forge valid requests.
pub fn sign(channel_secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(channel_secret.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(body);
    BASE64.encode(mac.finalize().into_bytes())
}
