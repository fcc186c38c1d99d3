//! Subject extraction from id tokens
//!
//! The id token is treated as opaque apart from its payload segment. The
//! signature is not verified; the token came straight from the login
//! endpoint over TLS.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use livlink_domain::constants::{ID_TOKEN_FALLBACK_CLAIM, ID_TOKEN_SUBJECT_CLAIM};
use livlink_domain::{LivError, Result};
use serde_json::Value;

/// Read the subject identifier from an id token
///
/// Takes the second `.`-separated segment, pads it with `=` to a multiple of
/// four, decodes it as URL-safe base64 and reads `custom:user_id`, falling
/// back to `sub`.
///
/// # Errors
/// Returns [`LivError::Authentication`] for any malformed token.
pub fn subject_id(id_token: &str) -> Result<String> {
    let payload = id_token
        .split('.')
        .nth(1)
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| malformed("missing payload segment"))?;

    let mut padded = payload.to_string();
    while padded.len() % 4 != 0 {
        padded.push('=');
    }

    let bytes = URL_SAFE.decode(padded.as_bytes()).map_err(|err| malformed(&err.to_string()))?;
    let claims: Value =
        serde_json::from_slice(&bytes).map_err(|err| malformed(&err.to_string()))?;

    [ID_TOKEN_SUBJECT_CLAIM, ID_TOKEN_FALLBACK_CLAIM]
        .iter()
        .find_map(|claim| claims.get(*claim).and_then(Value::as_str))
        .filter(|subject| !subject.is_empty())
        .map(str::to_string)
        .ok_or_else(|| malformed("no subject claim"))
}

fn malformed(reason: &str) -> LivError {
    LivError::Authentication(format!("malformed id token: {reason}"))
}
