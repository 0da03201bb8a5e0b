//! Peeks at a JWT's `exp` claim without verifying its signature. The proxy
//! never needs to validate tokens it receives back from its own refresh
//! call; it only needs to know when to ask for a new one.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use secrecy::{ExposeSecret, SecretString};

#[derive(serde::Deserialize)]
struct Claims {
    #[serde(default)]
    exp: Option<i64>,
}

/// Returns the `exp` claim (seconds since epoch) if the token is a
/// well-formed JWT with a decodable payload, `None` otherwise.
pub fn decode_exp(token: &SecretString) -> Option<i64> {
    let token = token.expose_secret();
    let mut parts = token.split('.');
    let _header = parts.next()?;
    let payload = parts.next()?;

    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;

    claims.exp
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_payload(json: &str) -> String {
        URL_SAFE_NO_PAD.encode(json.as_bytes())
    }

    #[test]
    fn decodes_exp_from_well_formed_token() {
        let payload = encode_payload(r#"{"exp":1999999999,"sub":"u1"}"#);
        let token = SecretString::from(format!("header.{payload}.sig"));
        assert_eq!(decode_exp(&token), Some(1999999999));
    }

    #[test]
    fn returns_none_for_garbage() {
        let token = SecretString::from("not-a-jwt".to_string());
        assert_eq!(decode_exp(&token), None);
    }

    #[test]
    fn returns_none_when_exp_missing() {
        let payload = encode_payload(r#"{"sub":"u1"}"#);
        let token = SecretString::from(format!("header.{payload}.sig"));
        assert_eq!(decode_exp(&token), None);
    }
}
