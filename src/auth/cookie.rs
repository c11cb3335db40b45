//! Signed cookie codec.
//!
//! Format: `<base64url(payload)>.<base64url(HMAC-SHA256(secret, payload))>`.
//!
//! Every failure maps to the same [`CookieError::Invalid`]; callers cannot
//! tell a bad signature from a garbled payload.

use axum::http::header::COOKIE;
use axum::http::HeaderMap;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CookieError {
    #[error("cookie rejected")]
    Invalid,
}

fn mac(secret: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Sign `payload` with `secret`.
pub fn sign(payload: &[u8], secret: &[u8]) -> String {
    format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(payload),
        URL_SAFE_NO_PAD.encode(mac(secret, payload))
    )
}

/// Verify a signed value and return its payload.
pub fn verify(value: &str, secret: &[u8]) -> Result<Vec<u8>, CookieError> {
    let (payload, signature) = value.split_once('.').ok_or(CookieError::Invalid)?;
    let payload = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| CookieError::Invalid)?;
    let signature = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| CookieError::Invalid)?;

    let expected = mac(secret, &payload);
    if bool::from(expected.ct_eq(&signature)) {
        Ok(payload)
    } else {
        Err(CookieError::Invalid)
    }
}

/// Serialize `value` as JSON and sign it.
pub fn encode_signed<T: Serialize>(value: &T, secret: &[u8]) -> Result<String, serde_json::Error> {
    Ok(sign(&serde_json::to_vec(value)?, secret))
}

/// Verify a signed value and deserialize its JSON payload.
pub fn decode_signed<T: DeserializeOwned>(value: &str, secret: &[u8]) -> Result<T, CookieError> {
    let payload = verify(value, secret)?;
    serde_json::from_slice(&payload).map_err(|_| CookieError::Invalid)
}

/// Value of cookie `name` across all `Cookie` headers.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key == name).then(|| value.to_string())
        })
}

/// `Set-Cookie` value for a cookie living `max_age_secs`.
pub fn build_set_cookie(name: &str, value: &str, max_age_secs: u64, secure: bool) -> String {
    let mut out = format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_secs}");
    if secure {
        out.push_str("; Secure");
    }
    out
}

/// `Set-Cookie` value removing cookie `name`.
pub fn expire_cookie(name: &str, secure: bool) -> String {
    build_set_cookie(name, "", 0, secure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUV";

    #[test]
    fn verify_accepts_own_signature() {
        let signed = sign(b"{\"sub\":\"alice\"}", SECRET);
        assert_eq!(verify(&signed, SECRET).unwrap(), b"{\"sub\":\"alice\"}");
    }

    #[test]
    fn verify_rejects_other_secret() {
        let signed = sign(b"payload", SECRET);
        assert_eq!(
            verify(&signed, b"ZYXWVUTSRQPONMLKJIHGFEDCBA987654"),
            Err(CookieError::Invalid)
        );
    }

    #[test]
    fn verify_rejects_tampering() {
        let signed = sign(b"{\"sub\":\"alice\"}", SECRET);
        let (_, signature) = signed.split_once('.').unwrap();
        let forged = format!("{}.{}", URL_SAFE_NO_PAD.encode(b"{\"sub\":\"mallory\"}"), signature);
        assert_eq!(verify(&forged, SECRET), Err(CookieError::Invalid));

        let truncated = &signed[..signed.len() - 2];
        assert_eq!(verify(truncated, SECRET), Err(CookieError::Invalid));
    }

    #[test]
    fn malformed_values_fail_identically() {
        for value in ["", "no-dot", "!!!.???", "a.b.c"] {
            assert_eq!(verify(value, SECRET), Err(CookieError::Invalid), "{value}");
        }
    }

    #[test]
    fn typed_roundtrip() {
        let signed = encode_signed(&vec![1u32, 2, 3], SECRET).unwrap();
        let decoded: Vec<u32> = decode_signed(&signed, SECRET).unwrap();
        assert_eq!(decoded, vec![1, 2, 3]);
    }

    #[test]
    fn finds_cookie_among_headers() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("a=1; theme=dark"));
        headers.append(COOKIE, HeaderValue::from_static("_pbprox=abc.def"));
        assert_eq!(cookie_value(&headers, "_pbprox").as_deref(), Some("abc.def"));
        assert_eq!(cookie_value(&headers, "theme").as_deref(), Some("dark"));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn set_cookie_attributes() {
        assert_eq!(
            build_set_cookie("s", "v", 60, true),
            "s=v; Path=/; HttpOnly; SameSite=Lax; Max-Age=60; Secure"
        );
        assert_eq!(
            expire_cookie("s", false),
            "s=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"
        );
    }
}
