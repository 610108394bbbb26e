use crate::errors::ApiError;
use axum::http::HeaderMap;

pub const ADMIN_TOKEN_HEADER: &str = "x-auth-token";

/// Compares two secrets without short-circuiting on the first mismatch.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Guards device registry mutations.
pub fn require_admin_token(headers: &HeaderMap, expected: &str) -> Result<(), ApiError> {
    let presented = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok());

    match presented {
        Some(token) if constant_time_eq(token, expected) => Ok(()),
        _ => Err(ApiError::Forbidden(
            "Missing or invalid X-Auth-Token.".to_string(),
        )),
    }
}
