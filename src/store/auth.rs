//! HTTP basic authentication in front of the store's mutating routes.

use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::warn;

use crate::domain::Credentials;

/// Decode an `Authorization: Basic ...` header into username and password
pub fn parse_basic(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// Reject requests without the expected credentials with 401 and a Basic challenge
pub async fn require_basic_auth(
    State(expected): State<Credentials>,
    request: Request,
    next: Next,
) -> Response {
    match parse_basic(request.headers()) {
        Some((username, password))
            if username == expected.username && password == expected.password =>
        {
            next.run(request).await
        }
        _ => {
            warn!(path = %request.uri().path(), "rejected unauthenticated request");
            (
                StatusCode::UNAUTHORIZED,
                [(WWW_AUTHENTICATE, "Basic")],
                "Unauthorized",
            )
                .into_response()
        }
    }
}
