//! Shared-credential gate for the broadcaster endpoint and the dashboard
//!
//! HTTP Basic against the single configured admin credential. With no
//! credential configured every request passes.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use subtle::ConstantTimeEq;
use tracing::warn;

use super::{AppError, AppState};

pub const REALM: &str = "PlayTogether";

/// Proof that the request passed the admin gate.
#[derive(Debug, Clone)]
pub struct AdminAuth {
    /// `None` when the gate is open.
    pub username: Option<String>,
}

impl<S> FromRequestParts<S> for AdminAuth
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let Some((username, password)) = app_state.config.auth.credential() else {
            return Ok(Self { username: None });
        };

        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .ok_or_else(|| AppError::unauthorized(REALM, "Authentication required"))?;
        let header = header
            .to_str()
            .map_err(|_| AppError::unauthorized(REALM, "Invalid Authorization header"))?;
        let (given_user, given_pass) = decode_basic(header)
            .ok_or_else(|| AppError::unauthorized(REALM, "Invalid Authorization header"))?;

        let user_ok = given_user.as_bytes().ct_eq(username.as_bytes());
        let pass_ok = given_pass.as_bytes().ct_eq(password.as_bytes());
        if !bool::from(user_ok & pass_ok) {
            warn!(username = %given_user, "Admin authentication failed");
            return Err(AppError::unauthorized(REALM, "Invalid credentials"));
        }

        Ok(Self {
            username: Some(given_user),
        })
    }
}

/// Split a `Basic <base64(user:pass)>` header value.
fn decode_basic(value: &str) -> Option<(String, String)> {
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}
