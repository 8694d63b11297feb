use axum::{extract::{FromRef, FromRequestParts}, http::{header::AUTHORIZATION, request::Parts}};

use crate::AppError;

use super::{Principal, Tokens, VerifyError};

/// Principal of a request carrying `Authorization: Bearer <access token>`.
pub struct AuthUser(pub Principal);

pub(crate) fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then_some(token.trim())
}

impl<S> FromRequestParts<S> for AuthUser
where
    Tokens: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
            .ok_or(VerifyError::Malformed)?;

        let principal = Tokens::from_ref(state).verify(token)?;
        Ok(AuthUser(principal))
    }
}
