use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};

use aircast_station::{Principal, UserClaims};

use crate::{errors::ServerError, ServerContext};

fn bearer_token(parts: &Parts) -> Result<&str, ServerError> {
    let value = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|x| x.to_str().ok())
        .ok_or_else(|| ServerError::Unauthenticated("Missing authorization".to_string()))?;

    let mut words = value.split_ascii_whitespace();

    if words.next() != Some("Bearer") {
        return Err(ServerError::BadInput(
            "Authorization must be Bearer".to_string(),
        ));
    }

    words
        .next()
        .ok_or_else(|| ServerError::Unauthenticated("Missing bearer token".to_string()))
}

fn resolve(parts: &Parts, state: &ServerContext) -> Result<Principal, ServerError> {
    let context = ServerContext::from_ref(state);
    let token = bearer_token(parts)?;

    Ok(context.station.auth.resolve(token)?)
}

/// Requires an admin bearer token.
pub struct AdminPrincipal;

/// Requires the internal principal used by mixer callbacks. Enforced here
/// again even though the reverse proxy already fences the internal prefix.
pub struct InternalPrincipal;

/// Requires a user token; carries the caller's quota claims.
pub struct UserPrincipal(pub UserClaims);

#[async_trait]
impl FromRequestParts<ServerContext> for AdminPrincipal {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServerContext,
    ) -> Result<Self, Self::Rejection> {
        match resolve(parts, state)? {
            Principal::Admin => Ok(Self),
            _ => Err(ServerError::Unauthenticated(
                "Admin credentials required".to_string(),
            )),
        }
    }
}

#[async_trait]
impl FromRequestParts<ServerContext> for InternalPrincipal {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServerContext,
    ) -> Result<Self, Self::Rejection> {
        match resolve(parts, state)? {
            // Admins may also exercise the internal surface directly
            Principal::Internal | Principal::Admin => Ok(Self),
            _ => Err(ServerError::Forbidden(
                "Endpoint not allowed for this principal".to_string(),
            )),
        }
    }
}

#[async_trait]
impl FromRequestParts<ServerContext> for UserPrincipal {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServerContext,
    ) -> Result<Self, Self::Rejection> {
        match resolve(parts, state)? {
            Principal::User(claims) => Ok(Self(claims)),
            _ => Err(ServerError::Unauthenticated(
                "User credentials required".to_string(),
            )),
        }
    }
}
