//! Request extractors.

use auctionhouse_core::identity::Identity;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::ApiError;

/// Header carrying the subject name asserted by the upstream gateway.
pub const AUTHENTICATED_USER_HEADER: &str = "x-authenticated-user";

/// The identity of the caller, as asserted by the gateway. Credentials are
/// validated upstream; this only reads the result.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub Identity);

impl<S: Send + Sync> FromRequestParts<S> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(AUTHENTICATED_USER_HEADER)
            .ok_or_else(|| ApiError::Unauthenticated("authentication required".into()))?;
        let subject = value
            .to_str()
            .map_err(|_| ApiError::Unauthenticated("identity header is not valid text".into()))?;
        Identity::new(subject)
            .map(Self)
            .map_err(|_| ApiError::Unauthenticated("identity header is empty".into()))
    }
}
