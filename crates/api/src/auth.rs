//! Caller identity.
//!
//! Authentication happens upstream; the verified user id arrives in the
//! `x-user-id` header.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use common::UserId;

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser(pub UserId);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| ApiError::Unauthorized(format!("missing {USER_ID_HEADER} header")))?;

        let user_id = value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<UserId>().ok())
            .ok_or_else(|| ApiError::Unauthorized(format!("invalid {USER_ID_HEADER} header")))?;

        Ok(CurrentUser(user_id))
    }
}
