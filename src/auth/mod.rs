//! Caller identity.
//!
//! Authentication itself happens upstream (API gateway or session layer),
//! which forwards the resolved user id in the `x-user-id` header. Handlers
//! take [`AuthenticatedUser`] to require it, or [`AdminUser`] for store
//! settings.

use crate::{
    entities::commerce::{User, UserType},
    errors::ServiceError,
    AppState,
};
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use sea_orm::{DatabaseConnection, EntityTrait};
use tracing::warn;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser(pub Uuid);

impl AuthenticatedUser {
    pub fn id(&self) -> Uuid {
        self.0
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| ServiceError::Unauthorized("Authentication required".to_string()))?;

        raw.to_str()
            .ok()
            .and_then(|value| Uuid::parse_str(value.trim()).ok())
            .map(AuthenticatedUser)
            .ok_or_else(|| ServiceError::Unauthorized("Invalid user identity".to_string()))
    }
}

/// An authenticated caller whose user type is the configured admin type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdminUser(pub Uuid);

impl AdminUser {
    pub fn id(&self) -> Uuid {
        self.0
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthenticatedUser::from_request_parts(parts, state).await?;
        ensure_admin(&state.db, user.id(), &state.config.admin_user_type).await?;
        Ok(AdminUser(user.id()))
    }
}

/// Forbidden unless the user exists and belongs to `admin_type`.
pub async fn ensure_admin(
    db: &DatabaseConnection,
    user_id: Uuid,
    admin_type: &str,
) -> Result<(), ServiceError> {
    let is_admin = User::find_by_id(user_id)
        .find_also_related(UserType)
        .one(db)
        .await?
        .and_then(|(_, user_type)| user_type)
        .map_or(false, |t| t.name.eq_ignore_ascii_case(admin_type));

    if is_admin {
        Ok(())
    } else {
        warn!(user_id = %user_id, "Admin access denied");
        Err(ServiceError::Forbidden("Admin access required".to_string()))
    }
}
