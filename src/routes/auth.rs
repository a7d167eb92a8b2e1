//! Bearer-token authentication: extractor, role guards and `/api/auth/me`.
//!
//! DESIGN
//! ======
//! The extractor only verifies the token; it never touches the database.
//! Authorization decisions use the role carried by the token, so a route
//! can answer 401/403 before any query runs. Handlers that need the
//! caller's user row call `AuthUser::resolve`, which finds or creates it
//! from the token claims.

use std::collections::BTreeSet;

use axum::Json;
use axum::extract::{FromRef, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::models::{Role, User};
use crate::services::auth::{TokenClaims, normalize_roles, resolve_role};
use crate::services::users;
use crate::state::AppState;

use super::users::user_error;

// =============================================================================
// AUTH EXTRACTOR
// =============================================================================

/// Authenticated caller extracted from `Authorization: Bearer <jwt>`.
/// Use as a handler parameter to require authentication.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub claims: TokenClaims,
    pub roles: BTreeSet<Role>,
    pub role: Role,
}

pub(crate) fn bearer_token(parts: &Parts) -> Option<&str> {
    let header = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = header.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

impl<S> axum::extract::FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or_else(ApiError::unauthorized)?;
        let app_state = AppState::from_ref(state);
        let claims = app_state.jwt.verify(token).map_err(|e| {
            tracing::debug!(error = %e, "bearer token rejected");
            ApiError::unauthorized()
        })?;
        let roles = normalize_roles(&claims);
        let role = resolve_role(&roles);
        Ok(Self { claims, roles, role })
    }
}

impl AuthUser {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    #[must_use]
    pub fn is_staff(&self) -> bool {
        self.role.is_staff()
    }

    /// # Errors
    ///
    /// 403 unless the token carries ADMIN.
    pub fn require_admin(&self) -> ApiResult<()> {
        if self.is_admin() { Ok(()) } else { Err(ApiError::forbidden()) }
    }

    /// # Errors
    ///
    /// 403 unless the token carries ADMIN or TRAINER.
    pub fn require_staff(&self) -> ApiResult<()> {
        if self.is_staff() { Ok(()) } else { Err(ApiError::forbidden()) }
    }

    /// Load (or create on first sight) the caller's user row.
    ///
    /// # Errors
    ///
    /// 500 when the database is unavailable.
    pub async fn resolve(&self, pool: &sqlx::PgPool) -> ApiResult<User> {
        users::find_or_create_from_claims(pool, &self.claims, &self.roles).await.map_err(user_error)
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

#[derive(Serialize)]
pub struct Me {
    pub subject: String,
    pub email: String,
    pub roles: Vec<Role>,
    pub role: Role,
    pub user: User,
}

/// `GET /api/auth/me`: token identity plus the resolved user row.
pub async fn me(State(state): State<AppState>, auth: AuthUser) -> ApiResult<Json<Me>> {
    let user = auth.resolve(&state.pool).await?;
    Ok(Json(Me {
        subject: auth.claims.sub.clone(),
        email: auth.claims.email_or_fallback(),
        roles: auth.roles.iter().copied().collect(),
        role: auth.role,
        user,
    }))
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
