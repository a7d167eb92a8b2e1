//! User service: identity sync, profile edits and admin member management.
//!
//! DESIGN
//! ======
//! Users are keyed by email. A verified bearer token is mapped onto a row
//! by `find_or_create_from_claims`: the first request from a new identity
//! creates the member, later requests fill in missing fields and lift the
//! stored role when the token carries more privilege. The stored role is
//! never lowered from a token, so an ADMIN demoted in the identity provider
//! keeps admin rights here until changed explicitly.

use std::collections::BTreeSet;

use sqlx::{PgConnection, PgPool};
use tracing::info;
use uuid::Uuid;

use crate::models::{Role, USER_COLUMNS, User, UserStatus};
use crate::services::auth::{TokenClaims, resolve_role};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum UserError {
    #[error("user not found: {0}")]
    NotFound(Uuid),
    #[error("email already in use: {0}")]
    DuplicateEmail(String),
    #[error("{0}")]
    Invalid(&'static str),
    #[error("admin users cannot be deleted")]
    AdminProtected,
    #[error("trainer is still assigned to classes")]
    TrainerHasClasses,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::error::ErrorCode for UserError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_USER_NOT_FOUND",
            Self::DuplicateEmail(_) => "E_DUPLICATE_EMAIL",
            Self::Invalid(_) => "E_INVALID_INPUT",
            Self::AdminProtected => "E_ADMIN_PROTECTED",
            Self::TrainerHasClasses => "E_TRAINER_HAS_CLASSES",
            Self::Database(_) => "E_DATABASE",
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub role: Option<Role>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Partial per-kind cost update; `None` leaves the stored value alone.
#[derive(Debug, Clone, Copy, Default, serde::Deserialize)]
pub struct BaseCostsUpdate {
    pub group_base_cost_cents: Option<i64>,
    pub small_group_base_cost_cents: Option<i64>,
    pub personal_base_cost_cents: Option<i64>,
    pub open_gym_base_cost_cents: Option<i64>,
}

impl BaseCostsUpdate {
    fn validate(&self) -> Result<(), UserError> {
        let all = [
            self.group_base_cost_cents,
            self.small_group_base_cost_cents,
            self.personal_base_cost_cents,
            self.open_gym_base_cost_cents,
        ];
        if all.iter().flatten().any(|c| *c < 0) {
            return Err(UserError::Invalid("base cost must not be negative"));
        }
        Ok(())
    }
}

/// Stored role after a login: the token may raise it, never lower it.
#[must_use]
pub fn synced_role(stored: Role, from_token: Role) -> Role {
    stored.max(from_token)
}

fn blank_to_none(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error().is_some_and(|db| db.is_unique_violation())
}

// =============================================================================
// IDENTITY
// =============================================================================

/// Map verified token claims onto a user row, creating it on first sight.
///
/// # Errors
///
/// Returns a database error if the lookup or write fails.
pub async fn find_or_create_from_claims(
    pool: &PgPool,
    claims: &TokenClaims,
    roles: &BTreeSet<Role>,
) -> Result<User, UserError> {
    let email = claims.email_or_fallback();
    let name = claims.display_name(&email);
    let token_role = resolve_role(roles);
    let subject = blank_to_none(Some(claims.sub.as_str()));

    if let Some(existing) = find_by_email(pool, &email).await? {
        let role = synced_role(existing.role, token_role);
        let sql = format!(
            "UPDATE users
             SET subject = COALESCE(NULLIF(subject, ''), $2),
                 name = CASE WHEN btrim(name) = '' THEN $3 ELSE name END,
                 role = $4,
                 updated_at = now()
             WHERE id = $1
             RETURNING {USER_COLUMNS}"
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(existing.id)
            .bind(subject)
            .bind(&name)
            .bind(role)
            .fetch_one(pool)
            .await?;
        if role != existing.role {
            info!(user_id = %user.id, from = %existing.role, to = %role, "user role raised from token");
        }
        return Ok(user);
    }

    let sql = format!(
        "INSERT INTO users (id, subject, name, email, role, auth_provider)
         VALUES ($1, $2, $3, $4, $5, 'KEYCLOAK')
         ON CONFLICT (email) DO UPDATE SET updated_at = now()
         RETURNING {USER_COLUMNS}"
    );
    let user = sqlx::query_as::<_, User>(&sql)
        .bind(Uuid::new_v4())
        .bind(subject)
        .bind(&name)
        .bind(&email)
        .bind(token_role)
        .fetch_one(pool)
        .await?;
    info!(user_id = %user.id, role = %user.role, "user created from token");
    Ok(user)
}

// =============================================================================
// QUERIES
// =============================================================================

/// # Errors
///
/// `NotFound` when no row has this id.
pub async fn get(pool: &PgPool, id: Uuid) -> Result<User, UserError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
    sqlx::query_as::<_, User>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(UserError::NotFound(id))
}

/// Lock a user row for the rest of the transaction.
///
/// # Errors
///
/// `NotFound` when no row has this id.
pub async fn lock(conn: &mut PgConnection, id: Uuid) -> Result<User, UserError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1 FOR UPDATE");
    sqlx::query_as::<_, User>(&sql)
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or(UserError::NotFound(id))
}

/// # Errors
///
/// Returns a database error if the query fails.
pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<User>, UserError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1)");
    Ok(sqlx::query_as::<_, User>(&sql).bind(email.trim()).fetch_optional(pool).await?)
}

/// # Errors
///
/// Returns a database error if the query fails.
pub async fn exists_by_email(pool: &PgPool, email: &str) -> Result<bool, UserError> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE lower(email) = lower($1))")
        .bind(email.trim())
        .fetch_one(pool)
        .await?;
    Ok(exists)
}

/// # Errors
///
/// Returns a database error if the query fails.
pub async fn list_by_role(pool: &PgPool, role: Role) -> Result<Vec<User>, UserError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE role = $1 ORDER BY name");
    Ok(sqlx::query_as::<_, User>(&sql).bind(role).fetch_all(pool).await?)
}

/// Case-insensitive substring match on name or email. Blank queries match nothing.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn search(pool: &PgPool, query: &str) -> Result<Vec<User>, UserError> {
    let Some(query) = blank_to_none(Some(query)) else {
        return Ok(Vec::new());
    };
    let pattern = format!("%{}%", escape_like(query));
    let sql = format!(
        "SELECT {USER_COLUMNS} FROM users
         WHERE name ILIKE $1 ESCAPE '\\' OR email ILIKE $1 ESCAPE '\\'
         ORDER BY name
         LIMIT 100"
    );
    Ok(sqlx::query_as::<_, User>(&sql).bind(pattern).fetch_all(pool).await?)
}

/// Escape `%`, `_` and `\` so user input matches literally inside `ILIKE`.
#[must_use]
pub fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

// =============================================================================
// MUTATIONS
// =============================================================================

/// Admin-side user creation.
///
/// # Errors
///
/// `DuplicateEmail` when the email is taken; `Invalid` on blank fields.
pub async fn create(pool: &PgPool, input: &NewUser) -> Result<User, UserError> {
    let name = blank_to_none(Some(input.name.as_str())).ok_or(UserError::Invalid("name is required"))?;
    let email = blank_to_none(Some(input.email.as_str())).ok_or(UserError::Invalid("email is required"))?;
    if exists_by_email(pool, email).await? {
        return Err(UserError::DuplicateEmail(email.to_owned()));
    }

    let sql = format!(
        "INSERT INTO users (id, name, email, role, auth_provider)
         VALUES ($1, $2, $3, $4, 'LOCAL')
         RETURNING {USER_COLUMNS}"
    );
    sqlx::query_as::<_, User>(&sql)
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(email)
        .bind(input.role.unwrap_or(Role::Member))
        .fetch_one(pool)
        .await
        .map_err(|e| if is_unique_violation(&e) { UserError::DuplicateEmail(email.to_owned()) } else { e.into() })
}

/// # Errors
///
/// `NotFound`, or `DuplicateEmail` when the new email belongs to someone else.
pub async fn update(pool: &PgPool, id: Uuid, input: &UserUpdate) -> Result<User, UserError> {
    let email = blank_to_none(input.email.as_deref());
    let sql = format!(
        "UPDATE users
         SET name = COALESCE($2, name), email = COALESCE($3, email), updated_at = now()
         WHERE id = $1
         RETURNING {USER_COLUMNS}"
    );
    sqlx::query_as::<_, User>(&sql)
        .bind(id)
        .bind(blank_to_none(input.name.as_deref()))
        .bind(email)
        .fetch_optional(pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                UserError::DuplicateEmail(email.unwrap_or_default().to_owned())
            } else {
                e.into()
            }
        })?
        .ok_or(UserError::NotFound(id))
}

/// Self-service edit of display name and avatar.
///
/// # Errors
///
/// `NotFound` when the user vanished.
pub async fn update_profile(pool: &PgPool, id: Uuid, input: &ProfileUpdate) -> Result<User, UserError> {
    let sql = format!(
        "UPDATE users
         SET name = COALESCE($2, name), avatar_url = COALESCE($3, avatar_url), updated_at = now()
         WHERE id = $1
         RETURNING {USER_COLUMNS}"
    );
    sqlx::query_as::<_, User>(&sql)
        .bind(id)
        .bind(blank_to_none(input.name.as_deref()))
        .bind(blank_to_none(input.avatar_url.as_deref()))
        .fetch_optional(pool)
        .await?
        .ok_or(UserError::NotFound(id))
}

/// Delete without the admin-panel guards. Class instances are the only rows
/// that keep a user from being deleted.
///
/// # Errors
///
/// `NotFound` when no row was removed, `TrainerHasClasses` when a class
/// instance still references the user.
pub async fn delete(pool: &PgPool, id: Uuid) -> Result<(), UserError> {
    let result = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => UserError::TrainerHasClasses,
            other => other.into(),
        })?;
    if result.rows_affected() == 0 {
        return Err(UserError::NotFound(id));
    }
    Ok(())
}

/// Delete with the admin-panel guards: admins are protected and trainers
/// must be unassigned from every class first.
///
/// # Errors
///
/// `AdminProtected`, `TrainerHasClasses` or `NotFound`.
pub async fn delete_user_checked(pool: &PgPool, id: Uuid) -> Result<(), UserError> {
    let user = get(pool, id).await?;
    match user.role {
        Role::Admin => return Err(UserError::AdminProtected),
        Role::Trainer => {
            let assigned: bool = sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM class_instances WHERE trainer_id = $1)
                     OR EXISTS (SELECT 1 FROM class_types WHERE trainer_id = $1)",
            )
            .bind(id)
            .fetch_one(pool)
            .await?;
            if assigned {
                return Err(UserError::TrainerHasClasses);
            }
        }
        Role::Member => {}
    }
    delete(pool, id).await?;
    info!(user_id = %id, role = %user.role, "user deleted");
    Ok(())
}

/// Set the legacy flat base cost.
///
/// # Errors
///
/// `Invalid` for negative cost, `NotFound` for unknown users.
pub async fn set_base_cost(pool: &PgPool, id: Uuid, cents: i64) -> Result<User, UserError> {
    if cents < 0 {
        return Err(UserError::Invalid("base cost must not be negative"));
    }
    let sql =
        format!("UPDATE users SET base_cost_cents = $2, updated_at = now() WHERE id = $1 RETURNING {USER_COLUMNS}");
    sqlx::query_as::<_, User>(&sql)
        .bind(id)
        .bind(cents)
        .fetch_optional(pool)
        .await?
        .ok_or(UserError::NotFound(id))
}

/// Update only the per-kind costs present in `input`.
///
/// # Errors
///
/// `Invalid` for negative costs, `NotFound` for unknown users.
pub async fn set_base_costs(pool: &PgPool, id: Uuid, input: &BaseCostsUpdate) -> Result<User, UserError> {
    input.validate()?;
    let sql = format!(
        "UPDATE users
         SET group_base_cost_cents = COALESCE($2, group_base_cost_cents),
             small_group_base_cost_cents = COALESCE($3, small_group_base_cost_cents),
             personal_base_cost_cents = COALESCE($4, personal_base_cost_cents),
             open_gym_base_cost_cents = COALESCE($5, open_gym_base_cost_cents),
             updated_at = now()
         WHERE id = $1
         RETURNING {USER_COLUMNS}"
    );
    sqlx::query_as::<_, User>(&sql)
        .bind(id)
        .bind(input.group_base_cost_cents)
        .bind(input.small_group_base_cost_cents)
        .bind(input.personal_base_cost_cents)
        .bind(input.open_gym_base_cost_cents)
        .fetch_optional(pool)
        .await?
        .ok_or(UserError::NotFound(id))
}

/// # Errors
///
/// `Invalid` for negative counts, `NotFound` for unknown users.
pub async fn set_bonus_days(pool: &PgPool, id: Uuid, bonus_days: i32) -> Result<User, UserError> {
    if bonus_days < 0 {
        return Err(UserError::Invalid("bonus days must not be negative"));
    }
    let sql = format!("UPDATE users SET bonus_days = $2, updated_at = now() WHERE id = $1 RETURNING {USER_COLUMNS}");
    sqlx::query_as::<_, User>(&sql)
        .bind(id)
        .bind(bonus_days)
        .fetch_optional(pool)
        .await?
        .ok_or(UserError::NotFound(id))
}

/// Make a member a trainer. Admins keep their role.
///
/// # Errors
///
/// `NotFound` for unknown users.
pub async fn promote_to_trainer(pool: &PgPool, id: Uuid) -> Result<User, UserError> {
    let user = get(pool, id).await?;
    let role = synced_role(user.role, Role::Trainer);
    let sql = format!("UPDATE users SET role = $2, updated_at = now() WHERE id = $1 RETURNING {USER_COLUMNS}");
    let user = sqlx::query_as::<_, User>(&sql).bind(id).bind(role).fetch_one(pool).await?;
    info!(user_id = %id, role = %user.role, "user promoted");
    Ok(user)
}

/// Whether the user may place bookings at all.
#[must_use]
pub fn can_book(user: &User) -> bool {
    user.status == UserStatus::Active && !user.booking_blocked
}

#[cfg(test)]
#[path = "users_test.rs"]
mod tests;
