//! Class type catalogue (e.g. "Yoga", "Crossfit").
//!
//! Class instances borrow their display name from their type, so a type
//! cannot be deleted while any instance still references it.

use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{ClassType, Role};
use crate::services::users::{self, UserError};

const CLASS_TYPE_COLUMNS: &str = "id, name, description, trainer_id, is_active, created_at";

#[derive(Debug, thiserror::Error)]
pub enum ClassTypeError {
    #[error("class type not found: {0}")]
    NotFound(Uuid),
    #[error("class type name already exists: {0}")]
    DuplicateName(String),
    #[error("class type name is required")]
    NameRequired,
    #[error("user {0} is not a trainer")]
    NotATrainer(Uuid),
    #[error("class type is still used by scheduled classes")]
    InUse,
    #[error(transparent)]
    User(#[from] UserError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::error::ErrorCode for ClassTypeError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_CLASS_TYPE_NOT_FOUND",
            Self::DuplicateName(_) => "E_DUPLICATE_CLASS_TYPE",
            Self::NameRequired => "E_INVALID_INPUT",
            Self::NotATrainer(_) => "E_NOT_A_TRAINER",
            Self::InUse => "E_CLASS_TYPE_IN_USE",
            Self::User(e) => crate::error::ErrorCode::error_code(e),
            Self::Database(_) => "E_DATABASE",
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassTypeInput {
    pub name: String,
    pub description: Option<String>,
    pub trainer_id: Option<Uuid>,
    pub is_active: Option<bool>,
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error().is_some_and(|db| db.is_unique_violation())
}

fn clean_name(raw: &str) -> Result<&str, ClassTypeError> {
    let name = raw.trim();
    if name.is_empty() { Err(ClassTypeError::NameRequired) } else { Ok(name) }
}

/// # Errors
///
/// `NameRequired`, `NotATrainer`, `DuplicateName`, or a database error.
pub async fn create(pool: &PgPool, input: &ClassTypeInput) -> Result<ClassType, ClassTypeError> {
    let name = clean_name(&input.name)?;
    if get_by_name(pool, name).await?.is_some() {
        return Err(ClassTypeError::DuplicateName(name.to_owned()));
    }
    if let Some(trainer_id) = input.trainer_id {
        let trainer = users::get(pool, trainer_id).await?;
        if trainer.role != Role::Trainer {
            return Err(ClassTypeError::NotATrainer(trainer_id));
        }
    }

    let sql = format!(
        "INSERT INTO class_types (id, name, description, trainer_id, is_active)
         VALUES ($1, $2, $3, $4, TRUE)
         RETURNING {CLASS_TYPE_COLUMNS}"
    );
    sqlx::query_as::<_, ClassType>(&sql)
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(input.description.as_deref())
        .bind(input.trainer_id)
        .fetch_one(pool)
        .await
        .map_err(|e| if is_unique_violation(&e) { ClassTypeError::DuplicateName(name.to_owned()) } else { e.into() })
}

/// Update name and description; `is_active` only when provided.
///
/// # Errors
///
/// `NotFound`, `NameRequired`, `DuplicateName`, or a database error.
pub async fn update(pool: &PgPool, id: Uuid, input: &ClassTypeInput) -> Result<ClassType, ClassTypeError> {
    let name = clean_name(&input.name)?;
    let sql = format!(
        "UPDATE class_types
         SET name = $2, description = $3, is_active = COALESCE($4, is_active), updated_at = now()
         WHERE id = $1
         RETURNING {CLASS_TYPE_COLUMNS}"
    );
    sqlx::query_as::<_, ClassType>(&sql)
        .bind(id)
        .bind(name)
        .bind(input.description.as_deref())
        .bind(input.is_active)
        .fetch_optional(pool)
        .await
        .map_err(|e| if is_unique_violation(&e) { ClassTypeError::DuplicateName(name.to_owned()) } else { e.into() })?
        .ok_or(ClassTypeError::NotFound(id))
}

/// # Errors
///
/// `InUse` while classes reference the type, `NotFound` otherwise missing.
pub async fn delete(pool: &PgPool, id: Uuid) -> Result<(), ClassTypeError> {
    let in_use: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM class_instances WHERE class_type_id = $1)")
        .bind(id)
        .fetch_one(pool)
        .await?;
    if in_use {
        return Err(ClassTypeError::InUse);
    }
    let result = sqlx::query("DELETE FROM class_types WHERE id = $1").bind(id).execute(pool).await?;
    if result.rows_affected() == 0 {
        return Err(ClassTypeError::NotFound(id));
    }
    Ok(())
}

/// # Errors
///
/// `NotFound` when missing.
pub async fn get(pool: &PgPool, id: Uuid) -> Result<ClassType, ClassTypeError> {
    let sql = format!("SELECT {CLASS_TYPE_COLUMNS} FROM class_types WHERE id = $1");
    sqlx::query_as::<_, ClassType>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(ClassTypeError::NotFound(id))
}

/// # Errors
///
/// Returns a database error if the query fails.
pub async fn get_by_name(pool: &PgPool, name: &str) -> Result<Option<ClassType>, ClassTypeError> {
    let sql = format!("SELECT {CLASS_TYPE_COLUMNS} FROM class_types WHERE lower(name) = lower($1)");
    Ok(sqlx::query_as::<_, ClassType>(&sql).bind(name.trim()).fetch_optional(pool).await?)
}

/// # Errors
///
/// Returns a database error if the query fails.
pub async fn list(pool: &PgPool, active_only: bool) -> Result<Vec<ClassType>, ClassTypeError> {
    let sql = format!("SELECT {CLASS_TYPE_COLUMNS} FROM class_types WHERE (NOT $1 OR is_active) ORDER BY name");
    Ok(sqlx::query_as::<_, ClassType>(&sql).bind(active_only).fetch_all(pool).await?)
}

/// # Errors
///
/// Returns a database error if the query fails.
pub async fn list_by_trainer(pool: &PgPool, trainer_id: Uuid) -> Result<Vec<ClassType>, ClassTypeError> {
    let sql = format!("SELECT {CLASS_TYPE_COLUMNS} FROM class_types WHERE trainer_id = $1 ORDER BY name");
    Ok(sqlx::query_as::<_, ClassType>(&sql).bind(trainer_id).fetch_all(pool).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn blank_name_is_rejected() {
        assert!(matches!(clean_name("   "), Err(ClassTypeError::NameRequired)));
        assert_eq!(clean_name("  Yoga ").unwrap(), "Yoga");
    }

    #[test]
    fn nested_user_errors_keep_their_code() {
        let err = ClassTypeError::from(UserError::NotFound(Uuid::nil()));
        assert_eq!(err.error_code(), "E_USER_NOT_FOUND");
    }

    #[cfg(feature = "live-db-tests")]
    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL/live Postgres"]
    async fn create_requires_trainer_and_unique_name() {
        use crate::db::test_db::{integration_pool, seed_user};
        let pool = integration_pool().await;
        let member = seed_user(&pool, Role::Member, 0, 0).await;
        let trainer = seed_user(&pool, Role::Trainer, 0, 0).await;

        let bad = ClassTypeInput { name: "Yoga".into(), trainer_id: Some(member), ..ClassTypeInput::default() };
        assert!(matches!(create(&pool, &bad).await, Err(ClassTypeError::NotATrainer(_))));

        let ok = ClassTypeInput { name: "Yoga".into(), trainer_id: Some(trainer), ..ClassTypeInput::default() };
        let created = create(&pool, &ok).await.unwrap();
        assert!(created.is_active);
        assert!(matches!(create(&pool, &ok).await, Err(ClassTypeError::DuplicateName(_))));
        assert_eq!(list_by_trainer(&pool, trainer).await.unwrap().len(), 1);
    }
}
