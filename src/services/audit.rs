//! Audit trail for admin mutations.
//!
//! DESIGN
//! ======
//! Every admin action that moves money or changes a member's standing
//! writes one `audit_logs` row: who, what, on which target, plus a small
//! JSON payload. Routes write the row with `record_best_effort` once the
//! mutation has committed, so a failed audit write is logged and never
//! undoes or fails the change itself. `record` takes any executor and
//! returns the error for callers that need it.

use sqlx::{PgExecutor, PgPool, QueryBuilder};
use uuid::Uuid;

use crate::models::AuditLog;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

/// One audit row to write.
#[derive(Debug, Clone)]
pub struct AuditEntry<'a> {
    pub actor_id: Option<Uuid>,
    pub action: &'a str,
    pub target_type: &'a str,
    pub target_id: Option<Uuid>,
    pub metadata: serde_json::Value,
}

impl<'a> AuditEntry<'a> {
    #[must_use]
    pub fn new(actor_id: Uuid, action: &'a str, target_type: &'a str, target_id: Uuid) -> Self {
        Self {
            actor_id: Some(actor_id),
            action,
            target_type,
            target_id: Some(target_id),
            metadata: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// # Errors
///
/// Returns a database error if the insert fails.
pub async fn record<'e, E>(executor: E, entry: &AuditEntry<'_>) -> Result<(), sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO audit_logs (id, actor_id, action, target_type, target_id, metadata)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(Uuid::new_v4())
    .bind(entry.actor_id)
    .bind(entry.action)
    .bind(entry.target_type)
    .bind(entry.target_id)
    .bind(&entry.metadata)
    .execute(executor)
    .await?;
    Ok(())
}

/// Write an audit row outside any transaction; failures are logged, not raised.
pub async fn record_best_effort(pool: &PgPool, entry: &AuditEntry<'_>) {
    if let Err(e) = record(pool, entry).await {
        tracing::warn!(error = %e, action = entry.action, "audit write failed");
    }
}

// =============================================================================
// QUERIES
// =============================================================================

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditFilter {
    pub actor: Option<Uuid>,
    pub action: Option<String>,
    pub target_type: Option<String>,
    pub target_id: Option<Uuid>,
    pub page: Option<i64>,
    pub size: Option<i64>,
}

impl AuditFilter {
    /// `(limit, offset)` with the page size clamped to `1..=200`.
    #[must_use]
    pub fn limit_offset(&self) -> (i64, i64) {
        let size = self.size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let page = self.page.unwrap_or(0).max(0);
        (size, page.saturating_mul(size))
    }
}

/// Newest-first page of audit rows matching every filter that is set.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn list(pool: &PgPool, filter: &AuditFilter) -> Result<Vec<AuditLog>, sqlx::Error> {
    let mut builder = QueryBuilder::new(
        "SELECT id, actor_id, action, target_type, target_id, metadata, created_at FROM audit_logs WHERE TRUE",
    );
    if let Some(actor) = filter.actor {
        builder.push(" AND actor_id = ").push_bind(actor);
    }
    if let Some(action) = filter.action.as_deref().filter(|s| !s.trim().is_empty()) {
        builder.push(" AND action = ").push_bind(action.trim().to_owned());
    }
    if let Some(target_type) = filter.target_type.as_deref().filter(|s| !s.trim().is_empty()) {
        builder.push(" AND target_type = ").push_bind(target_type.trim().to_owned());
    }
    if let Some(target_id) = filter.target_id {
        builder.push(" AND target_id = ").push_bind(target_id);
    }
    let (limit, offset) = filter.limit_offset();
    builder
        .push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);

    builder.build_query_as::<AuditLog>().fetch_all(pool).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_clamped() {
        let filter = AuditFilter { size: Some(10_000), page: Some(2), ..AuditFilter::default() };
        assert_eq!(filter.limit_offset(), (200, 400));
        let filter = AuditFilter { size: Some(0), page: Some(-3), ..AuditFilter::default() };
        assert_eq!(filter.limit_offset(), (1, 0));
        assert_eq!(AuditFilter::default().limit_offset(), (50, 0));
    }

    #[test]
    fn entry_defaults_to_empty_metadata() {
        let entry = AuditEntry::new(Uuid::nil(), "WALLET_TOPUP", "USER", Uuid::nil());
        assert_eq!(entry.metadata, serde_json::json!({}));
        let entry = entry.with_metadata(serde_json::json!({ "amount_cents": 500 }));
        assert_eq!(entry.metadata["amount_cents"], 500);
    }

    #[cfg(feature = "live-db-tests")]
    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL/live Postgres"]
    async fn list_filters_by_action_newest_first() {
        let pool = crate::db::test_db::integration_pool().await;
        let actor = Uuid::new_v4();
        for action in ["A", "B", "A"] {
            record(&pool, &AuditEntry::new(actor, action, "USER", Uuid::new_v4())).await.unwrap();
        }
        let filter = AuditFilter { action: Some("A".into()), ..AuditFilter::default() };
        let rows = list(&pool, &filter).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].created_at >= rows[1].created_at);
    }
}
