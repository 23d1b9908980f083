use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

/// key: audit-log-entry
/// Append-only record of tenant-visible actions: generations, activations, repairs.
#[derive(Clone, Debug)]
pub struct AuditEntry {
    pub organization_id: Uuid,
    pub actor_id: String,
    pub action: &'static str,
    pub entity: &'static str,
    pub entity_id: Option<String>,
    pub meta: Value,
}

#[derive(Clone, Debug, Serialize, FromRow)]
pub struct AuditLog {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub actor_id: String,
    pub action: String,
    pub entity: String,
    pub entity_id: Option<String>,
    pub meta: Value,
    pub occurred_at: DateTime<Utc>,
}

/// Appends on the caller's connection so the entry commits or rolls back with the
/// surrounding transaction.
pub async fn record(conn: &mut PgConnection, entry: AuditEntry) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO audit_logs (id, organization_id, actor_id, action, entity, entity_id, meta) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(Uuid::new_v4())
    .bind(entry.organization_id)
    .bind(&entry.actor_id)
    .bind(entry.action)
    .bind(entry.entity)
    .bind(&entry.entity_id)
    .bind(&entry.meta)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn recent_for_organization(
    pool: &PgPool,
    organization_id: Uuid,
    action: Option<&str>,
    limit: i64,
) -> sqlx::Result<Vec<AuditLog>> {
    let mut builder = sqlx::QueryBuilder::new("SELECT * FROM audit_logs WHERE organization_id = ");
    builder.push_bind(organization_id);
    if let Some(action) = action {
        builder.push(" AND action = ");
        builder.push_bind(action);
    }
    builder.push(" ORDER BY occurred_at DESC LIMIT ");
    builder.push_bind(limit);
    builder.build_query_as::<AuditLog>().fetch_all(pool).await
}
