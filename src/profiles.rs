use axum::{extract::Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json as SqlJson, FromRow, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;
use crate::organizations::resolve_tenant;

/// Targeting criteria of an ideal customer profile. Empty lists mean "any".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IcpFilters {
    #[serde(default)]
    pub industries: Vec<String>,
    #[serde(default, alias = "companySize")]
    pub company_size: Vec<String>,
    #[serde(default, alias = "techStack")]
    pub tech_stack: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub geo: Vec<String>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Icp {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub filters: SqlJson<IcpFilters>,
    pub is_active: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateIcp {
    #[serde(default)]
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub filters: IcpFilters,
}

pub async fn create_icp(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Json(payload): Json<CreateIcp>,
) -> AppResult<Json<Icp>> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("Name is required".into()));
    }
    let tenant = resolve_tenant(&pool, &user).await?;
    let description = payload
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty());

    let icp = sqlx::query_as::<_, Icp>(
        r#"
        INSERT INTO icps (id, organization_id, name, description, filters, is_active, created_by)
        VALUES ($1, $2, $3, $4, $5, TRUE, $6)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(tenant.id())
    .bind(name)
    .bind(description)
    .bind(SqlJson(&payload.filters))
    .bind(&user.user_id)
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        tracing::error!(?e, "DB error creating ICP");
        AppError::Db(e)
    })?;

    tracing::info!(organization_id = %tenant.id(), icp_id = %icp.id, "ICP created");
    Ok(Json(icp))
}

pub async fn list_icps(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
) -> AppResult<Json<Vec<Icp>>> {
    let tenant = resolve_tenant(&pool, &user).await?;
    let icps = sqlx::query_as::<_, Icp>(
        "SELECT * FROM icps WHERE organization_id = $1 ORDER BY created_at DESC",
    )
    .bind(tenant.id())
    .fetch_all(&pool)
    .await?;
    Ok(Json(icps))
}

/// Loads an ICP only if it belongs to the organization.
pub async fn find_for_organization(
    pool: &PgPool,
    organization_id: Uuid,
    icp_id: Uuid,
) -> AppResult<Icp> {
    sqlx::query_as::<_, Icp>("SELECT * FROM icps WHERE id = $1 AND organization_id = $2")
        .bind(icp_id)
        .bind(organization_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filters_accept_both_key_styles_and_missing_lists() {
        let filters: IcpFilters = serde_json::from_value(json!({
            "industries": ["SaaS"],
            "companySize": ["51-200"],
            "tech_stack": ["React"]
        }))
        .unwrap();
        assert_eq!(filters.industries, vec!["SaaS"]);
        assert_eq!(filters.company_size, vec!["51-200"]);
        assert_eq!(filters.tech_stack, vec!["React"]);
        assert!(filters.roles.is_empty());
        assert!(filters.geo.is_empty());
    }

    #[test]
    fn create_payload_without_filters_defaults_to_any() {
        let payload: CreateIcp = serde_json::from_value(json!({ "name": "Fintech" })).unwrap();
        assert_eq!(payload.filters, IcpFilters::default());
        assert!(payload.description.is_none());
    }
}
