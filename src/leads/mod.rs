pub mod candidates;
pub mod export;
pub mod generator;

use axum::{
    extract::{Extension, Query},
    http::header,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{types::Json as SqlJson, FromRow, PgPool, QueryBuilder};
use uuid::Uuid;

pub use candidates::{Candidate, CandidateSource, SeedCandidates};
pub use generator::LeadPipeline;

use crate::error::AppResult;
use crate::extractor::AuthUser;
use crate::organizations::resolve_tenant;
use crate::profiles;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Lead {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub icp_id: Uuid,
    pub company_name: String,
    pub website: Option<String>,
    pub domain: String,
    pub industry: Option<String>,
    pub company_size: Option<String>,
    pub tech_stack: SqlJson<Value>,
    pub signals: SqlJson<Value>,
    pub ai_score: i32,
    pub personalization: Option<String>,
    pub contact_name: Option<String>,
    pub email: Option<String>,
    pub linkedin_url: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

fn default_count() -> i64 {
    5
}

#[derive(Debug, Deserialize)]
pub struct GenerateLeads {
    pub icp_id: Uuid,
    #[serde(default = "default_count")]
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct GeneratedLeads {
    pub count: usize,
    pub leads: Vec<Lead>,
}

pub async fn generate_leads(
    Extension(pool): Extension<PgPool>,
    Extension(pipeline): Extension<LeadPipeline>,
    user: AuthUser,
    Json(payload): Json<GenerateLeads>,
) -> AppResult<Json<GeneratedLeads>> {
    let requested = generator::clamp_batch(payload.count);
    let tenant = resolve_tenant(&pool, &user).await?;
    let icp = profiles::find_for_organization(&pool, tenant.id(), payload.icp_id).await?;
    let leads = pipeline
        .generate(&pool, &tenant, &icp, requested, &user.user_id, Utc::now())
        .await?;
    Ok(Json(GeneratedLeads {
        count: leads.len(),
        leads,
    }))
}

#[derive(Debug, Deserialize)]
pub struct LeadFilter {
    pub icp_id: Option<Uuid>,
}

pub async fn list_leads(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Query(filter): Query<LeadFilter>,
) -> AppResult<Json<Vec<Lead>>> {
    let tenant = resolve_tenant(&pool, &user).await?;
    let mut builder = QueryBuilder::new("SELECT * FROM leads WHERE organization_id = ");
    builder.push_bind(tenant.id());
    if let Some(icp_id) = filter.icp_id {
        builder.push(" AND icp_id = ");
        builder.push_bind(icp_id);
    }
    builder.push(" ORDER BY created_at DESC");
    let leads = builder.build_query_as::<Lead>().fetch_all(&pool).await?;
    Ok(Json(leads))
}

#[derive(Debug, Default, Deserialize)]
pub struct ExportLeads {
    #[serde(default)]
    pub lead_ids: Option<Vec<Uuid>>,
}

/// Exports the selected leads, or all of the tenant's leads when no ids are given. Ids
/// belonging to other tenants are silently skipped.
pub async fn export_leads(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Json(payload): Json<ExportLeads>,
) -> AppResult<impl IntoResponse> {
    let tenant = resolve_tenant(&pool, &user).await?;
    let mut builder = QueryBuilder::new("SELECT * FROM leads WHERE organization_id = ");
    builder.push_bind(tenant.id());
    if let Some(ids) = payload.lead_ids.filter(|ids| !ids.is_empty()) {
        builder.push(" AND id = ANY(");
        builder.push_bind(ids);
        builder.push(")");
    }
    builder.push(" ORDER BY created_at DESC");
    let leads = builder.build_query_as::<Lead>().fetch_all(&pool).await?;

    tracing::info!(organization_id = %tenant.id(), exported = leads.len(), "leads exported");
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"leads.csv\"",
            ),
        ],
        export::render_csv(&leads),
    ))
}
