use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::billing::models::Subscription;
use crate::entitlements::Plan;
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Organization {
    pub id: Uuid,
    pub external_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// The caller's organization together with its subscription.
#[derive(Debug, Clone)]
pub struct Tenant {
    pub organization: Organization,
    pub subscription: Subscription,
}

impl Tenant {
    pub fn id(&self) -> Uuid {
        self.organization.id
    }

    pub fn plan(&self) -> Plan {
        self.subscription.effective_plan()
    }
}

/// Loads the caller's organization, provisioning it with a free subscription on first
/// sight.
pub async fn resolve_tenant(pool: &PgPool, user: &AuthUser) -> AppResult<Tenant> {
    if let Some(tenant) = find_tenant(pool, &user.org_id).await? {
        return Ok(tenant);
    }
    provision_tenant(pool, user).await
}

pub async fn find_tenant(pool: &PgPool, external_id: &str) -> AppResult<Option<Tenant>> {
    let organization =
        sqlx::query_as::<_, Organization>("SELECT * FROM organizations WHERE external_id = $1")
            .bind(external_id)
            .fetch_optional(pool)
            .await
            .map_err(|e| {
                tracing::error!(?e, "DB error loading organization");
                AppError::Db(e)
            })?;
    let Some(organization) = organization else {
        return Ok(None);
    };
    let subscription =
        sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions WHERE organization_id = $1")
            .bind(organization.id)
            .fetch_optional(pool)
            .await?;
    Ok(subscription.map(|subscription| Tenant {
        organization,
        subscription,
    }))
}

async fn provision_tenant(pool: &PgPool, user: &AuthUser) -> AppResult<Tenant> {
    let name = if user.org_id == user.user_id {
        "Personal Account"
    } else {
        "My Organization"
    };
    let mut tx = pool.begin().await?;
    sqlx::query(
        "INSERT INTO organizations (id, external_id, name) VALUES ($1, $2, $3) \
         ON CONFLICT (external_id) DO NOTHING",
    )
    .bind(Uuid::new_v4())
    .bind(&user.org_id)
    .bind(name)
    .execute(&mut tx)
    .await?;
    let organization =
        sqlx::query_as::<_, Organization>("SELECT * FROM organizations WHERE external_id = $1")
            .bind(&user.org_id)
            .fetch_one(&mut tx)
            .await?;
    sqlx::query(
        "INSERT INTO subscriptions (id, organization_id, plan, status, gateway_customer_id) \
         VALUES ($1, $2, 'FREE', 'ACTIVE', $3) ON CONFLICT (organization_id) DO NOTHING",
    )
    .bind(Uuid::new_v4())
    .bind(organization.id)
    .bind(format!("temp_{}", user.org_id))
    .execute(&mut tx)
    .await?;
    let subscription =
        sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions WHERE organization_id = $1")
            .bind(organization.id)
            .fetch_one(&mut tx)
            .await?;
    tx.commit().await?;
    tracing::info!(
        organization_id = %organization.id,
        external_id = %organization.external_id,
        "provisioned organization on free plan"
    );
    Ok(Tenant {
        organization,
        subscription,
    })
}
