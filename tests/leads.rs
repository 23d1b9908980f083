use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use leadpilot::billing::usage::{self, month_key, UsageService};
use leadpilot::enrichment::{
    CompletionClient, CompletionRequest, ExternalServiceError, PageFetcher, RetryPolicy,
    SalesAssistant,
};
use leadpilot::entitlements::{EntitlementDenial, LimitWindow};
use leadpilot::error::AppError;
use leadpilot::extractor::AuthUser;
use leadpilot::leads::{LeadPipeline, SeedCandidates};
use leadpilot::organizations::{resolve_tenant, Tenant};
use leadpilot::profiles::{self, Icp};
use sqlx::PgPool;
use uuid::Uuid;

struct OfflineLlm;

#[async_trait]
impl CompletionClient for OfflineLlm {
    async fn complete(&self, _request: CompletionRequest) -> Result<String, ExternalServiceError> {
        Err(ExternalServiceError::NotConfigured)
    }
}

struct OfflineWeb;

#[async_trait]
impl PageFetcher for OfflineWeb {
    async fn fetch(&self, _url: &str) -> Result<String, ExternalServiceError> {
        Err(ExternalServiceError::Status {
            status: 503,
            body: String::new(),
        })
    }
}

fn pipeline() -> LeadPipeline {
    LeadPipeline::new(
        SalesAssistant::new(
            Arc::new(OfflineLlm),
            RetryPolicy {
                attempts: 3,
                backoff: Duration::ZERO,
            },
        ),
        Arc::new(OfflineWeb),
        Arc::new(SeedCandidates),
    )
}

async fn setup(pool: &PgPool, org: &str, plan: &str, monthly: i64, lifetime: i64) -> (Tenant, Icp) {
    sqlx::migrate!("./migrations").run(pool).await.unwrap();
    let user = AuthUser {
        user_id: format!("user_{org}"),
        org_id: org.to_string(),
        role: "member".into(),
    };
    let tenant = resolve_tenant(pool, &user).await.unwrap();
    sqlx::query("UPDATE subscriptions SET plan = $2, status = 'ACTIVE' WHERE organization_id = $1")
        .bind(tenant.id())
        .bind(plan)
        .execute(pool)
        .await
        .unwrap();
    let tenant = resolve_tenant(pool, &user).await.unwrap();

    let month = month_key(Utc::now());
    let mut conn = pool.acquire().await.unwrap();
    usage::ensure_record(&mut conn, tenant.id(), &month)
        .await
        .unwrap();
    sqlx::query(
        "UPDATE lead_credit_usage SET monthly_used = $3, lifetime_used = $4 \
         WHERE organization_id = $1 AND month = $2",
    )
    .bind(tenant.id())
    .bind(&month)
    .bind(monthly)
    .bind(lifetime)
    .execute(pool)
    .await
    .unwrap();

    let icp_id = Uuid::new_v4();
    sqlx::query("INSERT INTO icps (id, organization_id, name, created_by) VALUES ($1, $2, $3, $4)")
        .bind(icp_id)
        .bind(tenant.id())
        .bind("SaaS founders")
        .bind(&user.user_id)
        .execute(pool)
        .await
        .unwrap();
    let icp = profiles::find_for_organization(pool, tenant.id(), icp_id)
        .await
        .unwrap();
    (tenant, icp)
}

async fn lead_count(pool: &PgPool, organization_id: Uuid) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM leads WHERE organization_id = $1")
        .bind(organization_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn exhausted_free_plan_is_denied_without_mutation(pool: PgPool) {
    let (tenant, icp) = setup(&pool, "org_free_done", "FREE", 5, 5).await;

    let err = pipeline()
        .generate(&pool, &tenant, &icp, 1, "user_org_free_done", Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::Entitlement(EntitlementDenial::PlanLimit {
            window: LimitWindow::Lifetime,
            ..
        })
    ));

    let record = UsageService::new(pool.clone())
        .current(tenant.id(), Utc::now())
        .await
        .unwrap();
    assert_eq!(record.lifetime_used, 5);
    assert_eq!(lead_count(&pool, tenant.id()).await, 0);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn pro_batch_is_clamped_to_monthly_headroom(pool: PgPool) {
    let (tenant, icp) = setup(&pool, "org_pro_edge", "PRO_MONTHLY", 998, 998).await;

    let leads = pipeline()
        .generate(&pool, &tenant, &icp, 5, "user_org_pro_edge", Utc::now())
        .await
        .unwrap();
    assert_eq!(leads.len(), 2);
    assert!(leads.iter().all(|lead| lead.ai_score == 3));

    let record = UsageService::new(pool.clone())
        .current(tenant.id(), Utc::now())
        .await
        .unwrap();
    assert_eq!(record.monthly_used, 1000);
    assert_eq!(record.lifetime_used, 1000);
    assert_eq!(lead_count(&pool, tenant.id()).await, 2);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn free_plan_grants_only_remaining_lifetime(pool: PgPool) {
    let (tenant, icp) = setup(&pool, "org_free_partial", "FREE", 0, 3).await;

    let leads = pipeline()
        .generate(&pool, &tenant, &icp, 10, "user_org_free_partial", Utc::now())
        .await
        .unwrap();
    assert_eq!(leads.len(), 2);
    assert!(leads
        .iter()
        .all(|lead| lead.personalization.as_deref().unwrap_or("").starts_with("I came across")));

    let audits =
        leadpilot::audit::recent_for_organization(&pool, tenant.id(), Some("generated_leads"), 5)
            .await
            .unwrap();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].meta["count"], 2);
}
