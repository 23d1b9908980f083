use chrono::Utc;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;

use leadpilot::billing::reconciliation::{organization_ids, usage_drift_report};
use leadpilot::billing::UsageService;
use leadpilot::config;

fn display(value: Option<i64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".into())
}

/// Prints stored usage counters next to real lead counts for every tenant. With `--fix`,
/// reconciles each tenant and reports what changed.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let fix = std::env::args().skip(1).any(|arg| arg == "--fix");
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(config::DATABASE_URL.as_str())
        .await?;
    let now = Utc::now();

    let rows = usage_drift_report(&pool, now).await?;
    println!(
        "{:<36}  {:<24}  {:<12}  {:>6}  {:>8}  {:>8}",
        "organization", "external id", "plan", "leads", "monthly", "lifetime"
    );
    let mut mismatched = 0;
    for row in &rows {
        let flag = if row.lifetime_mismatch() {
            mismatched += 1;
            "  MISMATCH"
        } else {
            ""
        };
        println!(
            "{:<36}  {:<24}  {:<12}  {:>6}  {:>8}  {:>8}{}",
            row.organization_id,
            row.external_id,
            row.plan.as_deref().unwrap_or("-"),
            row.lead_count,
            display(row.monthly_used),
            display(row.lifetime_used),
            flag
        );
    }
    println!("{} tenants, {} mismatched", rows.len(), mismatched);

    if !fix {
        return Ok(());
    }

    let service = UsageService::new(pool.clone());
    let mut repaired = 0;
    for organization_id in organization_ids(&pool).await? {
        let outcome = service.reconcile(organization_id, now).await?;
        if outcome.drifted {
            repaired += 1;
            println!(
                "repaired {organization_id}: monthly {} -> {}, lifetime {} -> {}",
                outcome.before.monthly_used,
                outcome.after.monthly_used,
                outcome.before.lifetime_used,
                outcome.after.lifetime_used
            );
        }
    }
    println!("{repaired} tenants repaired");
    Ok(())
}
