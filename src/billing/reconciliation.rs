use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use tokio::sync::mpsc::{channel, Sender};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::usage::{month_key, UsageService};

/// key: billing-reconciliation -> background usage repair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationJob {
    Repair { organization_id: Uuid },
    RepairAll,
}

/// key: billing-reconciliation-handle -> enqueue interface
#[derive(Clone)]
pub struct ReconciliationHandle {
    sender: Sender<ReconciliationJob>,
}

impl ReconciliationHandle {
    pub async fn dispatch(&self, job: ReconciliationJob) -> Result<()> {
        self.sender
            .send(job)
            .await
            .map_err(|err| anyhow!("failed to enqueue usage reconciliation job: {err}"))
    }
}

pub fn start_reconciliation_worker(pool: PgPool) -> ReconciliationHandle {
    let (tx, mut rx) = channel(64);
    tokio::spawn(async move {
        let service = UsageService::new(pool.clone());
        while let Some(job) = rx.recv().await {
            match job {
                ReconciliationJob::Repair { organization_id } => {
                    repair_one(&service, organization_id).await;
                }
                ReconciliationJob::RepairAll => match organization_ids(&pool).await {
                    Ok(ids) => {
                        let total = ids.len();
                        let mut repaired = 0usize;
                        for organization_id in ids {
                            if repair_one(&service, organization_id).await {
                                repaired += 1;
                            }
                        }
                        info!(total, repaired, "usage reconciliation sweep finished");
                    }
                    Err(err) => error!(?err, "failed to list organizations for usage sweep"),
                },
            }
        }
    });

    ReconciliationHandle { sender: tx }
}

/// Returns whether the tenant's counters had drifted.
async fn repair_one(service: &UsageService, organization_id: Uuid) -> bool {
    match service.reconcile(organization_id, Utc::now()).await {
        Ok(outcome) => outcome.drifted,
        Err(err) => {
            error!(?err, %organization_id, "failed to reconcile usage counters");
            false
        }
    }
}

pub async fn organization_ids(pool: &PgPool) -> Result<Vec<Uuid>> {
    let ids: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM organizations ORDER BY created_at ASC")
        .fetch_all(pool)
        .await?;
    Ok(ids)
}

/// One tenant's stored counters next to the number of leads it actually owns.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UsageDriftRow {
    pub organization_id: Uuid,
    pub external_id: String,
    pub plan: Option<String>,
    pub status: Option<String>,
    pub lead_count: i64,
    pub monthly_used: Option<i64>,
    pub lifetime_used: Option<i64>,
}

impl UsageDriftRow {
    /// Lifetime usage must equal the lead count. A tenant without a usage row for the
    /// current month only drifts if it owns leads.
    pub fn lifetime_mismatch(&self) -> bool {
        self.lifetime_used.unwrap_or(0) != self.lead_count
    }
}

pub async fn usage_drift_report(pool: &PgPool, now: DateTime<Utc>) -> Result<Vec<UsageDriftRow>> {
    let rows = sqlx::query_as::<_, UsageDriftRow>(
        r#"
        SELECT
            o.id AS organization_id,
            o.external_id,
            s.plan,
            s.status,
            (SELECT COUNT(*) FROM leads l WHERE l.organization_id = o.id) AS lead_count,
            u.monthly_used,
            u.lifetime_used
        FROM organizations o
        LEFT JOIN subscriptions s ON s.organization_id = o.id
        LEFT JOIN lead_credit_usage u ON u.organization_id = o.id AND u.month = $1
        ORDER BY o.created_at ASC
        "#,
    )
    .bind(month_key(now))
    .fetch_all(pool)
    .await?;

    let drifted = rows.iter().filter(|row| row.lifetime_mismatch()).count();
    if drifted > 0 {
        warn!(drifted, total = rows.len(), "usage drift report found mismatched tenants");
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(lead_count: i64, lifetime_used: Option<i64>) -> UsageDriftRow {
        UsageDriftRow {
            organization_id: Uuid::new_v4(),
            external_id: "org_1".into(),
            plan: Some("FREE".into()),
            status: Some("ACTIVE".into()),
            lead_count,
            monthly_used: lifetime_used,
            lifetime_used,
        }
    }

    #[test]
    fn missing_usage_row_only_drifts_with_leads() {
        assert!(!row(0, None).lifetime_mismatch());
        assert!(row(3, None).lifetime_mismatch());
        assert!(!row(3, Some(3)).lifetime_mismatch());
        assert!(row(3, Some(5)).lifetime_mismatch());
    }

    #[tokio::test]
    async fn dispatch_fails_once_worker_is_gone() {
        let (tx, rx) = channel(1);
        drop(rx);
        let handle = ReconciliationHandle { sender: tx };
        assert!(handle.dispatch(ReconciliationJob::RepairAll).await.is_err());
    }
}
