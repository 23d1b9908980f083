use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde_json::json;
use sqlx::{types::Json as SqlJson, PgPool, QueryBuilder};
use tracing::info;

use super::candidates::{Candidate, CandidateSource};
use super::Lead;
use crate::audit::{self, AuditEntry};
use crate::billing::usage::{self, month_key, UsageService};
use crate::enrichment::scraper::{self, extract_domain, guess_linkedin_url};
use crate::enrichment::{CompanyProfile, PageFetcher, SalesAssistant};
use crate::entitlements;
use crate::error::{AppError, AppResult};
use crate::organizations::Tenant;
use crate::profiles::Icp;

pub const MAX_BATCH: u32 = 1000;

/// Requested batch sizes are clamped to `1..=MAX_BATCH`.
pub fn clamp_batch(requested: i64) -> u32 {
    requested.clamp(1, MAX_BATCH as i64) as u32
}

/// An enriched candidate ready to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLead {
    pub company_name: String,
    pub website: String,
    pub domain: String,
    pub industry: String,
    pub company_size: String,
    pub tech_stack: Vec<String>,
    pub signals: serde_json::Value,
    pub ai_score: i32,
    pub personalization: String,
    pub linkedin_url: String,
}

/// key: lead-pipeline -> sourcing, enrichment and metered persistence
#[derive(Clone)]
pub struct LeadPipeline {
    assistant: SalesAssistant,
    fetcher: Arc<dyn PageFetcher>,
    source: Arc<dyn CandidateSource>,
}

impl LeadPipeline {
    pub fn new(
        assistant: SalesAssistant,
        fetcher: Arc<dyn PageFetcher>,
        source: Arc<dyn CandidateSource>,
    ) -> Self {
        Self {
            assistant,
            fetcher,
            source,
        }
    }

    pub fn assistant(&self) -> &SalesAssistant {
        &self.assistant
    }

    /// Scrapes the homepage, scores the fit, extracts signals and writes the opener. Never
    /// fails: each step has a neutral fallback.
    pub async fn enrich(&self, candidate: Candidate, icp: &Icp) -> NewLead {
        let domain = extract_domain(&candidate.website);
        let page = scraper::scrape(self.fetcher.as_ref(), &candidate.website).await;
        let profile = CompanyProfile {
            name: candidate.name.clone(),
            website: candidate.website.clone(),
            domain: domain.clone(),
            industry: Some(candidate.industry.clone()),
            description: Some(page.description.clone()).filter(|d| !d.is_empty()),
            tech_stack: page.tech_stack.clone(),
        };

        let fit = self
            .assistant
            .classify_company_fit(&profile, &icp.filters.0)
            .await;
        let signals = self
            .assistant
            .extract_buying_signals(&candidate.name, &page.text)
            .await;
        let personalization = self
            .assistant
            .generate_personalization(&profile, &signals)
            .await;

        NewLead {
            linkedin_url: guess_linkedin_url(&candidate.name),
            company_name: candidate.name,
            website: candidate.website,
            domain,
            industry: candidate.industry,
            company_size: candidate.company_size,
            tech_stack: page.tech_stack,
            signals: json!({
                "pains": signals.pains,
                "initiatives": signals.initiatives,
                "confidence": signals.confidence,
                "fit_reason": fit.reason,
            }),
            ai_score: fit.score,
            personalization,
        }
    }

    /// Generates up to `requested` leads for the tenant. The grant is computed from the
    /// current counters, and the same grant is reserved atomically with the inserts, so a
    /// concurrent request that consumed the headroom turns this one into a denial instead
    /// of an overshoot.
    pub async fn generate(
        &self,
        pool: &PgPool,
        tenant: &Tenant,
        icp: &Icp,
        requested: u32,
        actor_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Lead>> {
        let organization_id = tenant.id();
        let plan = tenant.plan();
        let record = UsageService::new(pool.clone())
            .current(organization_id, now)
            .await?;
        let grant = entitlements::evaluate(plan, requested, record.counters())?;

        let candidates = self
            .source
            .candidates(&icp.filters.0, grant as usize)
            .await?;
        let enriched: Vec<NewLead> = join_all(
            candidates
                .into_iter()
                .take(grant as usize)
                .map(|candidate| self.enrich(candidate, icp)),
        )
        .await;
        if enriched.is_empty() {
            return Err(AppError::Internal(anyhow::anyhow!(
                "candidate source returned no companies"
            )));
        }
        let produced = enriched.len() as i64;

        let mut tx = pool.begin().await?;
        usage::reserve(&mut tx, organization_id, &month_key(now), plan, produced).await?;
        let leads = insert_leads(&mut tx, tenant, icp, enriched).await?;
        audit::record(
            &mut tx,
            AuditEntry {
                organization_id,
                actor_id: actor_id.to_string(),
                action: "generated_leads",
                entity: "lead",
                entity_id: None,
                meta: json!({
                    "icp_id": icp.id,
                    "requested": requested,
                    "count": leads.len(),
                }),
            },
        )
        .await?;
        tx.commit().await?;

        info!(
            %organization_id,
            plan = %plan,
            requested,
            generated = leads.len(),
            "leads generated"
        );
        Ok(leads)
    }
}

async fn insert_leads(
    conn: &mut sqlx::PgConnection,
    tenant: &Tenant,
    icp: &Icp,
    leads: Vec<NewLead>,
) -> sqlx::Result<Vec<Lead>> {
    let mut builder = QueryBuilder::new(
        "INSERT INTO leads (id, organization_id, icp_id, company_name, website, domain, \
         industry, company_size, tech_stack, signals, ai_score, personalization, linkedin_url) ",
    );
    builder.push_values(leads, |mut row, lead| {
        row.push_bind(uuid::Uuid::new_v4())
            .push_bind(tenant.id())
            .push_bind(icp.id)
            .push_bind(lead.company_name)
            .push_bind(lead.website)
            .push_bind(lead.domain)
            .push_bind(lead.industry)
            .push_bind(lead.company_size)
            .push_bind(SqlJson(lead.tech_stack))
            .push_bind(SqlJson(lead.signals))
            .push_bind(lead.ai_score)
            .push_bind(lead.personalization)
            .push_bind(lead.linkedin_url);
    });
    builder.push(" RETURNING *");
    builder.build_query_as::<Lead>().fetch_all(conn).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_sizes_are_clamped() {
        assert_eq!(clamp_batch(0), 1);
        assert_eq!(clamp_batch(-3), 1);
        assert_eq!(clamp_batch(5), 5);
        assert_eq!(clamp_batch(5000), 1000);
    }
}
