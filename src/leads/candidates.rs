use async_trait::async_trait;

use crate::profiles::IcpFilters;

/// A company that may become a lead once enriched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub name: String,
    pub website: String,
    pub industry: String,
    pub company_size: String,
}

impl Candidate {
    fn new(name: &str, website: &str, industry: &str, company_size: &str) -> Self {
        Self {
            name: name.to_string(),
            website: website.to_string(),
            industry: industry.to_string(),
            company_size: company_size.to_string(),
        }
    }
}

/// key: candidate-source -> where companies to research come from
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Returns exactly `count` candidates.
    async fn candidates(&self, filters: &IcpFilters, count: usize) -> anyhow::Result<Vec<Candidate>>;
}

/// Built-in sample catalog, padded with numbered placeholder companies when a batch asks
/// for more than the catalog holds.
#[derive(Debug, Clone, Default)]
pub struct SeedCandidates;

impl SeedCandidates {
    fn catalog() -> Vec<Candidate> {
        vec![
            Candidate::new("Acme Corp", "https://acme.com", "Software", "50-200"),
            Candidate::new("TechStart Inc", "https://techstart.io", "SaaS", "10-50"),
            Candidate::new(
                "CloudNine",
                "https://cloudnine.dev",
                "Cloud Infrastructure",
                "200-500",
            ),
            Candidate::new(
                "DataFlow Systems",
                "https://dataflow.io",
                "Data Analytics",
                "50-200",
            ),
            Candidate::new("SecureNet", "https://securenet.co", "Cybersecurity", "100-500"),
        ]
    }
}

#[async_trait]
impl CandidateSource for SeedCandidates {
    async fn candidates(&self, filters: &IcpFilters, count: usize) -> anyhow::Result<Vec<Candidate>> {
        let wanted: Vec<String> = filters
            .industries
            .iter()
            .map(|industry| industry.to_lowercase())
            .collect();
        let mut catalog = Self::catalog();
        // Stable sort keeps catalog order within each group.
        catalog.sort_by_key(|candidate| !wanted.contains(&candidate.industry.to_lowercase()));

        let mut picked: Vec<Candidate> = catalog.into_iter().take(count).collect();
        let mut next = picked.len() + 1;
        while picked.len() < count {
            picked.push(Candidate {
                name: format!("Company {next}"),
                website: format!("https://company{next}.com"),
                industry: "Technology".into(),
                company_size: "11-50".into(),
            });
            next += 1;
        }
        Ok(picked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_exactly_the_requested_count() {
        let source = SeedCandidates;
        for count in [0, 1, 5, 12] {
            let picked = source
                .candidates(&IcpFilters::default(), count)
                .await
                .unwrap();
            assert_eq!(picked.len(), count);
        }
    }

    #[tokio::test]
    async fn pads_catalog_with_numbered_companies() {
        let picked = SeedCandidates
            .candidates(&IcpFilters::default(), 7)
            .await
            .unwrap();
        assert_eq!(picked[0].name, "Acme Corp");
        assert_eq!(picked[5].name, "Company 6");
        assert_eq!(picked[6].website, "https://company7.com");
    }

    #[tokio::test]
    async fn matching_industries_come_first() {
        let filters = IcpFilters {
            industries: vec!["cybersecurity".into()],
            ..Default::default()
        };
        let picked = SeedCandidates.candidates(&filters, 2).await.unwrap();
        assert_eq!(picked[0].name, "SecureNet");
        assert_eq!(picked[1].name, "Acme Corp");
    }
}
