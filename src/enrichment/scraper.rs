use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::warn;
use url::Url;

use super::ExternalServiceError;
use crate::config;

const USER_AGENT: &str = "Mozilla/5.0 (compatible; LeadPilotBot/1.0; +https://leadpilot.ai)";
const TEXT_LIMIT: usize = 5000;

/// Homepage facts used to score a company. All fields are empty when the page could not
/// be fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScrapedPage {
    pub title: String,
    pub description: String,
    pub text: String,
    pub tech_stack: Vec<String>,
}

/// key: page-fetcher -> homepage download seam
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, ExternalServiceError>;
}

pub struct HttpPageFetcher {
    client: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build scraper client")?;
        Ok(Self { client })
    }

    pub fn from_config() -> anyhow::Result<Self> {
        Self::new(*config::SCRAPE_TIMEOUT)
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Result<String, ExternalServiceError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExternalServiceError::Status {
                status: status.as_u16(),
                body: String::new(),
            });
        }
        Ok(response.text().await?)
    }
}

/// Fetches and analyzes a homepage. Failures are logged and yield an empty page.
pub async fn scrape(fetcher: &dyn PageFetcher, url: &str) -> ScrapedPage {
    match fetcher.fetch(url).await {
        Ok(html) => analyze_html(&html),
        Err(err) => {
            warn!(%err, url, "failed to scrape homepage");
            ScrapedPage::default()
        }
    }
}

pub fn analyze_html(html: &str) -> ScrapedPage {
    ScrapedPage {
        title: extract_title(html),
        description: extract_description(html),
        text: extract_text(html),
        tech_stack: detect_tech_stack(html),
    }
}

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("invalid regex")
}

static TITLE: Lazy<Regex> = Lazy::new(|| regex(r"(?i)<title[^>]*>([^<]+)</title>"));
static OG_TITLE: Lazy<Regex> =
    Lazy::new(|| regex(r#"(?i)<meta[^>]*property="og:title"[^>]*content="([^"]+)""#));
static DESCRIPTION: Lazy<Regex> =
    Lazy::new(|| regex(r#"(?i)<meta[^>]*name="description"[^>]*content="([^"]+)""#));
static OG_DESCRIPTION: Lazy<Regex> =
    Lazy::new(|| regex(r#"(?i)<meta[^>]*property="og:description"[^>]*content="([^"]+)""#));
static SCRIPT: Lazy<Regex> = Lazy::new(|| regex(r"(?is)<script[^>]*>.*?</script>"));
static STYLE: Lazy<Regex> = Lazy::new(|| regex(r"(?is)<style[^>]*>.*?</style>"));
static TAG: Lazy<Regex> = Lazy::new(|| regex(r"<[^>]+>"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| regex(r"\s+"));
static NON_SLUG: Lazy<Regex> = Lazy::new(|| regex(r"[^a-z0-9]+"));

fn first_capture(html: &str, patterns: &[&Lazy<Regex>]) -> String {
    patterns
        .iter()
        .find_map(|re| re.captures(html))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}

fn extract_title(html: &str) -> String {
    first_capture(html, &[&TITLE, &OG_TITLE])
}

fn extract_description(html: &str) -> String {
    first_capture(html, &[&DESCRIPTION, &OG_DESCRIPTION])
}

/// Visible text with scripts, styles and markup removed, capped at 5000 characters.
fn extract_text(html: &str) -> String {
    let without_scripts = SCRIPT.replace_all(html, "");
    let without_styles = STYLE.replace_all(&without_scripts, "");
    let without_tags = TAG.replace_all(&without_styles, " ");
    let collapsed = WHITESPACE.replace_all(&without_tags, " ");
    collapsed.trim().chars().take(TEXT_LIMIT).collect()
}

static TECH_SIGNATURES: Lazy<Vec<(&'static str, Vec<Regex>)>> = Lazy::new(|| {
    let table: &[(&'static str, &[&str])] = &[
        ("React", &[r"__NEXT_DATA__", r"(?i)react", r"_app-[a-f0-9]+\.js"]),
        ("Next.js", &[r"__NEXT_DATA__", r"_next/static", r"(?i)next\.js"]),
        ("Vue", &[r"(?i)vue\.js", r"(?i)__vue", r"(?i)vue-router"]),
        ("Angular", &[r"ng-version", r"(?i)angular"]),
        ("WordPress", &[r"wp-content", r"wp-includes", r"(?i)wordpress"]),
        ("Shopify", &[r"cdn\.shopify\.com", r"(?i)shopify"]),
        ("Webflow", &[r"(?i)webflow", r"wf-"]),
        ("Stripe", &[r"js\.stripe\.com", r"(?i)stripe"]),
        ("Google Analytics", &[r"google-analytics", r"gtag", r"ga\.js"]),
        ("Cloudflare", &[r"(?i)cloudflare", r"__cf_"]),
        ("Vercel", &[r"(?i)vercel"]),
        ("Netlify", &[r"(?i)netlify"]),
        ("Tailwind", &[r"(?i)tailwind", r"tw-"]),
        ("Bootstrap", &[r"(?i)bootstrap", r"\bbs-"]),
        ("jQuery", &[r"(?i)jquery", r"\$\("]),
        ("TypeScript", &[r#"\.ts""#, r"(?i)typescript"]),
    ];
    table
        .iter()
        .map(|(tech, patterns)| (*tech, patterns.iter().map(|p| regex(p)).collect()))
        .collect()
});

/// Technologies whose fingerprints appear in the page source, in table order.
pub fn detect_tech_stack(html: &str) -> Vec<String> {
    TECH_SIGNATURES
        .iter()
        .filter(|(_, patterns)| patterns.iter().any(|re| re.is_match(html)))
        .map(|(tech, _)| tech.to_string())
        .collect()
}

/// Host name without a leading `www.`. Bare domains are accepted; unparseable input is
/// returned unchanged.
pub fn extract_domain(website: &str) -> String {
    let candidate = if website.starts_with("http") {
        website.to_string()
    } else {
        format!("https://{website}")
    };
    match Url::parse(&candidate).ok().and_then(|url| url.host_str().map(str::to_string)) {
        Some(host) => host.strip_prefix("www.").unwrap_or(&host).to_string(),
        None => website.to_string(),
    }
}

/// Best-effort LinkedIn company page derived from a slug of the company name.
pub fn guess_linkedin_url(company_name: &str) -> String {
    let lowered = company_name.to_lowercase();
    let slug = NON_SLUG.replace_all(&lowered, "-");
    format!(
        "https://www.linkedin.com/company/{}",
        slug.trim_matches('-')
    )
}
