use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{CompanyProfile, ExternalServiceError};
use crate::config;
use crate::profiles::IcpFilters;

const MODERATE_FIT: i32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the model for a single JSON object.
    pub json: bool,
}

/// key: llm-client -> chat completion seam
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, ExternalServiceError>;
}

/// OpenAI-compatible `chat/completions` client.
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build LLM client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
        })
    }

    pub fn from_config() -> anyhow::Result<Self> {
        Self::new(
            config::LLM_API_BASE.as_str(),
            config::LLM_API_KEY.clone(),
            config::LLM_MODEL.as_str(),
        )
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, ExternalServiceError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ExternalServiceError::NotConfigured)?;
        let mut body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": request.prompt }],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        if request.json {
            body["response_format"] = json!({ "type": "json_object" });
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExternalServiceError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(ExternalServiceError::EmptyCompletion)
    }
}

/// Bounded retry with a fixed pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, ExternalServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExternalServiceError>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < attempts && err.is_transient() => {
                    warn!(%err, call = label, attempt, "LLM call failed; retrying");
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FitScore {
    pub score: i32,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadSignals {
    #[serde(default)]
    pub pains: Vec<String>,
    #[serde(default)]
    pub initiatives: Vec<String>,
    #[serde(default)]
    pub confidence: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceVariant {
    pub subject: String,
    pub body: String,
}

/// key: sales-assistant -> prompts, parsing and fallbacks over a completion client
#[derive(Clone)]
pub struct SalesAssistant {
    client: Arc<dyn CompletionClient>,
    retry: RetryPolicy,
}

impl SalesAssistant {
    pub fn new(client: Arc<dyn CompletionClient>, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    async fn complete_with_retry(
        &self,
        label: &str,
        request: CompletionRequest,
    ) -> Result<String, ExternalServiceError> {
        self.retry
            .run(label, || {
                let client = Arc::clone(&self.client);
                let request = request.clone();
                async move { client.complete(request).await }
            })
            .await
    }

    async fn complete_json(
        &self,
        label: &str,
        request: CompletionRequest,
    ) -> Result<Value, ExternalServiceError> {
        self.retry
            .run(label, || {
                let client = Arc::clone(&self.client);
                let request = request.clone();
                async move {
                    let content = client.complete(request).await?;
                    Ok::<Value, ExternalServiceError>(serde_json::from_str(&content)?)
                }
            })
            .await
    }

    /// Scores how well a company matches the ICP on a 1..=5 scale. Falls back to a
    /// moderate fit when the model cannot be reached.
    pub async fn classify_company_fit(
        &self,
        company: &CompanyProfile,
        filters: &IcpFilters,
    ) -> FitScore {
        let request = CompletionRequest {
            prompt: fit_prompt(company, filters),
            temperature: 0.3,
            max_tokens: 200,
            json: true,
        };
        match self.complete_json("classify_company_fit", request).await {
            Ok(value) => parse_fit(&value),
            Err(err) => {
                warn!(%err, company = %company.name, "fit classification fell back to moderate");
                FitScore {
                    score: MODERATE_FIT,
                    reason: "Unable to classify - defaulted to moderate".into(),
                }
            }
        }
    }

    pub async fn extract_buying_signals(&self, company_name: &str, homepage_text: &str) -> LeadSignals {
        let request = CompletionRequest {
            prompt: signals_prompt(company_name, homepage_text),
            temperature: 0.4,
            max_tokens: 300,
            json: true,
        };
        match self.complete_json("extract_buying_signals", request).await {
            Ok(value) => parse_signals(&value),
            Err(err) => {
                warn!(%err, company = %company_name, "signal extraction fell back to empty");
                LeadSignals::default()
            }
        }
    }

    pub async fn generate_personalization(
        &self,
        company: &CompanyProfile,
        signals: &LeadSignals,
    ) -> String {
        let request = CompletionRequest {
            prompt: personalization_prompt(company, signals),
            temperature: 0.7,
            max_tokens: 150,
            json: false,
        };
        match self
            .complete_with_retry("generate_personalization", request)
            .await
        {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => format!(
                "I noticed {} is in the {} space...",
                company.name,
                company.industry.as_deref().unwrap_or("industry")
            ),
            Err(err) => {
                warn!(%err, company = %company.name, "personalization fell back to generic opener");
                generic_opener(company)
            }
        }
    }

    /// Rewrites an outreach email into `count` alternatives. Returns an empty list when
    /// the model is unavailable.
    pub async fn generate_sequence_variants(
        &self,
        subject: &str,
        body: &str,
        count: u32,
    ) -> Vec<SequenceVariant> {
        let request = CompletionRequest {
            prompt: variants_prompt(subject, body, count),
            temperature: 0.8,
            max_tokens: 800,
            json: true,
        };
        match self.complete_json("generate_sequence_variants", request).await {
            Ok(value) => {
                let variants: Vec<SequenceVariant> = value
                    .get("variants")
                    .cloned()
                    .and_then(|variants| serde_json::from_value(variants).ok())
                    .unwrap_or_default();
                debug!(requested = count, produced = variants.len(), "sequence variants generated");
                variants
            }
            Err(err) => {
                warn!(%err, "sequence variant generation failed");
                Vec::new()
            }
        }
    }
}

pub fn generic_opener(company: &CompanyProfile) -> String {
    format!(
        "I came across {} and wanted to reach out about how we help {}...",
        company.name,
        company.industry.as_deref().unwrap_or("companies like yours")
    )
}

fn parse_fit(value: &Value) -> FitScore {
    let score = value
        .get("score")
        .and_then(Value::as_f64)
        .map(|score| score.round() as i32)
        .unwrap_or(1)
        .clamp(1, 5);
    let reason = value
        .get("reason")
        .and_then(Value::as_str)
        .filter(|reason| !reason.is_empty())
        .unwrap_or("Unable to determine fit")
        .to_string();
    FitScore { score, reason }
}

fn parse_signals(value: &Value) -> LeadSignals {
    let strings = |key: &str| -> Vec<String> {
        value
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    };
    LeadSignals {
        pains: strings("pains"),
        initiatives: strings("initiatives"),
        confidence: value
            .get("confidence")
            .and_then(Value::as_f64)
            .map(|c| c.round() as i64)
            .unwrap_or(50)
            .clamp(0, 100),
    }
}

fn list_or(items: &[String], fallback: &str) -> String {
    if items.is_empty() {
        fallback.to_string()
    } else {
        items.join(", ")
    }
}

fn fit_prompt(company: &CompanyProfile, filters: &IcpFilters) -> String {
    format!(
        "You are an expert B2B sales analyst. Evaluate how well this company matches the \
         Ideal Customer Profile (ICP).\n\n\
         Company:\n- Name: {name}\n- Industry: {industry}\n- Website: {website}\n\
         - Description: {description}\n- Tech Stack: {tech}\n\n\
         ICP Criteria:\n- Target Industries: {industries}\n- Company Size: {size}\n\
         - Required Tech: {required_tech}\n- Target Roles: {roles}\n- Regions: {geo}\n\n\
         Rate the fit on a scale of 1-5 (1 = poor fit, 3 = moderate fit, 5 = perfect fit).\n\
         Respond with JSON only: {{\"score\": <number 1-5>, \"reason\": \"<1-2 sentences>\"}}",
        name = company.name,
        industry = company.industry.as_deref().unwrap_or("Unknown"),
        website = company.website,
        description = company.description.as_deref().unwrap_or("No description"),
        tech = list_or(&company.tech_stack, "Unknown"),
        industries = list_or(&filters.industries, "Any"),
        size = list_or(&filters.company_size, "Any"),
        required_tech = list_or(&filters.tech_stack, "Any"),
        roles = list_or(&filters.roles, "Any"),
        geo = list_or(&filters.geo, "Any"),
    )
}

fn signals_prompt(company_name: &str, homepage_text: &str) -> String {
    let excerpt: String = homepage_text.chars().take(2000).collect();
    format!(
        "You are a B2B sales intelligence analyst. From this company's homepage content, \
         identify pain points they may be facing and initiatives they are working on.\n\n\
         Company: {company_name}\n\nHomepage Content:\n{excerpt}\n\n\
         Respond with JSON only: {{\"pains\": [\"...\"], \"initiatives\": [\"...\"], \
         \"confidence\": <number 0-100>}}"
    )
}

fn personalization_prompt(company: &CompanyProfile, signals: &LeadSignals) -> String {
    format!(
        "You are an expert sales copywriter. Write a personalized 1-2 sentence opener for a \
         cold email to {name}.\n\nContext:\n- Company: {name}\n- Industry: {industry}\n\
         - Pain points: {pains}\n- Initiatives: {initiatives}\n\n\
         Reference their business specifically and stay conversational. \
         Respond with just the opener text, no JSON, no quotes.",
        name = company.name,
        industry = company.industry.as_deref().unwrap_or("Unknown"),
        pains = list_or(&signals.pains, "None identified"),
        initiatives = list_or(&signals.initiatives, "None identified"),
    )
}

fn variants_prompt(subject: &str, body: &str, count: u32) -> String {
    format!(
        "You are an expert email copywriter. Generate {count} variations of this cold email.\n\n\
         Original Subject: {subject}\nOriginal Body: {body}\n\n\
         Keep the core message and tone, vary the angle or hook.\n\
         Respond with JSON only: {{\"variants\": [{{\"subject\": \"...\", \"body\": \"...\"}}]}}"
    )
}
