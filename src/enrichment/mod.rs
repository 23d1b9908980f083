//! Company research for generated leads: homepage scraping plus LLM scoring, signal
//! extraction and outreach copy. Every external failure degrades to a neutral result so a
//! single bad company never fails a batch.

pub mod llm;
pub mod scraper;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use llm::{
    CompletionClient, CompletionRequest, FitScore, LeadSignals, OpenAiClient, RetryPolicy,
    SalesAssistant, SequenceVariant,
};
pub use scraper::{HttpPageFetcher, PageFetcher, ScrapedPage};

#[derive(Debug, Error)]
pub enum ExternalServiceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("completion had no content")]
    EmptyCompletion,
    #[error("malformed completion: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("LLM API key is not configured")]
    NotConfigured,
}

impl ExternalServiceError {
    /// Whether another attempt could succeed. A missing key or a 4xx other than 429 will
    /// fail the same way every time.
    pub fn is_transient(&self) -> bool {
        match self {
            ExternalServiceError::NotConfigured => false,
            ExternalServiceError::Status { status, .. } => *status == 429 || *status >= 500,
            ExternalServiceError::Http(_)
            | ExternalServiceError::EmptyCompletion
            | ExternalServiceError::Malformed(_) => true,
        }
    }
}

/// What is known about a company before it is scored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub name: String,
    pub website: String,
    pub domain: String,
    pub industry: Option<String>,
    pub description: Option<String>,
    pub tech_stack: Vec<String>,
}
