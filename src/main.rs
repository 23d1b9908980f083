use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use axum_prometheus::PrometheusMetricLayer;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, EnvFilter};

use leadpilot::billing::{
    start_reconciliation_worker, BillingGateway, BillingSettings, RazorpayGateway,
};
use leadpilot::config;
use leadpilot::enrichment::{
    CompletionClient, HttpPageFetcher, OpenAiClient, PageFetcher, RetryPolicy, SalesAssistant,
};
use leadpilot::leads::{CandidateSource, LeadPipeline, SeedCandidates};
use leadpilot::routes::{api_routes, root};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    // Fail fast if any secret is missing
    let _ = config::JWT_SECRET.as_str();
    let _ = config::RAZORPAY_WEBHOOK_SECRET.as_str();
    let _ = config::RAZORPAY_KEY_SECRET.as_str();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(config::DATABASE_URL.as_str())
        .await?;

    // Run migrations if available
    if let Err(error) = sqlx::migrate!().run(&pool).await {
        if *config::ALLOW_MIGRATION_FAILURE {
            tracing::warn!(
                ?error,
                "Database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE"
            );
        } else {
            return Err(Box::new(error) as Box<dyn std::error::Error>);
        }
    }

    if config::LLM_API_KEY.is_none() {
        tracing::warn!("OPENAI_API_KEY not set; lead enrichment will use neutral fallbacks");
    }

    let gateway: Arc<dyn BillingGateway> = Arc::new(RazorpayGateway::from_config()?);
    let llm: Arc<dyn CompletionClient> = Arc::new(OpenAiClient::from_config()?);
    let fetcher: Arc<dyn PageFetcher> = Arc::new(HttpPageFetcher::from_config()?);
    let source: Arc<dyn CandidateSource> = Arc::new(SeedCandidates);
    let pipeline = LeadPipeline::new(
        SalesAssistant::new(llm, RetryPolicy::default()),
        fetcher,
        source,
    );
    let reconciliation = start_reconciliation_worker(pool.clone());

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let app = Router::new()
        .route("/", get(root))
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .merge(api_routes())
        .layer(prometheus_layer)
        .layer(Extension(pool.clone()))
        .layer(Extension(gateway))
        .layer(Extension(BillingSettings::from_config()))
        .layer(Extension(pipeline))
        .layer(Extension(reconciliation));

    let addr: SocketAddr = format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT)
        .parse()
        .map_err(|error| Box::new(error) as Box<dyn std::error::Error>)?;
    tracing::info!(%addr, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
