use anyhow::Result;
use content_pipeline::bulk::BulkProcessor;
use content_pipeline::cache::ScopedCache;
use content_pipeline::config::Config;
use content_pipeline::content::{ContentStore, ContentType, MemoryStore};
use content_pipeline::db::Database;
use content_pipeline::llm::{LlmClient, RateLimiter, UsageLedger};
use content_pipeline::resolver::Resolver;
use content_pipeline::review::ReviewQueue;
use content_pipeline::server::{self, AppState};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored in production)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("content_pipeline=info".parse()?),
        )
        .init();

    info!("Starting content pipeline");

    // Load configuration from environment
    let config = Config::from_env()?;

    let db = Database::new(&config.database_path)?;
    let store = demo_store();
    let cache = Arc::new(ScopedCache::new());
    cache.attach(store.as_ref());

    let limiter = Arc::new(RateLimiter::per_minute(config.requests_per_minute));
    let ledger = UsageLedger::new(db.clone());
    let llm = LlmClient::new(&config, limiter, ledger.clone());

    let store: Arc<dyn ContentStore> = store;
    let resolver = Resolver::new(Arc::clone(&store), Arc::clone(&cache), &config);
    let bulk = Arc::new(BulkProcessor::new(
        db.clone(),
        Arc::clone(&store),
        Arc::clone(&cache),
        llm.clone(),
        &config,
    ));
    let review = ReviewQueue::new(db, Arc::clone(&store), config.confidence_threshold);

    let state = Arc::new(AppState {
        config,
        store,
        resolver,
        bulk,
        review,
        ledger,
        llm,
    });

    server::run(state).await
}

/// In-memory store with a handful of items so the admin API is usable out
/// of the box. A real deployment wires its CMS adapter here instead.
fn demo_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());

    store.insert(1, ContentType::Page);
    store.seed_field(1, "title", "Welcome to Early Start Academy");
    store.seed_field(1, "content", "Pediatric therapy services across metro Atlanta.");

    store.insert(2, ContentType::Location);
    store.seed_field(2, "title", "Marietta Center");
    store.seed_field(2, "location_city", "Marietta");
    store.seed_field(2, "location_description", "Our flagship clinic near the square.");

    store.insert(3, ContentType::Program);
    store.seed_field(3, "title", "ABA Therapy");
    store.seed_field(3, "program_age_range", "18 months to 6 years");

    store
}
