//! AI-assisted multilingual content pipeline.
//!
//! Resolves translated content fields with graceful fallback, runs
//! resumable bulk translation jobs against an LLM provider, validates and
//! repairs JSON-LD structured data, and gates low-confidence output behind
//! a human review queue. A small axum API exposes the admin operations.

pub mod bulk;
pub mod cache;
pub mod config;
pub mod content;
pub mod db;
pub mod error;
pub mod i18n;
pub mod llm;
pub mod metrics;
pub mod resolver;
pub mod retry;
pub mod review;
pub mod schema;
pub mod security;
pub mod server;

pub use bulk::{BulkProcessor, Gap, StepOutcome};
pub use cache::ScopedCache;
pub use config::Config;
pub use content::{ContentId, ContentStore, ContentType, MemoryStore};
pub use db::Database;
pub use error::{LlmError, RepairError};
pub use i18n::Language;
pub use llm::{LlmClient, RateLimitPolicy, RateLimiter, UsageLedger};
pub use resolver::{Origin, Resolved, Resolver};
pub use review::ReviewQueue;
