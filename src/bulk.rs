//! Bulk translation jobs.
//!
//! A job is a persisted, resumable unit of work: gap detection finds every
//! content item missing a translated field, the job queues those items, and
//! the processor walks them one at a time. Each item is its own failure
//! domain — a provider error marks that item failed and moves on. Progress
//! counters and the job state machine live in the database, so a restarted
//! process picks up exactly where it stopped.

use crate::cache::ScopedCache;
use crate::config::Config;
use crate::content::{ContentId, ContentStore, ContentType};
use crate::db::{Database, JobStatus};
use crate::i18n::Language;
use crate::llm::{LlmClient, RateLimitPolicy, DEFAULT_TIMEOUT};
use crate::retry::{with_retry_if, RetryConfig};
use crate::review::ReviewQueue;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// A canonical field with no translated counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    pub content_id: ContentId,
    pub content_type: ContentType,
    pub field: String,
}

/// Scan one content type for items whose canonical fields lack a
/// translation. Fields with no canonical value are not gaps; there is
/// nothing to translate.
pub fn detect_gaps(
    store: &dyn ContentStore,
    content_type: ContentType,
    language: Language,
) -> Vec<Gap> {
    let mut gaps = Vec::new();
    for content_id in store.query(content_type) {
        for field in content_type.translatable_fields() {
            if store.get_field(content_id, field).is_none() {
                continue;
            }
            if store
                .get_field(content_id, &language.field_key(field))
                .is_none()
            {
                gaps.push(Gap {
                    content_id,
                    content_type,
                    field: (*field).to_string(),
                });
            }
        }
    }
    gaps
}

/// Pluggable confidence score for a (source, translation) pair, in [0, 1].
/// Without one, every translation scores 1.0 and is written directly.
pub type ConfidenceScorer = Arc<dyn Fn(&str, &str) -> f64 + Send + Sync>;

/// Outcome of one processing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The item's translations were written to the store.
    Translated(ContentId),
    /// The item was routed to the review queue instead of the store.
    Flagged(ContentId),
    /// The item failed; the job keeps going.
    Failed(ContentId),
    /// No pending items remain; the job is complete.
    Finished,
    /// The job was cancelled; nothing was processed.
    Cancelled,
}

/// One failed item in a job report.
#[derive(Debug, Clone, Serialize)]
pub struct ItemError {
    pub position: i64,
    pub content_id: ContentId,
    pub message: String,
}

/// Point-in-time view of a job for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub id: i64,
    pub status: JobStatus,
    pub language: String,
    pub total: i64,
    pub completed: i64,
    pub failed: i64,
    pub pending: i64,
    pub started_at: String,
    pub errors: Vec<ItemError>,
}

pub struct BulkProcessor {
    db: Database,
    store: Arc<dyn ContentStore>,
    cache: Arc<ScopedCache>,
    llm: LlmClient,
    review: ReviewQueue,
    retry: RetryConfig,
    request_timeout: Duration,
    cache_ttl: Duration,
    confidence_threshold: f64,
    scorer: Option<ConfidenceScorer>,
}

impl BulkProcessor {
    pub fn new(
        db: Database,
        store: Arc<dyn ContentStore>,
        cache: Arc<ScopedCache>,
        llm: LlmClient,
        config: &Config,
    ) -> Self {
        let review = ReviewQueue::new(db.clone(), Arc::clone(&store), config.confidence_threshold);
        Self {
            db,
            store,
            cache,
            llm,
            review,
            retry: RetryConfig::llm_call(),
            request_timeout: DEFAULT_TIMEOUT,
            cache_ttl: Duration::from_secs(config.cache_ttl_secs),
            confidence_threshold: config.confidence_threshold,
            scorer: None,
        }
    }

    /// Install a confidence scorer. Translations scoring below the
    /// threshold are flagged for review instead of written.
    pub fn with_scorer(mut self, scorer: ConfidenceScorer) -> Self {
        self.scorer = Some(scorer);
        self
    }

    /// Gap scan across content types, served through the scoped cache.
    /// Store mutations invalidate the scan per content type.
    pub fn scan_gaps(&self, types: &[ContentType], language: Language) -> Result<Vec<Gap>> {
        let mut gaps = Vec::new();
        for content_type in types {
            let scoped: Vec<Gap> = self.cache.get_or_compute(
                content_type.as_str(),
                &("gap_scan", language.code()),
                self.cache_ttl,
                || Ok(detect_gaps(self.store.as_ref(), *content_type, language)),
            )?;
            gaps.extend(scoped);
        }
        Ok(gaps)
    }

    /// Create a job covering every item with at least one gap, and start it.
    pub fn start_job(&self, types: &[ContentType], language: Language) -> Result<i64> {
        if language.is_canonical() {
            bail!("Cannot start a bulk job targeting the canonical language");
        }

        let gaps = self.scan_gaps(types, language)?;
        let mut item_ids: Vec<ContentId> = gaps.iter().map(|gap| gap.content_id).collect();
        item_ids.dedup();

        self.start_job_for_items(&item_ids, language)
    }

    /// Create a job over an explicit list of content ids, processed in
    /// submission order. The usual path for retrying a known set of items
    /// (say, the ones that failed last run) without a fresh gap scan.
    ///
    /// Ids the store does not know fail individually during processing;
    /// submission only rejects a canonical target.
    pub fn start_job_for_items(&self, item_ids: &[ContentId], language: Language) -> Result<i64> {
        if language.is_canonical() {
            bail!("Cannot start a bulk job targeting the canonical language");
        }

        let job_id = self.db.create_job(language.code(), item_ids)?;
        self.db
            .try_transition_job(job_id, JobStatus::Pending, JobStatus::Running)?;
        info!(
            "started bulk job {} for {} ({} items)",
            job_id,
            language.code(),
            item_ids.len()
        );
        Ok(job_id)
    }

    /// Process the next pending item of a job.
    ///
    /// Failure of a single item never fails the job: the item is marked
    /// failed with its error message and the next call moves on.
    pub async fn process_next(&self, job_id: i64) -> Result<StepOutcome> {
        let job = self
            .db
            .get_job(job_id)?
            .with_context(|| format!("Bulk job {} not found", job_id))?;

        match job.status {
            JobStatus::Cancelled => return Ok(StepOutcome::Cancelled),
            JobStatus::Completed => return Ok(StepOutcome::Finished),
            JobStatus::Pending | JobStatus::Running => {}
        }

        let item = match self.db.next_pending_item(job_id)? {
            Some(item) => item,
            None => {
                self.db
                    .try_transition_job(job_id, JobStatus::Running, JobStatus::Completed)?;
                return Ok(StepOutcome::Finished);
            }
        };

        let language = Language::from_code(&job.language)?;
        match self.translate_item(item.content_id, language).await {
            Ok(flagged) => {
                self.db.mark_item(job_id, item.position, true, None)?;
                if flagged {
                    Ok(StepOutcome::Flagged(item.content_id))
                } else {
                    Ok(StepOutcome::Translated(item.content_id))
                }
            }
            Err(e) => {
                let message = format!("{:#}", e);
                warn!(
                    "bulk job {}: item {} failed: {}",
                    job_id, item.content_id, message
                );
                self.db
                    .mark_item(job_id, item.position, false, Some(&message))?;
                Ok(StepOutcome::Failed(item.content_id))
            }
        }
    }

    /// Run a job to completion (or cancellation).
    pub async fn drive(&self, job_id: i64) -> Result<JobReport> {
        loop {
            match self.process_next(job_id).await? {
                StepOutcome::Finished | StepOutcome::Cancelled => break,
                _ => {}
            }
        }
        self.job_report(job_id)?
            .with_context(|| format!("Bulk job {} not found", job_id))
    }

    /// Request cancellation. Pending items stay untouched; the item in
    /// flight (if any) finishes before the loop observes the new state.
    pub fn cancel_job(&self, job_id: i64) -> Result<bool> {
        let cancelled = self.db.cancel_job(job_id)?;
        if cancelled {
            info!("bulk job {} cancelled", job_id);
        }
        Ok(cancelled)
    }

    pub fn job_report(&self, job_id: i64) -> Result<Option<JobReport>> {
        let job = match self.db.get_job(job_id)? {
            Some(job) => job,
            None => return Ok(None),
        };
        let pending = self.db.count_pending_items(job_id)?;
        let errors = self
            .db
            .item_errors(job_id)?
            .into_iter()
            .map(|(position, content_id, message)| ItemError {
                position,
                content_id,
                message,
            })
            .collect();

        Ok(Some(JobReport {
            id: job.id,
            status: job.status,
            language: job.language,
            total: job.total,
            completed: job.completed_count,
            failed: job.failed_count,
            pending,
            started_at: job.started_at,
            errors,
        }))
    }

    /// Translate every gap field of one item. Returns true when the result
    /// went to the review queue instead of the store.
    async fn translate_item(&self, content_id: ContentId, language: Language) -> Result<bool> {
        let content_type = self
            .store
            .content_type(content_id)
            .with_context(|| format!("Content item {} does not exist", content_id))?;

        let mut sources: BTreeMap<String, String> = BTreeMap::new();
        for field in content_type.translatable_fields() {
            let suffixed = language.field_key(field);
            if self.store.get_field(content_id, &suffixed).is_some() {
                continue;
            }
            if let Some(value) = self.store.get_field(content_id, field) {
                sources.insert((*field).to_string(), value);
            }
        }

        if sources.is_empty() {
            return Ok(false);
        }

        let hint = format!("Fields of a {} on a marketing website", content_type.as_str());
        let operation = format!("Bulk translation of content {}", content_id);
        let translated = with_retry_if(
            &self.retry,
            &operation,
            || {
                self.llm.translate_fields(
                    &sources,
                    language,
                    Some(&hint),
                    content_type.as_str(),
                    RateLimitPolicy::Block,
                    self.request_timeout,
                )
            },
            |e| e.is_retryable(),
        )
        .await?;

        let confidence = self.score(&sources, &translated);
        if confidence < self.confidence_threshold {
            let payload: serde_json::Map<String, serde_json::Value> = translated
                .iter()
                .map(|(field, value)| {
                    (
                        language.field_key(field),
                        serde_json::Value::String(value.clone()),
                    )
                })
                .collect();
            self.review.flag(
                content_id,
                "low-confidence machine translation",
                confidence,
                &serde_json::Value::Object(payload),
            )?;
            return Ok(true);
        }

        for (field, value) in &translated {
            let suffixed = language.field_key(field);
            self.store.set_field(content_id, &suffixed, value);
            let source = sources.get(field).map(String::as_str).unwrap_or_default();
            self.db.upsert_translation_unit(
                content_id,
                &suffixed,
                language.code(),
                source,
                Some(value),
                "ai-generated",
            )?;
        }
        Ok(false)
    }

    /// Lowest per-field score decides the whole item.
    fn score(&self, sources: &BTreeMap<String, String>, translated: &BTreeMap<String, String>) -> f64 {
        let scorer = match &self.scorer {
            Some(scorer) => scorer,
            None => return 1.0,
        };
        translated
            .iter()
            .map(|(field, value)| {
                let source = sources.get(field).map(String::as_str).unwrap_or_default();
                scorer(source, value)
            })
            .fold(1.0_f64, f64::min)
    }
}
