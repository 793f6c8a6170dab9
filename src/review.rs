//! Human review queue for low-confidence translations.
//!
//! Items flagged below the confidence threshold never reach the live
//! content store; their proposed values sit in the queue payload until an
//! editor approves them. Approval is a single step: the payload is applied
//! to the store and recorded as manually-reviewed translation units.

use crate::content::{ContentId, ContentStore};
use crate::db::{Database, ReviewRecord};
use crate::i18n::LanguageRegistry;
use anyhow::{Context, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

pub struct ReviewQueue {
    db: Database,
    store: Arc<dyn ContentStore>,
    confidence_threshold: f64,
}

impl ReviewQueue {
    pub fn new(db: Database, store: Arc<dyn ContentStore>, confidence_threshold: f64) -> Self {
        Self {
            db,
            store,
            confidence_threshold,
        }
    }

    /// Flag a content item for review with its proposed field values.
    ///
    /// Every flagged item lands in pending state. Confidence at or above the
    /// threshold only marks the row as eligible for fast approval in the
    /// admin UI; it never skips the queue.
    pub fn flag(
        &self,
        content_id: ContentId,
        reason: &str,
        confidence: f64,
        payload: &Value,
    ) -> Result<()> {
        let fast_approval = confidence >= self.confidence_threshold;
        let payload_json =
            serde_json::to_string(payload).context("Failed to serialize review payload")?;
        self.db
            .flag_review(content_id, reason, confidence, &payload_json, fast_approval)?;
        info!(
            "flagged content {} for review (confidence {:.2}, fast_approval {})",
            content_id, confidence, fast_approval
        );
        Ok(())
    }

    /// All pending review entries, oldest first.
    pub fn pending(&self) -> Result<Vec<ReviewRecord>> {
        self.db.pending_reviews()
    }

    /// Approve the newest pending entry for a content item: mark it
    /// approved and commit its payload to the content store in one step.
    ///
    /// Returns `None` when nothing is pending for that item.
    pub fn approve(&self, content_id: ContentId) -> Result<Option<ReviewRecord>> {
        let record = match self.db.approve_review(content_id)? {
            Some(record) => record,
            None => return Ok(None),
        };

        let payload: Value = serde_json::from_str(&record.payload)
            .context("Review payload is not valid JSON")?;
        let fields = payload
            .as_object()
            .context("Review payload must be a JSON object")?;

        for (field_key, value) in fields {
            if let Some(text) = value.as_str() {
                self.store.set_field(content_id, field_key, text);
                self.record_unit(content_id, field_key, text)?;
            }
        }

        info!(
            "approved review for content {} ({} fields applied)",
            content_id,
            fields.len()
        );
        Ok(Some(record))
    }

    /// Record an approved field write as a manually-reviewed translation
    /// unit. Keys without a language suffix are applied but not tracked.
    fn record_unit(&self, content_id: ContentId, field_key: &str, value: &str) -> Result<()> {
        for language in LanguageRegistry::get().list_enabled() {
            if language.is_canonical {
                continue;
            }
            let suffix = format!("_{}", language.code);
            if let Some(base_field) = field_key.strip_suffix(&suffix) {
                let source = self
                    .store
                    .get_field(content_id, base_field)
                    .unwrap_or_default();
                self.db.upsert_translation_unit(
                    content_id,
                    field_key,
                    language.code,
                    &source,
                    Some(value),
                    "manual",
                )?;
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ContentType, MemoryStore};
    use serde_json::json;

    fn fixture() -> (Arc<MemoryStore>, ReviewQueue) {
        let store = Arc::new(MemoryStore::new());
        store.insert(10, ContentType::Location);
        store.seed_field(10, "title", "Marietta Center");

        let queue = ReviewQueue::new(
            Database::new(":memory:").unwrap(),
            Arc::clone(&store) as Arc<dyn ContentStore>,
            0.7,
        );
        (store, queue)
    }

    // ==================== Flagging Tests ====================

    #[test]
    fn test_flag_always_lands_pending() {
        let (_, queue) = fixture();
        queue
            .flag(10, "low confidence", 0.95, &json!({"title_es": "Centro de Marietta"}))
            .unwrap();

        let pending = queue.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, "pending");
    }

    #[test]
    fn test_confidence_threshold_sets_fast_approval_only() {
        let (_, queue) = fixture();
        queue
            .flag(10, "check me", 0.9, &json!({"title_es": "A"}))
            .unwrap();
        queue
            .flag(11, "check me", 0.4, &json!({"title_es": "B"}))
            .unwrap();

        let pending = queue.pending().unwrap();
        assert_eq!(pending.len(), 2);
        let high = pending.iter().find(|r| r.content_id == 10).unwrap();
        let low = pending.iter().find(|r| r.content_id == 11).unwrap();
        assert!(high.fast_approval);
        assert!(!low.fast_approval);
    }

    #[test]
    fn test_flagged_values_do_not_touch_store() {
        let (store, queue) = fixture();
        queue
            .flag(10, "low confidence", 0.3, &json!({"title_es": "Centro de Marietta"}))
            .unwrap();
        assert_eq!(store.get_field(10, "title_es"), None);
    }

    // ==================== Approval Tests ====================

    #[test]
    fn test_approve_commits_payload_to_store() {
        let (store, queue) = fixture();
        queue
            .flag(
                10,
                "low confidence",
                0.5,
                &json!({"title_es": "Centro de Marietta", "location_city_es": "Marietta"}),
            )
            .unwrap();

        let record = queue.approve(10).unwrap().unwrap();
        assert_eq!(record.content_id, 10);
        assert_eq!(
            store.get_field(10, "title_es"),
            Some("Centro de Marietta".to_string())
        );
        assert_eq!(
            store.get_field(10, "location_city_es"),
            Some("Marietta".to_string())
        );
        assert!(queue.pending().unwrap().is_empty());
    }

    #[test]
    fn test_approve_without_pending_entry_is_none() {
        let (_, queue) = fixture();
        assert!(queue.approve(10).unwrap().is_none());
    }

    #[test]
    fn test_approve_is_single_shot() {
        let (_, queue) = fixture();
        queue
            .flag(10, "low confidence", 0.5, &json!({"title_es": "Centro"}))
            .unwrap();

        assert!(queue.approve(10).unwrap().is_some());
        assert!(queue.approve(10).unwrap().is_none());
    }

    #[test]
    fn test_approve_records_manual_translation_unit() {
        let (_, queue) = fixture();
        queue
            .flag(10, "low confidence", 0.5, &json!({"title_es": "Centro de Marietta"}))
            .unwrap();
        queue.approve(10).unwrap();

        let unit = queue
            .db
            .live_translation_unit(10, "title_es", "es")
            .unwrap()
            .unwrap();
        assert_eq!(unit.0, Some("Centro de Marietta".to_string()));
        assert_eq!(unit.1, "manual");
    }

    #[test]
    fn test_non_string_payload_values_are_skipped() {
        let (store, queue) = fixture();
        queue
            .flag(
                10,
                "mixed payload",
                0.5,
                &json!({"title_es": "Centro", "weird": 42}),
            )
            .unwrap();
        queue.approve(10).unwrap();

        assert_eq!(store.get_field(10, "title_es"), Some("Centro".to_string()));
        assert_eq!(store.get_field(10, "weird"), None);
    }
}
