//! Pipeline metrics and observability.
//!
//! Process-wide counters for cache behavior, LLM traffic, and which tier of
//! the fallback chain served each resolution. Rendering never surfaces
//! failures to end users, so these counters are the main signal that
//! translations are missing or the provider is unhappy.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

/// Global pipeline metrics singleton.
pub struct PipelineMetrics {
    cache_hits: AtomicUsize,
    cache_misses: AtomicUsize,
    llm_calls: AtomicUsize,
    llm_failures: AtomicUsize,
    /// Resolutions served by a language-suffixed override on the item itself
    fallback_override: AtomicUsize,
    /// Resolutions served by the site-wide home override (tier 2)
    fallback_home: AtomicUsize,
    /// Resolutions that degraded to the canonical-language value
    fallback_default: AtomicUsize,
}

static METRICS: OnceLock<PipelineMetrics> = OnceLock::new();

impl PipelineMetrics {
    /// Get the global metrics instance, initializing it on first call.
    pub fn global() -> &'static PipelineMetrics {
        METRICS.get_or_init(|| PipelineMetrics {
            cache_hits: AtomicUsize::new(0),
            cache_misses: AtomicUsize::new(0),
            llm_calls: AtomicUsize::new(0),
            llm_failures: AtomicUsize::new(0),
            fallback_override: AtomicUsize::new(0),
            fallback_home: AtomicUsize::new(0),
            fallback_default: AtomicUsize::new(0),
        })
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_llm_call(&self) {
        self.llm_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_llm_failure(&self) {
        self.llm_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback_override(&self) {
        self.fallback_override.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback_home(&self) {
        self.fallback_home.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback_default(&self) {
        self.fallback_default.fetch_add(1, Ordering::Relaxed);
    }

    /// Generate a point-in-time metrics report.
    pub fn report(&self) -> MetricsReport {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let cache_hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        MetricsReport {
            cache_hits: hits,
            cache_misses: misses,
            cache_hit_rate,
            llm_calls: self.llm_calls.load(Ordering::Relaxed),
            llm_failures: self.llm_failures.load(Ordering::Relaxed),
            fallback_override: self.fallback_override.load(Ordering::Relaxed),
            fallback_home: self.fallback_home.load(Ordering::Relaxed),
            fallback_default: self.fallback_default.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero (test isolation).
    #[cfg(test)]
    pub fn reset(&self) {
        self.cache_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);
        self.llm_calls.store(0, Ordering::Relaxed);
        self.llm_failures.store(0, Ordering::Relaxed);
        self.fallback_override.store(0, Ordering::Relaxed);
        self.fallback_home.store(0, Ordering::Relaxed);
        self.fallback_default.store(0, Ordering::Relaxed);
    }
}

/// Snapshot of pipeline counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub cache_hits: usize,
    pub cache_misses: usize,
    /// Cache hit rate as a percentage (0-100)
    pub cache_hit_rate: f64,
    pub llm_calls: usize,
    pub llm_failures: usize,
    pub fallback_override: usize,
    pub fallback_home: usize,
    pub fallback_default: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_cache_counters() {
        let metrics = PipelineMetrics::global();
        metrics.reset();

        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_miss();

        let report = metrics.report();
        assert_eq!(report.cache_hits, 3);
        assert_eq!(report.cache_misses, 1);
        assert_eq!(report.cache_hit_rate, 75.0);
    }

    #[test]
    #[serial]
    fn test_report_empty() {
        let metrics = PipelineMetrics::global();
        metrics.reset();

        let report = metrics.report();
        assert_eq!(report.cache_hits, 0);
        assert_eq!(report.cache_hit_rate, 0.0);
        assert_eq!(report.llm_calls, 0);
    }

    #[test]
    #[serial]
    fn test_fallback_tier_counters() {
        let metrics = PipelineMetrics::global();
        metrics.reset();

        metrics.record_fallback_override();
        metrics.record_fallback_home();
        metrics.record_fallback_default();
        metrics.record_fallback_default();

        let report = metrics.report();
        assert_eq!(report.fallback_override, 1);
        assert_eq!(report.fallback_home, 1);
        assert_eq!(report.fallback_default, 2);
    }

    #[test]
    #[serial]
    fn test_llm_counters() {
        let metrics = PipelineMetrics::global();
        metrics.reset();

        metrics.record_llm_call();
        metrics.record_llm_call();
        metrics.record_llm_failure();

        let report = metrics.report();
        assert_eq!(report.llm_calls, 2);
        assert_eq!(report.llm_failures, 1);
    }

    #[test]
    fn test_global_returns_same_instance() {
        let metrics1 = PipelineMetrics::global();
        let metrics2 = PipelineMetrics::global();
        assert!(std::ptr::eq(metrics1, metrics2));
    }
}
