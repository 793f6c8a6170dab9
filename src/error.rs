//! Failure taxonomy for the translation pipeline.
//!
//! A missing translation is *not* represented here: the resolver degrades to
//! the canonical-language value instead of failing. These types cover the
//! operations that genuinely can fail — provider calls and schema repair —
//! with enough structure (kind + message) that callers can decide
//! retry-vs-skip without inspecting provider-specific details.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the LLM client.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The process-wide requests-per-minute ceiling was hit (fail-fast policy)
    /// or the provider answered 429. The caller must back off or block.
    #[error("rate limit exceeded: {0}")]
    RateLimited(String),

    /// The caller-specified timeout elapsed before the provider answered.
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    /// Transport-level failure (DNS, connect, TLS, 5xx).
    #[error("network error: {0}")]
    Network(String),

    /// The provider answered 2xx but the body was not the expected shape.
    /// Not retryable: a retry would double cost for the same malformed answer.
    #[error("malformed provider response: {0}")]
    Parse(String),

    /// Authentication or quota failure (missing key, 401, 403). Surfaced
    /// distinctly so the admin UI can point at credentials rather than content.
    #[error("provider configuration error: {0}")]
    Config(String),
}

impl LlmError {
    /// Whether a caller may reasonably retry this error with backoff.
    ///
    /// Rate limiting counts as retryable for batch contexts: the bulk
    /// processor backs off and tries the item again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Timeout(_) | LlmError::Network(_) | LlmError::RateLimited(_)
        )
    }
}

/// Errors surfaced by the schema repair flow.
#[derive(Debug, Error)]
pub enum RepairError {
    /// The underlying provider call failed.
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// The AI produced a fix, but re-validation still reported errors.
    /// The fix is rejected and never applied.
    #[error("repair rejected, fixed document still invalid: {errors:?}")]
    Rejected { errors: Vec<String> },
}
