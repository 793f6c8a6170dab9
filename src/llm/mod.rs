//! LLM provider client.
//!
//! Wraps the OpenAI-compatible chat completions endpoint with the concerns
//! every caller needs: the process-wide rate limiter, per-call timeouts,
//! structured error classification, and token accounting from the provider's
//! own usage report. The client never retries on its own; batch callers wrap
//! it in retry logic, interactive callers surface the error immediately.

mod rate_limit;
mod usage;

pub use rate_limit::{RateLimitPolicy, RateLimiter};
pub use usage::{estimate_cost, UsageLedger, UsageReport};

use crate::config::Config;
use crate::error::LlmError;
use crate::i18n::Language;
use crate::metrics::PipelineMetrics;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Default per-call deadline when the caller has no stronger opinion.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_completion_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: i64,
}

fn system(content: String) -> Message {
    Message {
        role: "system".to_string(),
        content,
    }
}

fn user(content: String) -> Message {
    Message {
        role: "user".to_string(),
        content,
    }
}

fn build_translation_system_prompt(target_language: &str, context_hint: Option<&str>) -> String {
    let mut prompt = format!(
        r#"You are a professional translator for a marketing website. Translate from English to {}.

### DO NOT translate:
- URLs, email addresses, and phone numbers
- Brand names, product names, and proper names
- HTML tag names and attribute values

### DO:
- Preserve all HTML markup exactly as given
- Keep the same paragraph structure
- Use natural, fluent {} as written for native speakers
- Keep the warm, professional tone of the original"#,
        target_language, target_language
    );
    if let Some(hint) = context_hint {
        prompt.push_str("\n\n### Context:\n");
        prompt.push_str(hint);
    }
    prompt
}

fn build_fields_system_prompt(target_language: &str, context_hint: Option<&str>) -> String {
    format!(
        "{}\n\nThe user message is a JSON object mapping field names to English text. \
         Respond with a JSON object using the exact same keys, each value translated to {}. \
         Respond with JSON only, no commentary.",
        build_translation_system_prompt(target_language, context_hint),
        target_language
    )
}

fn build_schema_fix_prompt(raw_json: &str, errors: &[String]) -> String {
    let error_list = errors
        .iter()
        .map(|e| format!("- {}", e))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "The following JSON-LD structured data document failed validation:\n\n{}\n\n\
         Validation errors:\n{}\n\n\
         Return the corrected document. Fix only what the errors require, \
         preserve every valid property, and do not invent facts.",
        raw_json, error_list
    )
}

/// Client for the chat completions endpoint.
#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    limiter: Arc<RateLimiter>,
    ledger: UsageLedger,
}

impl LlmClient {
    pub fn new(config: &Config, limiter: Arc<RateLimiter>, ledger: UsageLedger) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: config.openai_api_url.clone(),
            api_key: config.openai_api_key.clone(),
            model: config.openai_model.clone(),
            limiter,
            ledger,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Translate a single text value to `target`. Canonical targets
    /// short-circuit without a provider call.
    pub async fn translate(
        &self,
        text: &str,
        target: Language,
        context_hint: Option<&str>,
        usage_bucket: &str,
        policy: RateLimitPolicy,
        timeout: Duration,
    ) -> Result<String, LlmError> {
        if target.is_canonical() {
            return Ok(text.to_string());
        }

        let messages = vec![
            system(build_translation_system_prompt(target.name(), context_hint)),
            user(text.to_string()),
        ];
        let content = self
            .chat(messages, false, usage_bucket, policy, timeout)
            .await?;
        Ok(content.trim().to_string())
    }

    /// Translate several fields of one item in a single provider call.
    /// Returns translations only for keys the provider answered; callers
    /// treat missing keys as untranslated.
    pub async fn translate_fields(
        &self,
        fields: &BTreeMap<String, String>,
        target: Language,
        context_hint: Option<&str>,
        usage_bucket: &str,
        policy: RateLimitPolicy,
        timeout: Duration,
    ) -> Result<BTreeMap<String, String>, LlmError> {
        if target.is_canonical() {
            return Ok(fields.clone());
        }
        if fields.is_empty() {
            return Ok(BTreeMap::new());
        }

        let payload =
            serde_json::to_string_pretty(fields).map_err(|e| LlmError::Parse(e.to_string()))?;
        let messages = vec![
            system(build_fields_system_prompt(target.name(), context_hint)),
            user(payload),
        ];
        let content = self
            .chat(messages, true, usage_bucket, policy, timeout)
            .await?;

        let parsed: BTreeMap<String, serde_json::Value> = serde_json::from_str(content.trim())
            .map_err(|e| LlmError::Parse(format!("field batch was not a JSON object: {}", e)))?;

        let mut translated = BTreeMap::new();
        for key in fields.keys() {
            if let Some(value) = parsed.get(key).and_then(|v| v.as_str()) {
                translated.insert(key.clone(), value.to_string());
            }
        }
        Ok(translated)
    }

    /// Ask the provider to repair an invalid JSON-LD document. The caller is
    /// responsible for re-validating the result before using it.
    pub async fn fix_schema(
        &self,
        raw_json: &str,
        errors: &[String],
        policy: RateLimitPolicy,
        timeout: Duration,
    ) -> Result<String, LlmError> {
        let messages = vec![
            system(
                "You are a Schema.org structured data expert. \
                 Respond with a single corrected JSON-LD document and nothing else."
                    .to_string(),
            ),
            user(build_schema_fix_prompt(raw_json, errors)),
        ];
        let content = self.chat(messages, true, "schema", policy, timeout).await?;
        Ok(content.trim().to_string())
    }

    /// One rate-limited, deadline-bounded provider call.
    async fn chat(
        &self,
        messages: Vec<Message>,
        json_mode: bool,
        usage_bucket: &str,
        policy: RateLimitPolicy,
        timeout: Duration,
    ) -> Result<String, LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::Config("provider API key is not set".to_string()));
        }

        self.limiter.acquire(policy).await?;

        let metrics = PipelineMetrics::global();
        metrics.record_llm_call();

        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            max_completion_tokens: 4096,
            temperature: Some(0.3),
            response_format: json_mode.then(|| ResponseFormat {
                format_type: "json_object".to_string(),
            }),
        };

        let outcome = match tokio::time::timeout(timeout, self.execute(&request)).await {
            Ok(inner) => inner,
            Err(_) => Err(LlmError::Timeout(timeout)),
        };

        match outcome {
            Ok((content, tokens)) => {
                if let Some(tokens) = tokens {
                    // Accounting is best-effort; a ledger write failure must
                    // not discard a paid-for translation.
                    if let Err(e) = self.ledger.record(usage_bucket, tokens) {
                        warn!("failed to record token usage: {:#}", e);
                    }
                }
                Ok(content)
            }
            Err(e) => {
                metrics.record_llm_failure();
                Err(e)
            }
        }
    }

    async fn execute(&self, request: &ChatRequest) -> Result<(String, Option<i64>), LlmError> {
        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read body: {}>", e));
            return Err(match status.as_u16() {
                401 | 403 => LlmError::Config(format!("provider returned {}: {}", status, body)),
                429 => LlmError::RateLimited(format!("provider returned 429: {}", body)),
                _ => LlmError::Network(format!("provider returned {}: {}", status, body)),
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        let content = chat
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| LlmError::Parse("response contained no choices".to_string()))?;

        Ok((content, chat.usage.map(|u| u.total_tokens)))
    }
}
