//! JSON-LD structured data validation and AI-assisted repair.
//!
//! Validation is table-driven: each known `@type` carries the properties a
//! rich result requires and the ones search engines merely like to see.
//! Repair sends the document and its error list to the provider, then
//! re-validates the answer; a fix that still fails validation is rejected
//! outright, never applied.

use crate::error::RepairError;
use crate::llm::{LlmClient, RateLimitPolicy};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::info;

/// Required and recommended properties per schema type.
const TYPE_RULES: &[(&str, &[&str], &[&str])] = &[
    (
        "LocalBusiness",
        &["name", "address"],
        &["telephone", "url", "geo", "openingHoursSpecification"],
    ),
    (
        "ChildCare",
        &["name", "address"],
        &["telephone", "url", "geo", "openingHoursSpecification"],
    ),
    (
        "Article",
        &["headline", "author", "datePublished"],
        &["image", "dateModified", "publisher"],
    ),
    (
        "NewsArticle",
        &["headline", "author", "datePublished"],
        &["image", "dateModified", "publisher"],
    ),
    (
        "BlogPosting",
        &["headline", "author", "datePublished"],
        &["image", "dateModified", "publisher"],
    ),
    (
        "Event",
        &["name", "startDate", "location"],
        &["endDate", "description", "offers", "image"],
    ),
    ("FAQPage", &["mainEntity"], &[]),
    (
        "JobPosting",
        &["title", "description", "datePosted", "hiringOrganization"],
        &["jobLocation", "validThrough", "employmentType"],
    ),
    ("BreadcrumbList", &["itemListElement"], &[]),
];

fn rules_for(type_name: &str) -> Option<(&'static [&'static str], &'static [&'static str])> {
    TYPE_RULES
        .iter()
        .find(|(name, _, _)| *name == type_name)
        .map(|(_, required, recommended)| (*required, *recommended))
}

/// Outcome of validating one JSON-LD document.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    /// True when no errors were found; warnings alone do not invalidate.
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// The parsed document, present whenever the input was at least JSON.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed: Option<Value>,
}

/// Validate a JSON-LD document (single node or `@graph` collection).
pub fn validate(raw: &str) -> ValidationReport {
    let parsed: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            return ValidationReport {
                valid: false,
                errors: vec![format!("invalid JSON: {}", e)],
                warnings: Vec::new(),
                parsed: None,
            };
        }
    };

    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    match &parsed {
        Value::Object(object) => {
            if !object.contains_key("@context") {
                warnings.push("missing @context".to_string());
            }
            if let Some(Value::Array(nodes)) = object.get("@graph") {
                if nodes.is_empty() {
                    errors.push("@graph is empty".to_string());
                }
                for (index, node) in nodes.iter().enumerate() {
                    validate_node(node, &format!("@graph[{}]", index), &mut errors, &mut warnings);
                }
            } else {
                validate_node(&parsed, "document", &mut errors, &mut warnings);
            }
        }
        _ => errors.push("document root must be a JSON object".to_string()),
    }

    ValidationReport {
        valid: errors.is_empty(),
        errors,
        warnings,
        parsed: Some(parsed),
    }
}

/// Validate one node against the type rules. `@type` may be a string or an
/// array of strings; every listed type is checked.
fn validate_node(node: &Value, label: &str, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
    let object = match node.as_object() {
        Some(object) => object,
        None => {
            errors.push(format!("{}: node must be a JSON object", label));
            return;
        }
    };

    let type_names: Vec<&str> = match object.get("@type") {
        Some(Value::String(name)) => vec![name.as_str()],
        Some(Value::Array(names)) => names.iter().filter_map(|n| n.as_str()).collect(),
        Some(_) => {
            errors.push(format!("{}: @type must be a string or array of strings", label));
            return;
        }
        None => {
            errors.push(format!("{}: missing @type", label));
            return;
        }
    };

    if type_names.is_empty() {
        errors.push(format!("{}: @type is empty", label));
        return;
    }

    for type_name in type_names {
        match rules_for(type_name) {
            Some((required, recommended)) => {
                for field in required {
                    if !has_property(object, field) {
                        errors.push(format!(
                            "{}: {} missing required field '{}'",
                            label, type_name, field
                        ));
                    }
                }
                for field in recommended {
                    if !has_property(object, field) {
                        warnings.push(format!(
                            "{}: {} missing recommended field '{}'",
                            label, type_name, field
                        ));
                    }
                }
            }
            None => warnings.push(format!("{}: unknown @type '{}'", label, type_name)),
        }
    }
}

/// A property counts as present only when it carries a non-empty value.
fn has_property(object: &serde_json::Map<String, Value>, field: &str) -> bool {
    match object.get(field) {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(_) => true,
    }
}

/// Ask the provider to repair an invalid document, then re-validate.
///
/// Returns the fixed document only when it passes validation; a fix that
/// still carries errors is rejected. Callers must never apply a rejected
/// fix.
pub async fn request_fix(
    client: &LlmClient,
    raw: &str,
    errors: &[String],
    policy: RateLimitPolicy,
    timeout: Duration,
) -> Result<String, RepairError> {
    let fixed = client.fix_schema(raw, errors, policy, timeout).await?;

    let report = validate(&fixed);
    if !report.valid {
        return Err(RepairError::Rejected {
            errors: report.errors,
        });
    }

    info!(
        "schema repair accepted ({} warnings remain)",
        report.warnings.len()
    );
    Ok(fixed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use crate::db::Database;
    use crate::llm::{RateLimiter, UsageLedger, DEFAULT_TIMEOUT};
    use serial_test::serial;
    use std::sync::Arc;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // ==================== Validation Tests ====================

    #[test]
    fn test_valid_event_passes() {
        let report = validate(
            r#"{
                "@context": "https://schema.org",
                "@type": "Event",
                "name": "Open House",
                "startDate": "2026-09-01T10:00:00-04:00",
                "location": {"@type": "Place", "name": "Marietta Center"}
            }"#,
        );
        assert!(report.valid, "errors: {:?}", report.errors);
    }

    #[test]
    fn test_missing_required_fields_are_errors() {
        let report = validate(r#"{"@context": "https://schema.org", "@type": "Event"}"#);
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 3);
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("missing required field 'startDate'")));
    }

    #[test]
    fn test_missing_recommended_fields_are_warnings_only() {
        let report = validate(
            r#"{
                "@context": "https://schema.org",
                "@type": "LocalBusiness",
                "name": "Early Start Academy",
                "address": "123 Main St, Marietta, GA"
            }"#,
        );
        assert!(report.valid);
        assert!(report
            .warnings
            .iter()
            .any(|w| w.contains("missing recommended field 'telephone'")));
    }

    #[test]
    fn test_missing_type_is_error() {
        let report = validate(r#"{"@context": "https://schema.org", "name": "Nameless"}"#);
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("missing @type")));
    }

    #[test]
    fn test_unknown_type_is_warning() {
        let report = validate(r#"{"@context": "https://schema.org", "@type": "Spaceship"}"#);
        assert!(report.valid);
        assert!(report
            .warnings
            .iter()
            .any(|w| w.contains("unknown @type 'Spaceship'")));
    }

    #[test]
    fn test_type_array_checks_every_type() {
        let report = validate(
            r#"{
                "@context": "https://schema.org",
                "@type": ["LocalBusiness", "ChildCare"],
                "name": "Early Start Academy"
            }"#,
        );
        assert!(!report.valid);
        // address missing for both types
        assert_eq!(
            report
                .errors
                .iter()
                .filter(|e| e.contains("'address'"))
                .count(),
            2
        );
    }

    #[test]
    fn test_graph_nodes_validated_individually() {
        let report = validate(
            r#"{
                "@context": "https://schema.org",
                "@graph": [
                    {"@type": "FAQPage", "mainEntity": [{"@type": "Question"}]},
                    {"@type": "BreadcrumbList"}
                ]
            }"#,
        );
        assert!(!report.valid);
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("@graph[1]") && e.contains("itemListElement")));
        assert!(!report.errors.iter().any(|e| e.contains("@graph[0]")));
    }

    #[test]
    fn test_invalid_json_reports_parse_error() {
        let report = validate("{not json");
        assert!(!report.valid);
        assert!(report.parsed.is_none());
        assert!(report.errors[0].contains("invalid JSON"));
    }

    #[test]
    fn test_non_object_root_is_error() {
        let report = validate(r#"["a", "b"]"#);
        assert!(!report.valid);
        assert!(report.errors[0].contains("must be a JSON object"));
    }

    #[test]
    fn test_empty_string_property_counts_as_missing() {
        let report = validate(
            r#"{
                "@context": "https://schema.org",
                "@type": "Event",
                "name": "   ",
                "startDate": "2026-09-01",
                "location": "Marietta"
            }"#,
        );
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("'name'")));
    }

    #[test]
    fn test_missing_context_is_warning() {
        let report = validate(r#"{"@type": "FAQPage", "mainEntity": [{"q": 1}]}"#);
        assert!(report.valid);
        assert!(report.warnings.iter().any(|w| w.contains("@context")));
    }

    #[test]
    fn test_job_posting_rules() {
        let report = validate(
            r#"{
                "@context": "https://schema.org",
                "@type": "JobPosting",
                "title": "Board Certified Behavior Analyst",
                "description": "Full-time BCBA role",
                "datePosted": "2026-08-01",
                "hiringOrganization": {"@type": "Organization", "name": "Early Start"}
            }"#,
        );
        assert!(report.valid, "errors: {:?}", report.errors);
    }

    // ==================== Repair Tests ====================

    fn test_client(api_url: &str) -> LlmClient {
        let mut config = test_config();
        config.openai_api_url = api_url.to_string();
        LlmClient::new(
            &config,
            Arc::new(RateLimiter::per_minute(60)),
            UsageLedger::new(Database::new(":memory:").unwrap()),
        )
    }

    fn provider_response(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": content}}
            ],
            "usage": {"total_tokens": 50}
        })
    }

    #[tokio::test]
    #[serial]
    async fn test_request_fix_accepts_valid_repair() {
        let mock_server = MockServer::start().await;
        let fixed = r#"{"@context":"https://schema.org","@type":"Event","name":"Open House","startDate":"2026-09-01","location":"Marietta Center"}"#;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(provider_response(fixed)))
            .mount(&mock_server)
            .await;

        let client = test_client(&mock_server.uri());
        let broken = r#"{"@context":"https://schema.org","@type":"Event"}"#;
        let errors = validate(broken).errors;

        let result = request_fix(
            &client,
            broken,
            &errors,
            RateLimitPolicy::FailFast,
            DEFAULT_TIMEOUT,
        )
        .await
        .unwrap();
        assert_eq!(result, fixed);
    }

    #[tokio::test]
    #[serial]
    async fn test_request_fix_rejects_still_invalid_repair() {
        let mock_server = MockServer::start().await;
        // The "fix" still lacks startDate and location
        let still_broken = r#"{"@context":"https://schema.org","@type":"Event","name":"Open House"}"#;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(provider_response(still_broken)),
            )
            .mount(&mock_server)
            .await;

        let client = test_client(&mock_server.uri());
        let broken = r#"{"@context":"https://schema.org","@type":"Event"}"#;
        let errors = validate(broken).errors;

        let err = request_fix(
            &client,
            broken,
            &errors,
            RateLimitPolicy::FailFast,
            DEFAULT_TIMEOUT,
        )
        .await
        .unwrap_err();
        match err {
            RepairError::Rejected { errors } => {
                assert!(errors.iter().any(|e| e.contains("startDate")));
            }
            other => panic!("expected Rejected, got {:?}", other),
        }
    }

    #[tokio::test]
    #[serial]
    async fn test_request_fix_propagates_provider_failure() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("down"))
            .mount(&mock_server)
            .await;

        let client = test_client(&mock_server.uri());
        let err = request_fix(
            &client,
            r#"{"@type":"Event"}"#,
            &["missing startDate".to_string()],
            RateLimitPolicy::FailFast,
            DEFAULT_TIMEOUT,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RepairError::Llm(_)));
    }
}
