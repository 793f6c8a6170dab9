use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    // LLM provider
    pub openai_api_key: String,
    pub openai_api_url: String,
    pub openai_model: String,

    // Rate limiting
    pub requests_per_minute: u32,

    // Cache
    pub cache_ttl_secs: u64,

    // Review gating
    pub confidence_threshold: f64,

    // Site layout
    pub site_base_url: String,
    pub front_page_id: i64,
    pub home_settings_id: i64,

    // Server
    pub database_path: String,
    pub port: u16,
    pub api_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            // LLM provider
            openai_api_key: std::env::var("OPENAI_API_KEY").context("OPENAI_API_KEY not set")?,
            openai_api_url: std::env::var("OPENAI_API_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string()),
            openai_model: std::env::var("OPENAI_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),

            // Rate limiting
            requests_per_minute: std::env::var("REQUESTS_PER_MINUTE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),

            // Cache
            cache_ttl_secs: std::env::var("CACHE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3600),

            // Review gating
            confidence_threshold: std::env::var("CONFIDENCE_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.7),

            // Site layout
            site_base_url: std::env::var("SITE_BASE_URL")
                .unwrap_or_else(|_| "https://example.com".to_string()),
            front_page_id: std::env::var("FRONT_PAGE_ID")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
            home_settings_id: std::env::var("HOME_SETTINGS_ID")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),

            // Server
            database_path: std::env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "data/pipeline.db".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            api_key: std::env::var("API_KEY").ok().filter(|v| !v.is_empty()),
        })
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    /// A config usable by unit tests without touching the environment.
    pub fn test_config() -> Config {
        Config {
            openai_api_key: "test-openai-key".to_string(),
            openai_api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            openai_model: "gpt-4o-mini".to_string(),
            requests_per_minute: 60,
            cache_ttl_secs: 3600,
            confidence_threshold: 0.7,
            site_base_url: "https://example.com".to_string(),
            front_page_id: 1,
            home_settings_id: 0,
            database_path: ":memory:".to_string(),
            port: 8080,
            api_key: None,
        }
    }

    #[test]
    fn test_defaults_in_test_config() {
        let config = test_config();
        assert_eq!(config.requests_per_minute, 60);
        assert_eq!(config.cache_ttl_secs, 3600);
        assert!((config.confidence_threshold - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.openai_model, "gpt-4o-mini");
    }
}
