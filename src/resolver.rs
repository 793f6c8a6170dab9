//! Field resolution and URL localization.
//!
//! Rendering a page in a non-canonical language never fails: every field
//! lookup walks a three-tier fallback chain and degrades to the canonical
//! value when no translation exists. Which tier served each lookup is
//! recorded in the pipeline metrics, since a silently-degrading site is
//! otherwise invisible.

use crate::cache::ScopedCache;
use crate::config::Config;
use crate::content::{ContentId, ContentStore};
use crate::i18n::Language;
use crate::metrics::PipelineMetrics;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Which tier of the fallback chain produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A language-suffixed override stored on the item itself.
    Override,
    /// The site-wide home override (front page only).
    HomeOverride,
    /// The canonical-language value; no translation exists.
    Default,
}

/// A resolved field value plus where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub value: String,
    pub origin: Origin,
}

/// Paths ending in a file extension are assets: they get a language prefix
/// but never a trailing slash.
fn file_extension_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\.(jpg|jpeg|png|gif|pdf|doc|docx|zip|webp)$")
            .expect("file extension regex must compile")
    })
}

/// Resolves content fields through the fallback chain and localizes
/// internal URLs.
pub struct Resolver {
    store: Arc<dyn ContentStore>,
    cache: Arc<ScopedCache>,
    ttl: Duration,
    front_page_id: ContentId,
    home_settings_id: ContentId,
    site_base_url: String,
}

impl Resolver {
    pub fn new(store: Arc<dyn ContentStore>, cache: Arc<ScopedCache>, config: &Config) -> Self {
        Self {
            store,
            cache,
            ttl: Duration::from_secs(config.cache_ttl_secs),
            front_page_id: config.front_page_id,
            home_settings_id: config.home_settings_id,
            site_base_url: config.site_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Resolve a field of a content item for a language.
    ///
    /// Non-canonical lookups walk the chain: item override, then the
    /// site-wide home override (front page only), then the canonical value.
    /// `None` means the item has no canonical value either — an absent
    /// translation alone is never an error.
    pub fn resolve(&self, content_id: ContentId, field: &str, language: Language) -> Option<Resolved> {
        let metrics = PipelineMetrics::global();

        if !language.is_canonical() {
            let suffixed = language.field_key(field);

            if let Some(value) = self.cached_field(content_id, &suffixed) {
                metrics.record_fallback_override();
                return Some(Resolved {
                    value,
                    origin: Origin::Override,
                });
            }

            if content_id == self.front_page_id {
                if let Some(value) = self.cached_field(self.home_settings_id, &suffixed) {
                    metrics.record_fallback_home();
                    return Some(Resolved {
                        value,
                        origin: Origin::HomeOverride,
                    });
                }
            }

            let value = self.cached_field(content_id, field)?;
            metrics.record_fallback_default();
            return Some(Resolved {
                value,
                origin: Origin::Default,
            });
        }

        // Canonical requests read the canonical value directly; the chain
        // does not run and no fallback tier is counted.
        let value = self.cached_field(content_id, field)?;
        Some(Resolved {
            value,
            origin: Origin::Default,
        })
    }

    /// Field read through the scoped cache. Items without a known content
    /// type (the home settings object, typically) read the store directly.
    fn cached_field(&self, content_id: ContentId, key: &str) -> Option<String> {
        match self.store.content_type(content_id) {
            Some(content_type) => self
                .cache
                .get_or_compute(
                    content_type.as_str(),
                    &("field", content_id, key),
                    self.ttl,
                    || Ok(self.store.get_field(content_id, key)),
                )
                // Serializing Option<String> cannot fail; read through on
                // the off chance it ever does.
                .unwrap_or_else(|_| self.store.get_field(content_id, key)),
            None => self.store.get_field(content_id, key),
        }
    }

    /// Rewrite an internal URL for a language: insert the language prefix
    /// and normalize to a trailing slash (file assets keep their bare path).
    ///
    /// Idempotent: already-localized URLs come back unchanged, as do
    /// anchors, external URLs, and non-HTTP schemes.
    pub fn localize_url(&self, url: &str, language: Language) -> String {
        if language.is_canonical() || url.is_empty() || url.starts_with('#') {
            return url.to_string();
        }

        // Same-site absolute URLs are rewritten on their path; anything
        // else carrying a scheme or authority passes through untouched.
        let (head, path_and_rest) = if let Some(rest) = url.strip_prefix(&self.site_base_url) {
            (self.site_base_url.as_str(), rest)
        } else {
            let scheme_like = url
                .split('/')
                .next()
                .map(|s| s.contains(':'))
                .unwrap_or(false);
            if scheme_like || url.starts_with("//") || !url.starts_with('/') {
                return url.to_string();
            }
            ("", url)
        };

        let split_at = path_and_rest
            .find(['?', '#'])
            .unwrap_or(path_and_rest.len());
        let (path, suffix) = path_and_rest.split_at(split_at);

        let prefix = language.url_prefix();
        if path == prefix || path.starts_with(&format!("{}/", prefix)) {
            return url.to_string();
        }

        let mut localized = format!("{}{}", prefix, if path.is_empty() { "/" } else { path });
        if !localized.ends_with('/') && !file_extension_re().is_match(&localized) {
            localized.push('/');
        }

        format!("{}{}{}", head, localized, suffix)
    }
}
