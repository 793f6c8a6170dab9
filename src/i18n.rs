//! Language registry and validated language type.
//!
//! Single source of truth for the languages the pipeline knows about. The
//! canonical language (English) is the source of every translation; each
//! non-canonical language carries the URL prefix and field-key suffix used
//! throughout the resolver and bulk processor.

use anyhow::{bail, Result};
use std::sync::OnceLock;

/// Configuration for a supported language.
#[derive(Debug, Clone)]
pub struct LanguageConfig {
    /// ISO 639-1 language code (e.g., "en", "es")
    pub code: &'static str,

    /// English name of the language (e.g., "Spanish")
    pub name: &'static str,

    /// Native name of the language (e.g., "Español")
    pub native_name: &'static str,

    /// Whether this is the canonical/source language (exactly one is true)
    pub is_canonical: bool,

    /// Whether this language is enabled as a translation target
    pub enabled: bool,
}

/// Global language registry singleton, initialized once on first access.
pub struct LanguageRegistry {
    languages: Vec<LanguageConfig>,
}

static REGISTRY: OnceLock<LanguageRegistry> = OnceLock::new();

impl LanguageRegistry {
    /// Get the global language registry instance.
    pub fn get() -> &'static LanguageRegistry {
        REGISTRY.get_or_init(|| LanguageRegistry {
            languages: default_languages(),
        })
    }

    /// Look up a language configuration by its code.
    pub fn get_by_code(&self, code: &str) -> Option<&LanguageConfig> {
        self.languages.iter().find(|lang| lang.code == code)
    }

    /// All enabled languages.
    pub fn list_enabled(&self) -> Vec<&LanguageConfig> {
        self.languages.iter().filter(|lang| lang.enabled).collect()
    }

    /// The canonical language configuration.
    ///
    /// # Panics
    /// Panics if zero or multiple canonical languages are defined — that is a
    /// registry configuration error, not a runtime condition.
    pub fn canonical(&self) -> &LanguageConfig {
        let canonical: Vec<_> = self
            .languages
            .iter()
            .filter(|lang| lang.is_canonical)
            .collect();
        match canonical.len() {
            0 => panic!("No canonical language found in registry"),
            1 => canonical[0],
            _ => panic!("Multiple canonical languages found in registry"),
        }
    }
}

fn default_languages() -> Vec<LanguageConfig> {
    vec![
        LanguageConfig {
            code: "en",
            name: "English",
            native_name: "English",
            is_canonical: true,
            enabled: true,
        },
        LanguageConfig {
            code: "es",
            name: "Spanish",
            native_name: "Español",
            is_canonical: false,
            enabled: true,
        },
    ]
}

/// A language validated against the registry.
///
/// Only supported, enabled languages can be constructed, so every function
/// downstream can take a `Language` without re-checking codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Language {
    code: &'static str,
}

impl Language {
    pub const ENGLISH: Language = Language { code: "en" };
    pub const SPANISH: Language = Language { code: "es" };

    /// Create a Language from an ISO 639-1 code, validating against the
    /// registry.
    pub fn from_code(code: &str) -> Result<Language> {
        let registry = LanguageRegistry::get();
        match registry.get_by_code(code) {
            Some(config) if config.enabled => Ok(Language { code: config.code }),
            Some(_) => bail!("Language '{}' is not enabled", code),
            None => bail!("Unknown language code: '{}'", code),
        }
    }

    /// The canonical (source) language.
    pub fn canonical() -> Language {
        let config = LanguageRegistry::get().canonical();
        Language { code: config.code }
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Full configuration from the registry.
    pub fn config(&self) -> &'static LanguageConfig {
        LanguageRegistry::get()
            .get_by_code(self.code)
            .expect("Language code should always be valid")
    }

    pub fn name(&self) -> &'static str {
        self.config().name
    }

    pub fn is_canonical(&self) -> bool {
        self.config().is_canonical
    }

    /// The URL path prefix for this language ("/es"); empty for the
    /// canonical language, which lives at the site root.
    pub fn url_prefix(&self) -> String {
        if self.is_canonical() {
            String::new()
        } else {
            format!("/{}", self.code)
        }
    }

    /// The language-suffixed variant of a content field key
    /// (e.g., `title` → `title_es`). Canonical fields are unsuffixed.
    pub fn field_key(&self, field: &str) -> String {
        if self.is_canonical() {
            field.to_string()
        } else {
            format!("{}_{}", field, self.code)
        }
    }
}
