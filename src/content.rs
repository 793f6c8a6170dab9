//! Content store seam and typed content schema.
//!
//! The CMS's object store is an external collaborator: the pipeline only
//! consumes a narrow key/value interface over it. `MemoryStore` is the
//! in-process implementation used by tests and the demo server; a production
//! deployment plugs its own adapter in behind the same trait.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Identifier for a content item (post, page, location...).
pub type ContentId = i64;

/// The content types the pipeline operates over, with their known
/// translatable fields. A typed schema map instead of free-form meta-key
/// strings keeps the fallback-chain logic generic without stringly-typed
/// lookups everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Page,
    Post,
    Location,
    Program,
}

impl ContentType {
    /// Stable identifier, also used as the cache scope for queries touching
    /// this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Page => "page",
            ContentType::Post => "post",
            ContentType::Location => "location",
            ContentType::Program => "program",
        }
    }

    pub fn from_str(value: &str) -> Option<ContentType> {
        match value {
            "page" => Some(ContentType::Page),
            "post" => Some(ContentType::Post),
            "location" => Some(ContentType::Location),
            "program" => Some(ContentType::Program),
            _ => None,
        }
    }

    /// The canonical field keys that require a translated counterpart.
    pub fn translatable_fields(&self) -> &'static [&'static str] {
        match self {
            ContentType::Page | ContentType::Post => &["title", "content", "excerpt"],
            ContentType::Location => &[
                "title",
                "content",
                "excerpt",
                "location_city",
                "location_description",
            ],
            ContentType::Program => &["title", "content", "excerpt", "program_age_range"],
        }
    }
}

/// Callback fired after any field mutation, carrying the content type of the
/// touched item. The cache subscribes to this for scope invalidation.
pub type MutationListener = Arc<dyn Fn(ContentType) + Send + Sync>;

/// The narrow content-repository interface the pipeline consumes.
///
/// All reads are total: an absent field is `None`, never an error — the
/// resolver's fallback chain depends on that.
pub trait ContentStore: Send + Sync {
    /// Read a single field of a content item.
    fn get_field(&self, content_id: ContentId, key: &str) -> Option<String>;

    /// Write a single field of a content item, firing mutation listeners.
    fn set_field(&self, content_id: ContentId, key: &str, value: &str);

    /// All item ids of a content type, in stable (ascending id) order.
    fn query(&self, content_type: ContentType) -> Vec<ContentId>;

    /// The type of a content item, if it exists.
    fn content_type(&self, content_id: ContentId) -> Option<ContentType>;

    /// Register a mutation listener.
    fn subscribe(&self, listener: MutationListener);
}

#[derive(Debug, Default)]
struct Item {
    content_type: Option<ContentType>,
    fields: HashMap<String, String>,
}

/// In-memory content store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    items: Arc<Mutex<HashMap<ContentId, Item>>>,
    listeners: Arc<Mutex<Vec<MutationListener>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a content item of the given type with initial fields.
    pub fn insert(&self, content_id: ContentId, content_type: ContentType) {
        let mut items = self.items.lock().unwrap();
        let item = items.entry(content_id).or_default();
        item.content_type = Some(content_type);
    }

    /// Seed a field without firing mutation listeners (fixture setup).
    pub fn seed_field(&self, content_id: ContentId, key: &str, value: &str) {
        let mut items = self.items.lock().unwrap();
        let item = items.entry(content_id).or_default();
        item.fields.insert(key.to_string(), value.to_string());
    }

    fn notify(&self, content_type: ContentType) {
        let listeners = self.listeners.lock().unwrap().clone();
        for listener in listeners {
            listener(content_type);
        }
    }
}

impl ContentStore for MemoryStore {
    fn get_field(&self, content_id: ContentId, key: &str) -> Option<String> {
        let items = self.items.lock().unwrap();
        items
            .get(&content_id)
            .and_then(|item| item.fields.get(key))
            .filter(|value| !value.is_empty())
            .cloned()
    }

    fn set_field(&self, content_id: ContentId, key: &str, value: &str) {
        let content_type = {
            let mut items = self.items.lock().unwrap();
            let item = items.entry(content_id).or_default();
            item.fields.insert(key.to_string(), value.to_string());
            item.content_type
        };
        if let Some(content_type) = content_type {
            self.notify(content_type);
        }
    }

    fn query(&self, content_type: ContentType) -> Vec<ContentId> {
        let items = self.items.lock().unwrap();
        let mut ids: Vec<ContentId> = items
            .iter()
            .filter(|(_, item)| item.content_type == Some(content_type))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    fn content_type(&self, content_id: ContentId) -> Option<ContentType> {
        let items = self.items.lock().unwrap();
        items.get(&content_id).and_then(|item| item.content_type)
    }

    fn subscribe(&self, listener: MutationListener) {
        self.listeners.lock().unwrap().push(listener);
    }
}
