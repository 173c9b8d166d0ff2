//! Bidirectional tag index.
//!
//! Tracks tag → keys and key → tags so that a tag invalidation finds every
//! affected entry and an overwritten or evicted entry leaves no stale
//! associations behind. The index itself is not synchronized: `MemoryStore`
//! mutates it under the same lock as the entries it describes.

use std::collections::{HashMap, HashSet};

use super::keys::CacheKey;
use super::tags::Tag;

#[derive(Debug, Default)]
pub struct TagIndex {
    tag_to_keys: HashMap<Tag, HashSet<CacheKey>>,
    key_to_tags: HashMap<CacheKey, HashSet<Tag>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `key` with every tag, replacing any previous associations.
    pub fn index(&mut self, tags: &[Tag], key: &CacheKey) {
        self.remove_key(key);

        for tag in tags {
            self.tag_to_keys
                .entry(tag.clone())
                .or_default()
                .insert(key.clone());
        }
        self.key_to_tags
            .insert(key.clone(), tags.iter().cloned().collect());
    }

    /// Drop every association of `tag`, along with the other associations of
    /// the keys it pointed at. Returns those keys; the caller evicts them.
    pub fn invalidate_tag(&mut self, tag: &Tag) -> HashSet<CacheKey> {
        let keys = self.tag_to_keys.remove(tag).unwrap_or_default();
        for key in &keys {
            self.remove_key(key);
        }
        keys
    }

    /// Remove a key and clean up its tag mappings.
    pub fn remove_key(&mut self, key: &CacheKey) {
        let Some(tags) = self.key_to_tags.remove(key) else {
            return;
        };
        for tag in tags {
            if let Some(keys) = self.tag_to_keys.get_mut(&tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tag_to_keys.remove(&tag);
                }
            }
        }
    }

    pub fn keys_for_tag(&self, tag: &Tag) -> HashSet<CacheKey> {
        self.tag_to_keys.get(tag).cloned().unwrap_or_default()
    }

    pub fn tags_for_key(&self, key: &CacheKey) -> HashSet<Tag> {
        self.key_to_tags.get(key).cloned().unwrap_or_default()
    }

    pub fn contains_key(&self, key: &CacheKey) -> bool {
        self.key_to_tags.contains_key(key)
    }

    pub fn clear(&mut self) {
        self.tag_to_keys.clear();
        self.key_to_tags.clear();
    }

    /// Number of distinct tags with at least one key.
    pub fn tag_count(&self) -> usize {
        self.tag_to_keys.len()
    }

    /// Number of indexed keys.
    pub fn key_count(&self) -> usize {
        self.key_to_tags.len()
    }
}
