//! Cache configuration.
//!
//! Controls the response cache via the `[cache]` section of `tagcache.toml`.

use std::collections::HashSet;
use std::num::NonZeroUsize;

use serde::Deserialize;

const DEFAULT_CAPACITY: usize = 10_000;
const DEFAULT_UMBRELLA_ATTRIBUTES: [&str; 4] = ["category_ids", "status", "visibility", "url_key"];

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Serve and store responses through the cache at all.
    pub enabled: bool,
    /// Maximum number of cached responses before LRU eviction.
    pub capacity: usize,
    /// Collapse concurrent misses for the same key into one upstream call.
    pub single_flight: bool,
    /// Attributes whose change also invalidates the family umbrella tag.
    pub umbrella_attributes: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: DEFAULT_CAPACITY,
            single_flight: true,
            umbrella_attributes: DEFAULT_UMBRELLA_ATTRIBUTES
                .iter()
                .map(|attr| attr.to_string())
                .collect(),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            capacity: settings.capacity.get(),
            single_flight: settings.single_flight,
            umbrella_attributes: settings.umbrella_attributes.clone(),
        }
    }
}

impl CacheConfig {
    /// Returns the capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.capacity).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn umbrella_attribute_set(&self) -> HashSet<String> {
        self.umbrella_attributes.iter().cloned().collect()
    }
}
