//! Invalidation listener.
//!
//! Receives entity-save notifications from the write path and evicts every
//! cached response tagged with the saved entity before the write returns.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use tracing::{debug, info, instrument};

use crate::application::repos::{HookError, SaveHook};
use crate::domain::entities::{EntityFamily, EntityRef};

use super::config::CacheConfig;
use super::events::{InvalidationEvent, SaveKind};
use super::planner::{InvalidationPlan, UmbrellaPolicy};
use super::store::{CacheBackend, CacheError};
use super::tags::Tag;

const METRIC_INVALIDATED: &str = "tagcache_invalidated_total";
const HOOK_NAME: &str = "cache_invalidation";

pub struct InvalidationListener {
    config: CacheConfig,
    backend: Arc<dyn CacheBackend>,
    policy: UmbrellaPolicy,
}

impl InvalidationListener {
    pub fn new(config: CacheConfig, backend: Arc<dyn CacheBackend>) -> Self {
        let policy = UmbrellaPolicy::from(&config);
        Self {
            config,
            backend,
            policy,
        }
    }

    /// Replace the umbrella policy derived from configuration.
    pub fn with_policy(mut self, policy: UmbrellaPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Invalidate after an update whose changed attributes are unknown.
    pub async fn on_entity_saved(
        &self,
        family: EntityFamily,
        id: impl ToString,
    ) -> Result<usize, CacheError> {
        let event = InvalidationEvent::new(EntityRef::new(family, id), SaveKind::Updated);
        self.handle(&event).await
    }

    /// Run one invalidation pass. Returns the number of evicted entries.
    #[instrument(skip_all, fields(event_id = %event.id, entity = %event.entity))]
    pub async fn handle(&self, event: &InvalidationEvent) -> Result<usize, CacheError> {
        if !self.config.enabled {
            debug!("Cache invalidation skipped: cache disabled");
            return Ok(0);
        }

        let plan = InvalidationPlan::for_event(event, &self.policy);
        let evicted = self.backend.invalidate_tags(&plan.tags).await?;
        counter!(METRIC_INVALIDATED).increment(evicted.len() as u64);

        info!(
            kind = ?event.kind,
            changed = ?event.changed,
            plan = %plan,
            evicted = evicted.len(),
            "Cache invalidation complete"
        );
        Ok(evicted.len())
    }

    /// Invalidate explicit tags, e.g. from an operator request.
    #[instrument(skip(self))]
    pub async fn invalidate_tags(&self, tags: &[Tag]) -> Result<usize, CacheError> {
        let evicted = self.backend.invalidate_tags(tags).await?;
        counter!(METRIC_INVALIDATED).increment(evicted.len() as u64);
        info!(evicted = evicted.len(), "Explicit tag invalidation complete");
        Ok(evicted.len())
    }

    #[instrument(skip(self))]
    pub async fn flush(&self) -> Result<usize, CacheError> {
        let evicted = self.backend.flush().await?;
        counter!(METRIC_INVALIDATED).increment(evicted as u64);
        info!(evicted, "Cache flushed");
        Ok(evicted)
    }

    pub fn policy(&self) -> &UmbrellaPolicy {
        &self.policy
    }
}

#[async_trait]
impl SaveHook for InvalidationListener {
    async fn after_save(&self, event: &InvalidationEvent) -> Result<(), HookError> {
        self.handle(event)
            .await
            .map(|_| ())
            .map_err(|err| HookError::new(HOOK_NAME, err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde_json::json;

    use super::*;
    use crate::application::engine::GraphQlRequest;
    use crate::cache::keys::{CacheKey, CacheKeyBuilder, RequestScope};
    use crate::cache::store::{CacheEntry, MemoryStore};

    fn key(sku: &str) -> CacheKey {
        let request = GraphQlRequest::new("{ products }").with_variables(json!({ "sku": sku }));
        CacheKeyBuilder::new().build(&request, &RequestScope::default())
    }

    fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new(&CacheConfig::default()));
        let put = |sku: &str, tags: &[&str]| {
            let tags = tags.iter().map(|t| Tag::from(*t)).collect();
            store.put_entry(CacheEntry::new(key(sku), Bytes::from("{}"), tags), 0);
        };
        put("p1", &["cat_p", "cat_p_101", "FPC"]);
        put("p2", &["cat_p", "cat_p_102", "FPC"]);
        put("c10", &["cat_c", "cat_c_10", "cat_p", "cat_p_101", "cat_p_102", "FPC"]);
        store
    }

    fn listener(store: &Arc<MemoryStore>) -> InvalidationListener {
        InvalidationListener::new(CacheConfig::default(), store.clone())
    }

    #[tokio::test]
    async fn price_update_evicts_only_dependents() {
        let store = seeded_store();
        let evicted = listener(&store)
            .handle(&InvalidationEvent::updated(EntityRef::product(101), ["price"]))
            .await
            .expect("invalidation");

        assert_eq!(evicted, 2);
        assert!(store.get_entry(&key("p1")).is_none());
        assert!(store.get_entry(&key("c10")).is_none());
        assert!(store.get_entry(&key("p2")).is_some());
    }

    #[tokio::test]
    async fn unknown_changes_take_the_umbrella() {
        let store = seeded_store();
        let evicted = listener(&store)
            .on_entity_saved(EntityFamily::Product, 101)
            .await
            .expect("invalidation");

        assert_eq!(evicted, 3);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn custom_policy_is_honored() {
        let store = seeded_store();
        let evicted = listener(&store)
            .with_policy(UmbrellaPolicy::never())
            .on_entity_saved(EntityFamily::Category, 10)
            .await
            .expect("invalidation");

        assert_eq!(evicted, 1);
        assert!(store.get_entry(&key("p1")).is_some());
    }

    #[tokio::test]
    async fn disabled_cache_skips_invalidation() {
        let store = seeded_store();
        let config = CacheConfig {
            enabled: false,
            ..Default::default()
        };
        let listener = InvalidationListener::new(config, store.clone());

        assert_eq!(
            listener
                .on_entity_saved(EntityFamily::Product, 101)
                .await
                .expect("invalidation"),
            0
        );
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn save_hook_surfaces_backend_failures() {
        struct Down;

        #[async_trait]
        impl CacheBackend for Down {
            async fn get(&self, _: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
                Err(CacheError::unavailable("down"))
            }
            async fn put(&self, _: CacheEntry, _: u64) -> Result<bool, CacheError> {
                Err(CacheError::unavailable("down"))
            }
            async fn evict(
                &self,
                _: &std::collections::HashSet<CacheKey>,
            ) -> Result<usize, CacheError> {
                Err(CacheError::unavailable("down"))
            }
            async fn invalidate_tags(
                &self,
                _: &[Tag],
            ) -> Result<std::collections::HashSet<CacheKey>, CacheError> {
                Err(CacheError::unavailable("down"))
            }
            async fn observe(&self) -> Result<u64, CacheError> {
                Err(CacheError::unavailable("down"))
            }
            fn release(&self, _observed: u64) {}
            async fn flush(&self) -> Result<usize, CacheError> {
                Err(CacheError::unavailable("down"))
            }
            async fn stats(&self) -> Result<crate::cache::CacheStats, CacheError> {
                Err(CacheError::unavailable("down"))
            }
        }

        let listener = InvalidationListener::new(CacheConfig::default(), Arc::new(Down));
        let err = listener
            .after_save(&InvalidationEvent::updated(EntityRef::product(1), ["price"]))
            .await
            .expect_err("backend is down");
        assert_eq!(err.hook, "cache_invalidation");
    }

    #[tokio::test]
    async fn explicit_tags_and_flush() {
        let store = seeded_store();
        let listener = listener(&store);

        assert_eq!(
            listener
                .invalidate_tags(&[Tag::from("cat_c_10")])
                .await
                .expect("invalidate"),
            1
        );
        assert_eq!(listener.flush().await.expect("flush"), 2);
        assert!(store.is_empty());
    }
}
