//! Response cache gateway.
//!
//! Looks requests up by key, delegates misses to the content engine, tags and
//! stores the result, and reports the outcome through debug headers.
//! Anything but a query operation, and everything while the cache is
//! disabled, bypasses storage; an unavailable backend degrades to
//! pass-through.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use metrics::{counter, histogram};
use tracing::{Span, debug, field, instrument, warn};

use crate::application::engine::{ContentEngine, EngineError, GraphQlRequest, Resolution};

use super::config::CacheConfig;
use super::flight::SingleFlight;
use super::keys::{CacheKey, CacheKeyBuilder, QueryShape, RequestScope};
use super::events::Epoch;
use super::store::{CacheBackend, CacheEntry};
use super::tags::{Tag, TagExtractor, header_value};

pub const CACHE_DEBUG_HEADER: &str = "X-Magento-Cache-Debug";
pub const CACHE_TAGS_HEADER: &str = "X-Magento-Tags";

const METRIC_HIT: &str = "tagcache_hit_total";
const METRIC_MISS: &str = "tagcache_miss_total";
const METRIC_BYPASS: &str = "tagcache_bypass_total";
const METRIC_PASSTHROUGH: &str = "tagcache_passthrough_total";
const METRIC_STORE_SKIPPED: &str = "tagcache_store_skipped_total";
const METRIC_RESOLVE_MS: &str = "tagcache_resolve_ms";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    /// Not eligible for caching; no debug headers are emitted.
    Bypass,
}

impl CacheStatus {
    pub fn header_value(self) -> Option<&'static str> {
        match self {
            CacheStatus::Hit => Some("HIT"),
            CacheStatus::Miss => Some("MISS"),
            CacheStatus::Bypass => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResponse {
    pub body: Bytes,
    pub status: CacheStatus,
    pub tags: Vec<Tag>,
}

impl GatewayResponse {
    fn bypass(body: Bytes) -> Self {
        Self {
            body,
            status: CacheStatus::Bypass,
            tags: Vec::new(),
        }
    }

    fn hit(entry: CacheEntry) -> Self {
        Self {
            body: entry.body,
            status: CacheStatus::Hit,
            tags: entry.tags,
        }
    }

    /// Header pairs describing the cache outcome.
    pub fn debug_headers(&self) -> Vec<(&'static str, String)> {
        let Some(status) = self.status.header_value() else {
            return Vec::new();
        };
        vec![
            (CACHE_DEBUG_HEADER, status.to_string()),
            (CACHE_TAGS_HEADER, header_value(&self.tags)),
        ]
    }
}

/// Keeps an observed epoch registered until the miss is stored or abandoned.
struct Observation<'a> {
    backend: &'a dyn CacheBackend,
    epoch: Epoch,
}

impl Drop for Observation<'_> {
    fn drop(&mut self) {
        self.backend.release(self.epoch);
    }
}

enum Lookup {
    Hit(CacheEntry),
    Miss,
    Unavailable,
}

#[derive(Clone)]
pub struct CacheGateway {
    config: CacheConfig,
    engine: Arc<dyn ContentEngine>,
    backend: Arc<dyn CacheBackend>,
    keys: CacheKeyBuilder,
    extractor: TagExtractor,
    flights: SingleFlight,
}

impl CacheGateway {
    pub fn new(
        config: CacheConfig,
        engine: Arc<dyn ContentEngine>,
        backend: Arc<dyn CacheBackend>,
    ) -> Self {
        Self {
            config,
            engine,
            backend,
            keys: CacheKeyBuilder::new(),
            extractor: TagExtractor::new(),
            flights: SingleFlight::new(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn key_for(&self, request: &GraphQlRequest, scope: &RequestScope) -> CacheKey {
        self.keys.build(request, scope)
    }

    #[instrument(skip_all, fields(key = field::Empty, outcome = field::Empty))]
    pub async fn handle(
        &self,
        request: &GraphQlRequest,
        scope: &RequestScope,
    ) -> Result<GatewayResponse, EngineError> {
        let shape = QueryShape::of(request);
        if !self.config.enabled || !shape.is_cacheable() {
            Span::current().record("outcome", "bypass");
            counter!(METRIC_BYPASS).increment(1);
            let resolution = self.resolve(request).await?;
            return Ok(GatewayResponse::bypass(resolution.body));
        }

        let key = self.keys.build_for(&shape, request, scope);
        Span::current().record("key", key.as_str());

        match self.lookup(&key).await {
            Lookup::Hit(entry) => return Ok(self.served_hit(entry)),
            Lookup::Unavailable => return self.pass_through(request).await,
            Lookup::Miss => {}
        }

        let _permit = if self.config.single_flight {
            let permit = self.flights.acquire(&key).await;
            match self.lookup(&key).await {
                Lookup::Hit(entry) => return Ok(self.served_hit(entry)),
                Lookup::Unavailable => return self.pass_through(request).await,
                Lookup::Miss => Some(permit),
            }
        } else {
            None
        };

        let observation = match self.backend.observe().await {
            Ok(epoch) => Observation {
                backend: self.backend.as_ref(),
                epoch,
            },
            Err(err) => {
                warn!(error = %err, "Cache epoch unavailable, passing through");
                return self.pass_through(request).await;
            }
        };

        let resolution = self.resolve(request).await?;
        let tags = self.extractor.extract_or_degraded(&resolution);
        let entry = CacheEntry::new(key, resolution.body.clone(), tags.clone());

        let stored = self.backend.put(entry, observation.epoch).await;
        drop(observation);
        match stored {
            Ok(true) => debug!(tags = %header_value(&tags), "Stored response"),
            Ok(false) => {
                counter!(METRIC_STORE_SKIPPED).increment(1);
                debug!("Response depended on data invalidated mid-flight, not stored");
            }
            Err(err) => warn!(error = %err, "Failed to store response"),
        }

        Span::current().record("outcome", "miss");
        counter!(METRIC_MISS).increment(1);
        Ok(GatewayResponse {
            body: resolution.body,
            status: CacheStatus::Miss,
            tags,
        })
    }

    async fn lookup(&self, key: &CacheKey) -> Lookup {
        match self.backend.get(key).await {
            Ok(Some(entry)) => Lookup::Hit(entry),
            Ok(None) => Lookup::Miss,
            Err(err) => {
                warn!(error = %err, "Cache lookup failed, passing through");
                Lookup::Unavailable
            }
        }
    }

    fn served_hit(&self, entry: CacheEntry) -> GatewayResponse {
        Span::current().record("outcome", "hit");
        counter!(METRIC_HIT).increment(1);
        debug!(age = %(time::OffsetDateTime::now_utc() - entry.created_at), "Serving cached response");
        GatewayResponse::hit(entry)
    }

    async fn pass_through(&self, request: &GraphQlRequest) -> Result<GatewayResponse, EngineError> {
        Span::current().record("outcome", "pass_through");
        counter!(METRIC_PASSTHROUGH).increment(1);
        let resolution = self.resolve(request).await?;
        let tags = self.extractor.extract_or_degraded(&resolution);
        Ok(GatewayResponse {
            body: resolution.body,
            status: CacheStatus::Miss,
            tags,
        })
    }

    async fn resolve(&self, request: &GraphQlRequest) -> Result<Resolution, EngineError> {
        let started_at = Instant::now();
        let result = self.engine.resolve(request).await;
        histogram!(METRIC_RESOLVE_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);

        if let Err(err) = &result {
            warn!(error = %err, "Content engine failed, nothing cached");
        }
        result
    }
}
