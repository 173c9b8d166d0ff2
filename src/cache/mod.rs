//! Tag-indexed response cache.
//!
//! Full GraphQL responses are stored under a key derived from the request and
//! its scope headers, together with the cache tags of every entity the
//! response was built from:
//!
//! - **Lookup**: [`CacheGateway`] serves hits, collapses concurrent misses and
//!   stores fresh responses with their tags.
//! - **Invalidation**: [`InvalidationListener`] turns entity saves into tag
//!   sets and evicts every response carrying one of them.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! capacity = 10000
//! single_flight = true
//! umbrella_attributes = ["category_ids", "status", "visibility", "url_key"]
//! ```

mod config;
mod events;
mod flight;
mod gateway;
mod keys;
mod listener;
pub(crate) mod lock;
mod planner;
mod registry;
mod store;
mod tags;

pub use config::CacheConfig;
pub use events::{Epoch, InvalidationEvent, SaveKind};
pub use flight::{FlightPermit, SingleFlight};
pub use gateway::{
    CACHE_DEBUG_HEADER, CACHE_TAGS_HEADER, CacheGateway, CacheStatus, GatewayResponse,
};
pub use keys::{CURRENCY_HEADER, CacheKey, CacheKeyBuilder, QueryShape, RequestScope, STORE_HEADER};
pub use listener::InvalidationListener;
pub use planner::{InvalidationPlan, UmbrellaPolicy};
pub use registry::TagIndex;
pub use store::{CacheBackend, CacheEntry, CacheError, CacheStats, MemoryStore};
pub use tags::{
    ExtractError, GLOBAL_TAG, TAG_SEPARATOR, Tag, TagExtractor, header_value, parse_header_value,
};
