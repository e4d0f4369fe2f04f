//! Domain layer: feed model, stationboard value types, and caching.
//!
//! This module contains the decoded GTFS-RT feed model consumed by the
//! snapshot persistor, the request/response types of the stationboard
//! route, stop identity and conflict detection, the response cache, and
//! the traits of the DB-bound collaborators.

pub mod cache_key;
pub mod collaborators;
pub mod feed;
pub mod response_cache;
pub mod rt_meta;
pub mod stationboard;
pub mod stop_identity;

pub use cache_key::{CacheKey, CacheKeyParts};
pub use collaborators::{BuildError, ResolveError, StationboardBuilder, StopResolver};
pub use feed::{DecodedFeed, FeedKind, LocalizedText, TranslatedText, decode_feed};
pub use response_cache::{CachedBoard, ResponseCache};
pub use rt_meta::{AlertsMeta, InstanceInfo, RtDefaults, RtMeta};
pub use stationboard::{
    BoardPayload, BuildRequest, IncludeAlerts, Lang, NormalizeContext, StationboardResponse,
};
pub use stop_identity::{IdentityConflict, ResolvedStopIdentity, detect_conflict};
