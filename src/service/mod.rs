//! Service layer: business logic orchestration.
//!
//! [`StationboardService`] coordinates the stop resolver, the stationboard
//! builder and the response cache for the stationboard route.

pub mod stationboard_service;

pub use stationboard_service::{
    BoardOutcome, CacheStats, StationboardReply, StationboardRequest, StationboardService,
    parse_since_rt,
};
