//! # stationboard-gateway
//!
//! Departure board backend for GTFS-Realtime feeds.
//!
//! Pollers replace the stored realtime snapshot of each feed kind inside
//! one advisory-locked transaction. The stationboard route merges that
//! snapshot with the static timetable, guards the build with a hard
//! timeout, falls back to a per-process response cache, and lets polling
//! clients detect "nothing changed" through `since_rt`.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP)
//!     │
//!     ├── REST Handlers (api/)
//!     │
//!     ├── StationboardService (service/)
//!     ├── ResponseCache, collaborator traits (domain/)
//!     │
//!     ├── PgStopResolver, PgStationboardBuilder (persistence/)
//!     │
//!     └── PostgreSQL  ◄── snapshot persist ◄── FeedPoller (ingest/)
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod ingest;
pub mod persistence;
pub mod service;
