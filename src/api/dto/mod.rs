//! Data Transfer Objects for REST request/response serialization.

pub mod stationboard_dto;
pub mod system_dto;

pub use stationboard_dto::*;
pub use system_dto::*;
