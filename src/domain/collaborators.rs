//! Traits for the collaborators the stationboard route depends on.
//!
//! The stop resolver and the stationboard builder are DB-bound and live in
//! [`crate::persistence`]; the service only sees these traits, which keeps
//! the route testable with in-memory fakes.

use std::fmt;

use async_trait::async_trait;

use super::stationboard::{BoardPayload, BuildRequest};
use super::stop_identity::ResolvedStopIdentity;

/// Maps a client-supplied stop id to its canonical identity.
#[async_trait]
pub trait StopResolver: Send + Sync + fmt::Debug {
    /// Resolves `input`.
    ///
    /// # Errors
    ///
    /// [`ResolveError::UnknownStop`] when the id is not in the static store.
    async fn resolve(&self, input: &str) -> Result<ResolvedStopIdentity, ResolveError>;
}

/// Builds the merged board for one request. May be slow.
///
/// The route handler races this call against a timer and abandons it on
/// timeout without cancelling it, so implementations must release their own
/// resources (transactions, connections) whether or not anyone awaits them.
#[async_trait]
pub trait StationboardBuilder: Send + Sync + fmt::Debug {
    /// Builds the board.
    ///
    /// # Errors
    ///
    /// [`BuildError::StopNotFound`] when the stop is unknown to the static
    /// store, [`BuildError::Internal`] for anything unexpected.
    async fn build(&self, request: BuildRequest) -> Result<BoardPayload, BuildError>;
}

/// Stop resolution failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolveError {
    /// Id not present in the static store.
    #[error("unknown stop: {0}")]
    UnknownStop(String),

    /// Lookup could not be performed.
    #[error("stop lookup failed: {0}")]
    Lookup(String),
}

/// Stationboard build failure. `Clone` so de-duplicated waiters can share it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BuildError {
    /// Stop could not be located in the static store.
    #[error("stop not found: {stop_id}")]
    StopNotFound {
        /// Requested stop.
        stop_id: String,
        /// Identifiers that were looked up.
        tried: Vec<String>,
        /// Structured diagnostics, exposed with `debug=1`.
        details: serde_json::Value,
    },

    /// Stop id rejected before lookup.
    #[error("unknown stop: {stop_id}")]
    UnknownStop {
        /// Requested stop.
        stop_id: String,
        /// Identifiers that were looked up.
        tried: Vec<String>,
    },

    /// Anything else.
    #[error("stationboard build failed: {0}")]
    Internal(String),
}
