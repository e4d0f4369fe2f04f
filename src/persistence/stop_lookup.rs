//! Stop identity lookup against the static `stops` table.
//!
//! Clients send platform ids (`8501120:0:3`), station ids (`8501120`) or
//! parent ids (`Parent8501120`). [`candidate_ids`] expands an input into the
//! ids worth looking up, in order; the first hit wins and its
//! `parent_station` (or itself) is the canonical root.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::collaborators::{ResolveError, StopResolver};
use crate::domain::stop_identity::ResolvedStopIdentity;

const PARENT_PREFIX: &str = "Parent";

/// Ids to try for `input`, most specific first, without duplicates.
#[must_use]
pub fn candidate_ids(input: &str) -> Vec<String> {
    let input = input.trim();
    let mut out: Vec<String> = Vec::with_capacity(3);
    let mut push = |id: String| {
        if !id.is_empty() && !out.contains(&id) {
            out.push(id);
        }
    };

    push(input.to_string());
    let base = input
        .strip_prefix(PARENT_PREFIX)
        .unwrap_or(input)
        .split(':')
        .next()
        .unwrap_or_default();
    push(base.to_string());
    if !base.is_empty() {
        push(format!("{PARENT_PREFIX}{base}"));
    }
    out
}

/// Resolves stop ids with one indexed lookup per candidate.
#[derive(Debug, Clone)]
pub struct PgStopResolver {
    pool: PgPool,
}

impl PgStopResolver {
    /// Creates a new resolver over the given connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Looks up one exact stop id.
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub async fn find(&self, stop_id: &str) -> Result<Option<ResolvedStopIdentity>, sqlx::Error> {
        let row = sqlx::query_as::<_, (String, Option<String>)>(
            "SELECT stop_id, parent_station FROM stops WHERE stop_id = $1",
        )
        .bind(stop_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(stop_id, parent)| {
            let root = parent
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| stop_id.clone());
            ResolvedStopIdentity {
                resolved_stop_id: stop_id,
                resolved_root_id: root,
            }
        }))
    }
}

#[async_trait]
impl StopResolver for PgStopResolver {
    async fn resolve(&self, input: &str) -> Result<ResolvedStopIdentity, ResolveError> {
        for candidate in candidate_ids(input) {
            if let Some(identity) = self
                .find(&candidate)
                .await
                .map_err(|e| ResolveError::Lookup(e.to_string()))?
            {
                return Ok(identity);
            }
        }
        Err(ResolveError::UnknownStop(input.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_id_expands_to_station_and_parent() {
        assert_eq!(
            candidate_ids("8501120:0:3"),
            vec!["8501120:0:3", "8501120", "Parent8501120"]
        );
    }

    #[test]
    fn parent_id_is_not_duplicated() {
        assert_eq!(
            candidate_ids("Parent8501120"),
            vec!["Parent8501120", "8501120"]
        );
    }

    #[test]
    fn blank_input_has_no_candidates() {
        assert!(candidate_ids("  ").is_empty());
    }
}
