//! Time-bucketed pool placement.
//!
//! A placement is a pool slot plus a generation counter. The generation for
//! slot `i` advances once per `max_age`, phase-shifted by
//! `i * max_age / limit` seconds relative to slot 0, so the slots' rollovers
//! spread evenly across one `max_age` period and at most one slot turns over
//! within any short window. The whole computation is a pure function of
//! wall-clock time: independent processes derive the same token set without
//! communicating, which is what makes lock-free pool admission possible.

use std::sync::Arc;

use kiln_core::PoolConfig;
use kiln_provider::Cluster;

use crate::error::{SubmitterError, SubmitterResult};
use crate::{PLACEMENT_TOKEN_LABEL, UNPLACED_TOKEN};

/// Seconds since the Unix epoch, injectable for tests.
pub type TimeSource = Arc<dyn Fn() -> i64 + Send + Sync>;

/// A pool slot at a point in its rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClusterPlacement {
    pub slot: u32,
    pub generation: i64,
}

impl ClusterPlacement {
    /// The string form used as a cluster label and name component.
    pub fn token(&self) -> String {
        format!("{}-{}", self.slot, self.generation)
    }

    /// Parse a token. Rejects anything that is not exactly
    /// `{slot}-{generation}` with integer components.
    pub fn parse(token: &str) -> SubmitterResult<Self> {
        let parts: Vec<&str> = token.split('-').collect();
        if parts.len() != 2 {
            return Err(SubmitterError::MalformedToken(token.to_string()));
        }
        let slot = parts[0]
            .parse::<u32>()
            .map_err(|_| SubmitterError::MalformedToken(token.to_string()))?;
        let generation = parts[1]
            .parse::<i64>()
            .map_err(|_| SubmitterError::MalformedToken(token.to_string()))?;
        Ok(Self { slot, generation })
    }

    /// Find the cluster labeled with this placement's token, if any.
    pub fn find_in<'a>(&self, clusters: &'a [Cluster]) -> Option<&'a Cluster> {
        let token = self.token();
        clusters
            .iter()
            .find(|cluster| cluster_token(cluster) == token)
    }
}

/// The generation of `slot` at `now_secs`.
///
/// Truncating integer division, matching the provider-label arithmetic used
/// since the scheme was introduced: at `t = 0` every slot is in generation 0.
pub fn compute_generation(slot: u32, limit: u32, now_secs: i64, max_age_secs: i64) -> i64 {
    let offset = i64::from(slot) * (max_age_secs / i64::from(limit));
    (now_secs - offset) / max_age_secs
}

/// One placement per slot for the instant `now_secs`.
pub fn all_placements(now_secs: i64, pool: &PoolConfig) -> Vec<ClusterPlacement> {
    (0..pool.limit)
        .map(|slot| ClusterPlacement {
            slot,
            generation: compute_generation(slot, pool.limit, now_secs, pool.max_age_secs as i64),
        })
        .collect()
}

/// Keep only clusters whose placement-token label matches one of the
/// computed placements. Clusters outside the current window are stale and
/// get collected independently.
pub fn filter_clusters(clusters: Vec<Cluster>, placements: &[ClusterPlacement]) -> Vec<Cluster> {
    let tokens: Vec<String> = placements.iter().map(ClusterPlacement::token).collect();
    clusters
        .into_iter()
        .filter(|cluster| tokens.iter().any(|token| *token == cluster_token(cluster)))
        .collect()
}

fn cluster_token(cluster: &Cluster) -> &str {
    cluster
        .labels
        .get(PLACEMENT_TOKEN_LABEL)
        .map(String::as_str)
        .unwrap_or(UNPLACED_TOKEN)
}
