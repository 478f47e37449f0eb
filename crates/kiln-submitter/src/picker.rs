//! Slot selection for pooled submissions.

use rand::Rng;

use crate::placement::ClusterPlacement;

/// Chooses which placement a submission targets. The choice is made over
/// the full placement set, not just slots that already have a cluster, so
/// load spreads across the pool as it fills.
pub trait PlacementPicker: Send + Sync {
    /// Pick one placement. Returns `None` only for an empty set.
    fn pick(&self, placements: &[ClusterPlacement]) -> Option<ClusterPlacement>;
}

/// Uniform random slot choice.
#[derive(Debug, Default)]
pub struct RandomPicker;

impl PlacementPicker for RandomPicker {
    fn pick(&self, placements: &[ClusterPlacement]) -> Option<ClusterPlacement> {
        if placements.is_empty() {
            return None;
        }
        let index = rand::rng().random_range(0..placements.len());
        Some(placements[index])
    }
}
