//! kiln-submitter — submission coordination and pool placement.
//!
//! This crate decides whether to reuse an in-flight job, whether to reuse a
//! pooled cluster, which pool slot to target, how to create a cluster
//! exactly once under racing creators, and when it is safe to delete one.
//! The only synchronization primitive is the provider's create/list/delete
//! API: placement is a pure function of wall-clock time, so independent
//! processes converge on the same candidate set without communicating, and
//! create-by-name resolves the rest.
//!
//! # Architecture
//!
//! ```text
//! Dispatcher
//!   ├── validation (kiln-core) — fail fast, before any remote call
//!   ├── deduplicator — reuse a prior job by dedup label
//!   └── ClusterLease
//!       ├── EphemeralSubmitter — single-use cluster, heartbeat,
//!       │     history-drain wait, guaranteed release
//!       └── PooledSubmitter — time-bucketed slot placement,
//!             find-or-create, already-exists recovery
//! ```

pub mod dedup;
pub mod dispatcher;
pub mod error;
pub mod heartbeat;
pub mod history;
pub mod lifecycle;
pub mod picker;
pub mod placement;
pub mod pool;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatcher::Dispatcher;
pub use error::{SubmitterError, SubmitterResult};
pub use lifecycle::{ClusterLease, ClusterTarget, EphemeralSubmitter};
pub use picker::{PlacementPicker, RandomPicker};
pub use placement::ClusterPlacement;
pub use pool::PooledSubmitter;

/// Label marking a cluster as kiln-managed (pool membership).
pub const CLUSTER_LABEL: &str = "kiln-cluster";
/// Label carrying the owning client's id on pooled clusters.
pub const POOL_CLIENT_ID_LABEL: &str = "kiln-pool-client-id";
/// Label carrying the placement token on pooled clusters.
pub const PLACEMENT_TOKEN_LABEL: &str = "kiln-placement-token";
/// Token attributed to clusters missing a placement label.
pub const UNPLACED_TOKEN: &str = "unplaced";
