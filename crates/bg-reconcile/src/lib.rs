//! bg-reconcile
//!
//! Iterative reconciler for the balance series.
//!
//! Architectural decisions:
//! - One anomaly per iteration: scan, classify, delete, re-scan from the top
//! - Store state is re-read every iteration; nothing is cached across deletes
//! - Bounded by `max_iterations`; hitting the bound is reported, not an error
//! - Dry run drives the identical loop over a dry-run overlay
//! - Live runs are serialized per store instance
//!
//! The only IO is through `SnapshotStore`.

mod engine;
mod locks;
mod types;

pub use engine::{reconcile, reconcile_observed};
pub use locks::RunLocks;
pub use types::*;

pub use tokio_util::sync::CancellationToken;
