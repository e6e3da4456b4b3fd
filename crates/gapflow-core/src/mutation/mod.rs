//! Safe Mutation Engine: previews, snapshots, apply and rollback

mod engine;
mod preview;
mod snapshot;

pub use engine::{ApplyOutcome, MutationEngine, RollbackOutcome};
pub use preview::{Preview, PREVIEW_SCHEMA_VERSION};
pub use snapshot::{Snapshot, SnapshotFile, SNAPSHOT_SCHEMA_VERSION};
