//! gapflow Artifact Store
//!
//! Durable, path-scoped persistence for run artifacts using only the local
//! filesystem.
//!
//! # Core Concepts
//!
//! - [`ScopedDir`]: atomic write / bounded read primitive confined to a root
//! - [`ArtifactStore`]: run layout, crash-lock files, `latest.json`
//! - [`ContentHash`]: SHA-256 digest used for integrity checks
//! - [`stable_id`]: short content-addressed identifiers
//! - [`Versioned`]: schema-version validation at the read boundary
//!
//! # Example
//!
//! ```rust,ignore
//! use gapflow_artifact::{ArtifactStore, StoreConfig};
//!
//! let store = ArtifactStore::open(".gapflow", &StoreConfig::default());
//! let layout = store.provision_run("01J0...")?;
//! store.write_json(layout.graph(), &graph)?;
//! store.create_lock("01J0...")?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod error;
mod hash;
pub mod layout;
mod schema;
mod scoped;
mod store;

pub use error::StoreError;
pub use hash::{stable_id, ContentHash, HashError, STABLE_ID_LEN};
pub use layout::RunLayout;
pub use schema::{decode_versioned, Versioned, SCHEMA_VERSION_KEY};
pub use scoped::{ScopedDir, DEFAULT_MAX_READ_BYTES};
pub use store::{ArtifactStore, LatestPointer, RunLock, StoreConfig};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
