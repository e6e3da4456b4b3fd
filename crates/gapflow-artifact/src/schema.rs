//! Versioned document schemas
//!
//! Every persisted document carries a `schemaVersion` field. Reads check it
//! before decoding so a document written by an incompatible build surfaces as
//! [`StoreError::SchemaMismatch`] instead of a confusing field error.

use crate::error::StoreError;
use serde::de::DeserializeOwned;
use std::path::Path;

/// JSON key holding the schema version
pub const SCHEMA_VERSION_KEY: &str = "schemaVersion";

/// A persisted document with a fixed schema name and version
pub trait Versioned: DeserializeOwned {
    /// Schema name used in error messages
    const SCHEMA: &'static str;
    /// Version this build reads and writes
    const VERSION: u32;
    /// Whether a document without a version field is rejected. Documents
    /// produced by external collaborators may omit it.
    const REQUIRE_VERSION: bool = true;
}

/// Check the version field of `value` and decode it as `T`
///
/// # Errors
/// [`StoreError::SchemaMismatch`] on a wrong or missing version,
/// [`StoreError::InvalidDocument`] when required fields are absent
pub fn decode_versioned<T: Versioned>(path: &Path, value: serde_json::Value) -> Result<T, StoreError> {
    let found = value.get(SCHEMA_VERSION_KEY).map(serde_json::Value::as_u64);
    let accepted = match found {
        Some(Some(v)) => v == u64::from(T::VERSION),
        Some(None) => false,
        None => !T::REQUIRE_VERSION,
    };
    if !accepted {
        return Err(StoreError::SchemaMismatch {
            path: path.to_path_buf(),
            schema: T::SCHEMA,
            expected: T::VERSION,
            found: found.flatten(),
        });
    }
    serde_json::from_value(value).map_err(|e| StoreError::decode(path, e))
}
