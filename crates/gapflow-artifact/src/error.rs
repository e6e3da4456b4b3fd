//! Storage error taxonomy
//!
//! Every variant carries the offending path so callers can log and replay
//! the failure without re-deriving state.

use std::io;
use std::path::{Path, PathBuf};

/// Errors raised by the artifact store and the scoped filesystem primitive
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Resolved path escapes the scoped root
    #[error("path {path} escapes root {root}")]
    PathTraversal { path: PathBuf, root: PathBuf },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("not found: {path}")]
    NotFound { path: PathBuf },

    #[error("permission denied: {path}")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// File content is not syntactically valid JSON
    #[error("invalid JSON in {path}: {source}")]
    InvalidJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// JSON parsed but required fields are missing or mistyped
    #[error("invalid document {path}: {reason}")]
    InvalidDocument { path: PathBuf, reason: String },

    #[error("{path} is {size} bytes, exceeding the {limit} byte read limit")]
    TooLarge { path: PathBuf, size: u64, limit: u64 },

    /// Persisted document was written under a different schema version
    #[error("schema mismatch in {path}: expected {schema} v{expected}, found {}", .found.map_or_else(|| "none".to_string(), |v| format!("v{v}")))]
    SchemaMismatch {
        path: PathBuf,
        schema: &'static str,
        expected: u32,
        found: Option<u64>,
    },

    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    /// Classify an I/O error raised while writing `path`
    #[must_use]
    pub fn write(path: &Path, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                path: path.to_path_buf(),
                source,
            },
            _ => Self::Write {
                path: path.to_path_buf(),
                source,
            },
        }
    }

    /// Classify an I/O error raised while reading `path`
    #[must_use]
    pub fn read(path: &Path, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => Self::NotFound {
                path: path.to_path_buf(),
            },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                path: path.to_path_buf(),
                source,
            },
            _ => Self::Read {
                path: path.to_path_buf(),
                source,
            },
        }
    }

    /// Classify a JSON decode failure: syntax problems are `InvalidJson`,
    /// shape problems are `InvalidDocument`.
    #[must_use]
    pub fn decode(path: &Path, source: serde_json::Error) -> Self {
        use serde_json::error::Category;
        match source.classify() {
            Category::Data => Self::InvalidDocument {
                path: path.to_path_buf(),
                reason: source.to_string(),
            },
            Category::Io => Self::Read {
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::Other, source.to_string()),
            },
            Category::Syntax | Category::Eof => Self::InvalidJson {
                path: path.to_path_buf(),
                source,
            },
        }
    }

    /// Stable machine-readable code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::PathTraversal { .. } => "IO_PATH_TRAVERSAL",
            Self::Write { .. } | Self::Encode { .. } => "IO_WRITE_FAILED",
            Self::Read { .. } | Self::TooLarge { .. } => "IO_READ_FAILED",
            Self::NotFound { .. } => "IO_NOT_FOUND",
            Self::PermissionDenied { .. } => "IO_PERMISSION_DENIED",
            Self::InvalidJson { .. } => "IO_INVALID_JSON",
            Self::InvalidDocument { .. } => "IO_INVALID_DOCUMENT",
            Self::SchemaMismatch { .. } => "IO_SCHEMA_MISMATCH",
        }
    }

    /// Path the error refers to
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::PathTraversal { path, .. }
            | Self::Write { path, .. }
            | Self::Read { path, .. }
            | Self::NotFound { path }
            | Self::PermissionDenied { path, .. }
            | Self::InvalidJson { path, .. }
            | Self::InvalidDocument { path, .. }
            | Self::TooLarge { path, .. }
            | Self::SchemaMismatch { path, .. }
            | Self::Encode { path, .. } => path,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_classifies_not_found() {
        let err = StoreError::read(
            Path::new("a.json"),
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.is_not_found());
        assert_eq!(err.code(), "IO_NOT_FOUND");
    }

    #[test]
    fn write_classifies_permission_denied() {
        let err = StoreError::write(
            Path::new("a.json"),
            io::Error::new(io::ErrorKind::PermissionDenied, "ro"),
        );
        assert_eq!(err.code(), "IO_PERMISSION_DENIED");
        assert_eq!(err.path(), Path::new("a.json"));
    }

    #[test]
    fn decode_separates_syntax_from_shape() {
        let syntax = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        assert_eq!(
            StoreError::decode(Path::new("x"), syntax).code(),
            "IO_INVALID_JSON"
        );

        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct Needs {
            field: u32,
        }
        let shape = serde_json::from_str::<Needs>("{}").unwrap_err();
        assert_eq!(
            StoreError::decode(Path::new("x"), shape).code(),
            "IO_INVALID_DOCUMENT"
        );
    }

    #[test]
    fn schema_mismatch_message_names_versions() {
        let err = StoreError::SchemaMismatch {
            path: PathBuf::from("graph.json"),
            schema: "graph",
            expected: 1,
            found: Some(7),
        };
        assert!(err.to_string().contains("expected graph v1, found v7"));
    }
}
