//! Raw scan output produced by the external static analyzer

use gapflow_artifact::Versioned;
use serde::{Deserialize, Serialize};

/// Current `scan.json` schema version
pub const SCAN_SCHEMA_VERSION: u32 = 1;

/// A discovered server-side route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanEndpoint {
    pub method: String,
    pub path: String,
    pub file: String,
    pub line: u32,
}

/// A discovered client-side API call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanCall {
    pub method: String,
    /// Requested URL or path, possibly with a query string
    pub endpoint: String,
    pub file: String,
    pub line: u32,
}

/// Content of `scan.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    #[serde(default = "default_scan_version")]
    pub schema_version: u32,
    pub endpoints: Vec<ScanEndpoint>,
    #[serde(default)]
    pub api_calls: Vec<ScanCall>,
}

fn default_scan_version() -> u32 {
    SCAN_SCHEMA_VERSION
}

impl ScanResult {
    #[must_use]
    pub fn new(endpoints: Vec<ScanEndpoint>, api_calls: Vec<ScanCall>) -> Self {
        Self {
            schema_version: SCAN_SCHEMA_VERSION,
            endpoints,
            api_calls,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty() && self.api_calls.is_empty()
    }
}

impl Versioned for ScanResult {
    const SCHEMA: &'static str = "scan";
    const VERSION: u32 = SCAN_SCHEMA_VERSION;
    // Analyzers are external and may not stamp a version.
    const REQUIRE_VERSION: bool = false;
}

#[cfg(test)]
mod tests {
    use super::*;
    use gapflow_artifact::decode_versioned;
    use serde_json::json;
    use std::path::Path;

    #[test]
    fn parses_collaborator_payload_without_version() {
        let raw = json!({
            "endpoints": [{"method": "GET", "path": "/users", "file": "users.ts", "line": 12}],
            "apiCalls": [{"method": "GET", "endpoint": "/users", "file": "Users.tsx", "line": 50}]
        });
        let scan: ScanResult = decode_versioned(Path::new("scan.json"), raw).unwrap();
        assert_eq!(scan.schema_version, SCAN_SCHEMA_VERSION);
        assert_eq!(scan.endpoints.len(), 1);
        assert_eq!(scan.api_calls[0].endpoint, "/users");
    }

    #[test]
    fn missing_endpoints_is_rejected() {
        let raw = json!({"apiCalls": []});
        let err = decode_versioned::<ScanResult>(Path::new("scan.json"), raw).unwrap_err();
        assert_eq!(err.code(), "IO_INVALID_DOCUMENT");
    }
}
