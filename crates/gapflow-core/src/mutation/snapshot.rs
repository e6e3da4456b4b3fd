//! Pre-mutation captures of workspace files

use crate::types::{RunId, SnapshotId};
use chrono::{DateTime, Utc};
use gapflow_artifact::{ContentHash, Versioned};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotFile {
    /// Absolute path inside the workspace
    pub file_path: PathBuf,
    /// Empty when the file did not exist
    pub original_content: String,
    pub hash: ContentHash,
    /// Absent in older records, where empty content means "did not exist"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existed: Option<bool>,
}

impl SnapshotFile {
    #[must_use]
    pub fn capture(file_path: PathBuf, original: Option<String>) -> Self {
        let existed = original.is_some();
        let original_content = original.unwrap_or_default();
        Self {
            hash: ContentHash::compute(original_content.as_bytes()),
            file_path,
            original_content,
            existed: Some(existed),
        }
    }

    #[inline]
    #[must_use]
    pub fn existed_before(&self) -> bool {
        self.existed.unwrap_or(!self.original_content.is_empty())
    }

    /// Recorded hash agrees with recorded content
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        ContentHash::compute(self.original_content.as_bytes()) == self.hash
    }
}

/// Content of `runs/<id>/snapshots/<snapshotId>/snapshot.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub schema_version: u32,
    pub snapshot_id: SnapshotId,
    pub run_id: RunId,
    pub preview_id: String,
    pub created_at: DateTime<Utc>,
    pub files: Vec<SnapshotFile>,
}

impl Versioned for Snapshot {
    const SCHEMA: &'static str = "snapshot";
    const VERSION: u32 = SNAPSHOT_SCHEMA_VERSION;
}

impl Snapshot {
    #[must_use]
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days()
    }

    /// Structural problems that make the snapshot unusable for rollback
    #[must_use]
    pub fn integrity_issues(&self, expected_id: SnapshotId, run_id: RunId) -> Vec<String> {
        let mut issues = Vec::new();
        if self.snapshot_id != expected_id {
            issues.push(format!("snapshot id {} does not match {expected_id}", self.snapshot_id));
        }
        if self.run_id != run_id {
            issues.push(format!("snapshot belongs to run {}", self.run_id));
        }
        for file in &self.files {
            if !file.file_path.is_absolute() {
                issues.push(format!("{}: path is not absolute", file.file_path.display()));
            }
            if !file.is_consistent() {
                issues.push(format!("{}: recorded hash does not match recorded content", file.file_path.display()));
            }
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ulid::Ulid;

    #[test]
    fn legacy_empty_content_means_absent() {
        let mut file = SnapshotFile::capture(PathBuf::from("/ws/a.ts"), Some(String::new()));
        assert!(file.existed_before());
        file.existed = None;
        assert!(!file.existed_before());
    }

    #[test]
    fn detects_hash_and_id_mismatch() {
        let id = SnapshotId(Ulid::new());
        let run = RunId::new();
        let mut file = SnapshotFile::capture(PathBuf::from("/ws/a.ts"), Some("old".into()));
        file.original_content = "tampered".into();
        let snapshot = Snapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            snapshot_id: id,
            run_id: run,
            preview_id: "p".into(),
            created_at: Utc::now() - Duration::days(3),
            files: vec![file],
        };
        assert_eq!(snapshot.integrity_issues(id, run).len(), 1);
        assert_eq!(snapshot.integrity_issues(SnapshotId(Ulid::new()), run).len(), 2);
        assert_eq!(snapshot.age_days(Utc::now()), 3);
    }

    #[test]
    fn legacy_record_without_existed_field_decodes() {
        let json = serde_json::json!({
            "filePath": "/ws/a.ts",
            "originalContent": "",
            "hash": ContentHash::compute(b"").to_hex(),
        });
        let file: SnapshotFile = serde_json::from_value(json).unwrap();
        assert_eq!(file.existed, None);
        assert!(!file.existed_before());
    }
}
