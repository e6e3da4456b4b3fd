//! Generated file previews awaiting apply

use crate::error::PipelineError;
use crate::types::{is_safe_token, RunId};
use chrono::{DateTime, Utc};
use gapflow_artifact::{ArtifactStore, Versioned};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const PREVIEW_SCHEMA_VERSION: u32 = 1;

/// Content of `runs/<id>/previews/<previewId>/preview.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preview {
    pub schema_version: u32,
    pub preview_id: String,
    pub run_id: RunId,
    pub created_at: DateTime<Utc>,
    /// Workspace-relative target path to new content
    pub files: BTreeMap<String, String>,
}

impl Versioned for Preview {
    const SCHEMA: &'static str = "preview";
    const VERSION: u32 = PREVIEW_SCHEMA_VERSION;
}

impl Preview {
    #[must_use]
    pub fn new(run_id: RunId, preview_id: impl Into<String>) -> Self {
        Self {
            schema_version: PREVIEW_SCHEMA_VERSION,
            preview_id: preview_id.into(),
            run_id,
            created_at: Utc::now(),
            files: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_file(mut self, target: impl Into<String>, content: impl Into<String>) -> Self {
        self.files.insert(target.into(), content.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Persist under the owning run
    ///
    /// # Errors
    /// Unsafe preview id or write failure
    pub fn save(&self, store: &ArtifactStore) -> Result<(), PipelineError> {
        check_id(self.run_id, &self.preview_id)?;
        let layout = store.layout(&self.run_id.to_string());
        store.write_json(layout.preview(&self.preview_id), self)?;
        tracing::debug!(run_id = %self.run_id, preview_id = %self.preview_id, files = self.files.len(), "preview saved");
        Ok(())
    }

    /// # Errors
    /// [`PipelineError::PreviewMissing`] if absent, store errors otherwise
    pub fn load(store: &ArtifactStore, run_id: RunId, preview_id: &str) -> Result<Self, PipelineError> {
        check_id(run_id, preview_id)?;
        let layout = store.layout(&run_id.to_string());
        match store.read_versioned::<Self>(layout.preview(preview_id)) {
            Ok(preview) => Ok(preview),
            Err(e) if e.is_not_found() => Err(PipelineError::PreviewMissing {
                run_id,
                preview_id: preview_id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}

fn check_id(run_id: RunId, preview_id: &str) -> Result<(), PipelineError> {
    if is_safe_token(preview_id) {
        Ok(())
    } else {
        Err(PipelineError::PreviewMissing {
            run_id,
            preview_id: preview_id.to_string(),
        })
    }
}
