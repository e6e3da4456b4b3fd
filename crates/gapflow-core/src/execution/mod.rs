//! Controlled Execution Subsystem

mod command;
mod controller;
mod evidence;

pub use command::{validate_test_path, CommandSpec, TestEngine};
pub use controller::{ExecutionController, ExecutionRequest, PreparedTest};
pub use evidence::{
    read_evidence, summarize, write_evidence, write_rejection, Evidence, EvidenceArtifact, ExecutionMeta, ExecutionResult,
    ExecutionStatus, ExecutionSummary, EXECUTION_META_SCHEMA_VERSION,
};
