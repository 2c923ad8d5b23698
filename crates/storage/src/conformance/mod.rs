//! Conformance test suite for `PipelineStorage` implementations.
//!
//! This module provides a backend-agnostic test suite that any
//! `PipelineStorage` implementation can run to verify correctness. The suite
//! covers:
//!
//! - **Entities**: creation, duplicate detection, listing and filtering
//! - **Version validation / OCC**: optimistic concurrency conflict detection
//! - **Completions**: upsert-replaces, ordering, delete-from-order
//! - **Attachments**: checklist items, stage data blobs, artifacts
//! - **Error handling**: correct error variants for invalid operations
//! - **Concurrency**: spawned tasks racing on one entity version
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty storage instance for each test:
//!
//! ```ignore
//! use stagewise_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn postgres_conformance() {
//!     let report = run_conformance_suite(|| async {
//!         create_test_postgres_storage().await
//!     }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod attachments;
mod completion;
mod concurrent;
mod entity;
mod error;
mod version;

use std::fmt;
use std::future::Future;

use stagewise_core::WorkflowType;
use time::macros::datetime;
use time::OffsetDateTime;

use crate::record::{ArtifactRecord, ChecklistRecord, CompletionRecord, EntityRecord};
use crate::PipelineStorage;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "entity", "version", "completion").
    pub category: String,
    /// Test name (e.g. "create_stores_version_0").
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn pass(category: &str, name: &str) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: true,
            message: None,
        }
    }

    fn fail(category: &str, name: &str, msg: String) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: false,
            message: Some(msg),
        }
    }

    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::pass(category, name),
            Err(msg) => Self::fail(category, name, msg),
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a storage backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// storage instance, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: PipelineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(entity::run_entity_tests(&factory).await);
    results.extend(error::run_error_tests(&factory).await);
    results.extend(version::run_version_tests(&factory).await);
    results.extend(completion::run_completion_tests(&factory).await);
    results.extend(attachments::run_attachment_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers: record constructors with sensible defaults ──────────────────────

const T0: OffsetDateTime = datetime!(2026-01-05 09:00 UTC);

fn make_entity(entity_id: &str, workflow: WorkflowType, stage_id: &str) -> EntityRecord {
    EntityRecord {
        entity_id: entity_id.to_string(),
        workflow_type: workflow,
        current_stage_id: stage_id.to_string(),
        version: 0,
        created_at: T0,
        updated_at: T0,
    }
}

fn make_completion(stage_id: &str, order: u32) -> CompletionRecord {
    CompletionRecord {
        stage_id: stage_id.to_string(),
        order,
        completed_at: T0,
        is_skipped: false,
        is_auto_synced: false,
        reason: None,
    }
}

fn make_checklist(stage_id: &str, item_id: &str, checked: bool) -> ChecklistRecord {
    ChecklistRecord {
        stage_id: stage_id.to_string(),
        item_id: item_id.to_string(),
        checked,
        updated_at: T0,
    }
}

fn make_artifact(slot: &str, file_name: &str) -> ArtifactRecord {
    ArtifactRecord {
        slot: slot.to_string(),
        file_name: file_name.to_string(),
        size_bytes: 42,
        sha256: "0".repeat(64),
        uploaded_at: T0,
    }
}

/// Create `entity_id` as a sales lead sitting at `new-lead`.
async fn seed_lead<S: PipelineStorage>(s: &S, entity_id: &str) -> Result<(), String> {
    s.create_entity(make_entity(entity_id, WorkflowType::SalesLead, "new-lead"))
        .await
        .map_err(|e| format!("create {entity_id}: {e}"))
}
