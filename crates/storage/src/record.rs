use serde::{Deserialize, Serialize};
use stagewise_core::WorkflowType;
use time::OffsetDateTime;

/// Stored state of one tracked lead, deal or offboarding customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub entity_id: String,
    pub workflow_type: WorkflowType,
    pub current_stage_id: String,
    /// Bumped by every successful `update_entity`; starts at 0.
    pub version: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Completion of one stage. At most one per (entity, stage).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub stage_id: String,
    /// Catalog order of `stage_id`, stored so backends can delete by rank.
    pub order: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
    pub is_skipped: bool,
    /// Completion came from an external CRM sync rather than a local action.
    pub is_auto_synced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Checked state of one checklist item of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistRecord {
    pub stage_id: String,
    pub item_id: String,
    pub checked: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Metadata of an artifact uploaded into a stage's slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub slot: String,
    pub file_name: String,
    pub size_bytes: u64,
    /// Lower-case hex SHA-256 of the uploaded bytes.
    pub sha256: String,
    #[serde(with = "time::serde::rfc3339")]
    pub uploaded_at: OffsetDateTime,
}
