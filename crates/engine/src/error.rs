use std::fmt;

use stagewise_core::CatalogError;
use stagewise_storage::StorageError;

use crate::sink::SinkError;

/// Coarse classification of an [`EngineError`].
///
/// Callers decide what to do from the kind alone: re-read and retry on
/// `Conflict`, surface `InvalidTransition` and `NotFound` unchanged, and
/// treat `SinkFailure` as already logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Conflict,
    InvalidTransition,
    NotFound,
    SinkFailure,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Conflict => "conflict",
            ErrorKind::InvalidTransition => "invalid-transition",
            ErrorKind::NotFound => "not-found",
            ErrorKind::SinkFailure => "sink-failure",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The caller's view of the current stage is out of date.
    #[error("entity '{entity_id}' is at stage '{current}', not '{expected}'")]
    StaleStage {
        entity_id: String,
        expected: String,
        current: String,
    },

    #[error("invalid transition for entity '{entity_id}': {message}")]
    InvalidTransition { entity_id: String, message: String },

    #[error("entity '{entity_id}' is already decided ({stage_id})")]
    AlreadyDecided { entity_id: String, stage_id: String },

    #[error("stage '{stage_id}' has no checklist item '{item_id}'")]
    UnknownChecklistItem { stage_id: String, item_id: String },

    #[error("stage '{stage_id}' has no decision option '{label}'")]
    UnknownDecision { stage_id: String, label: String },

    #[error("entity '{entity_id}' has no artifact in slot '{slot}'")]
    MissingArtifact { entity_id: String, slot: String },

    #[error("corrupt stored data for entity '{entity_id}': {message}")]
    Corrupt { entity_id: String, message: String },

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::StaleStage { .. } | EngineError::AlreadyDecided { .. } => {
                ErrorKind::Conflict
            }
            EngineError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            EngineError::UnknownChecklistItem { .. }
            | EngineError::UnknownDecision { .. }
            | EngineError::MissingArtifact { .. } => ErrorKind::NotFound,
            EngineError::Corrupt { .. } => ErrorKind::Internal,
            EngineError::Catalog(_) => ErrorKind::NotFound,
            EngineError::Storage(e) => match e {
                StorageError::ConcurrentConflict { .. } | StorageError::AlreadyExists { .. } => {
                    ErrorKind::Conflict
                }
                StorageError::EntityNotFound { .. } => ErrorKind::NotFound,
                StorageError::Backend(_) => ErrorKind::Internal,
            },
            EngineError::Sink(_) => ErrorKind::SinkFailure,
        }
    }

    pub(crate) fn invalid(entity_id: &str, message: impl Into<String>) -> Self {
        EngineError::InvalidTransition {
            entity_id: entity_id.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagewise_core::WorkflowType;

    #[test]
    fn storage_conflict_is_conflict_kind() {
        let err = EngineError::from(StorageError::ConcurrentConflict {
            entity_id: "lead-1".into(),
            expected_version: 0,
            actual_version: 1,
        });
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn missing_entity_and_unknown_stage_are_not_found() {
        let missing = EngineError::from(StorageError::EntityNotFound {
            entity_id: "x".into(),
        });
        let unknown = EngineError::from(CatalogError::UnknownStage {
            workflow: WorkflowType::SalesLead,
            stage_id: "nope".into(),
        });
        assert_eq!(missing.kind(), ErrorKind::NotFound);
        assert_eq!(unknown.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn already_decided_reads_as_conflict() {
        let err = EngineError::AlreadyDecided {
            entity_id: "deal-1".into(),
            stage_id: "closed-lost".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.to_string().contains("already decided"));
    }

    #[test]
    fn kind_serializes_kebab_case() {
        let json = serde_json::to_string(&ErrorKind::InvalidTransition).unwrap();
        assert_eq!(json, "\"invalid-transition\"");
        assert_eq!(ErrorKind::SinkFailure.to_string(), "sink-failure");
    }
}
