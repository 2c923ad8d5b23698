use crate::model::WorkflowType;

/// Errors raised while building or querying the stage catalog.
///
/// Lookup failures (`UnknownStage`, `UnknownSlot`, ...) are caller mistakes;
/// `Invalid` and `MissingWorkflow` only come out of [`Catalog::new`] and mean
/// the static configuration itself is broken.
///
/// [`Catalog::new`]: crate::Catalog::new
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("unknown workflow type '{name}'")]
    UnknownWorkflow { name: String },

    #[error("stage '{stage_id}' does not exist in workflow {workflow}")]
    UnknownStage {
        workflow: WorkflowType,
        stage_id: String,
    },

    #[error("no stage of workflow {workflow} owns artifact slot '{slot}'")]
    UnknownSlot { workflow: WorkflowType, slot: String },

    #[error("external stage '{name}' has no mapping in workflow {workflow}")]
    UnknownExternalStage { workflow: WorkflowType, name: String },

    #[error("catalog has no stage list for workflow {workflow}")]
    MissingWorkflow { workflow: WorkflowType },

    #[error("invalid stage list for workflow {workflow}: {message}")]
    Invalid {
        workflow: WorkflowType,
        message: String,
    },
}
