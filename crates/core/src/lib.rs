//! stagewise-core: data model and Stage Catalog of the pipeline engine.
//!
//! Holds the immutable stage definitions for every workflow type and the
//! lookups the transition engine validates against:
//!
//! - [`Catalog::stages_for`] -- ordered stage list of a workflow
//! - [`Catalog::index_of`] -- rank of a stage inside its workflow
//! - [`Catalog::next_stage`] -- successor, `None` at a terminal stage
//! - [`Catalog::slot_owner`] / [`Catalog::external_stage`] -- lookups used by
//!   the upload and CRM sync triggers
//!
//! The catalog is built once at process start ([`Catalog::builtin`]) and is
//! never mutated afterwards.

pub mod builtin;
pub mod catalog;
pub mod error;
pub mod model;

pub use catalog::{Catalog, WorkflowDefinition};
pub use error::CatalogError;
pub use model::{
    AutomationLevel, AutomationRule, ChecklistItem, DecisionOption, DecisionTarget,
    StageDefinition, TerminalKind, TimerKind, TriggerKind, WorkflowType,
};
