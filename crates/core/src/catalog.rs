//! Stage Catalog: the ordered stage list of every workflow type.
//!
//! The catalog is assembled once at process start and is read-only
//! afterwards. All lookups are pure.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::CatalogError;
use crate::model::{DecisionTarget, StageDefinition, TriggerKind, WorkflowType};

/// Raw input for one workflow: its stage list plus the name table used to
/// translate external CRM stage names into local stage ids.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    pub workflow: WorkflowType,
    pub stages: Vec<StageDefinition>,
    /// `(external stage name, local stage id)` pairs.
    pub external_names: Vec<(String, String)>,
}

impl WorkflowDefinition {
    /// Build a definition, assigning `order` from list position.
    pub fn ordered(
        workflow: WorkflowType,
        stages: Vec<StageDefinition>,
        external_names: &[(&str, &str)],
    ) -> Self {
        let stages = stages
            .into_iter()
            .enumerate()
            .map(|(i, mut s)| {
                s.order = i as u32;
                s
            })
            .collect();
        WorkflowDefinition {
            workflow,
            stages,
            external_names: external_names
                .iter()
                .map(|(ext, local)| (ext.to_string(), local.to_string()))
                .collect(),
        }
    }
}

#[derive(Debug)]
struct WorkflowStages {
    stages: Vec<StageDefinition>,
    by_id: HashMap<String, usize>,
    by_slot: HashMap<String, usize>,
    /// Lower-cased external name -> position.
    by_external: HashMap<String, usize>,
}

/// Validated, immutable set of stage lists keyed by workflow type.
#[derive(Debug)]
pub struct Catalog {
    workflows: BTreeMap<WorkflowType, WorkflowStages>,
}

impl Catalog {
    /// Validate and index a set of workflow definitions.
    ///
    /// Every [`WorkflowType`] must be present exactly once.
    pub fn new(definitions: Vec<WorkflowDefinition>) -> Result<Self, CatalogError> {
        let mut workflows = BTreeMap::new();
        for def in definitions {
            let workflow = def.workflow;
            if workflows.contains_key(&workflow) {
                return Err(invalid(workflow, "workflow defined more than once"));
            }
            workflows.insert(workflow, index_workflow(def)?);
        }
        for workflow in WorkflowType::ALL {
            if !workflows.contains_key(&workflow) {
                return Err(CatalogError::MissingWorkflow { workflow });
            }
        }
        Ok(Catalog { workflows })
    }

    /// The stage lists compiled into the binary.
    pub fn builtin() -> Self {
        // A broken built-in list is a programming error; refuse to start.
        Catalog::new(crate::builtin::definitions()).expect("built-in stage catalog is invalid")
    }

    fn workflow(&self, workflow: WorkflowType) -> &WorkflowStages {
        // Presence of every workflow type is checked in `new`.
        &self.workflows[&workflow]
    }

    /// Ordered stage list for a workflow.
    pub fn stages_for(&self, workflow: WorkflowType) -> &[StageDefinition] {
        &self.workflow(workflow).stages
    }

    pub fn total_stages(&self, workflow: WorkflowType) -> usize {
        self.workflow(workflow).stages.len()
    }

    pub fn first_stage(&self, workflow: WorkflowType) -> &StageDefinition {
        // Validation rejects empty stage lists.
        &self.workflow(workflow).stages[0]
    }

    pub fn stage(&self, workflow: WorkflowType, stage_id: &str) -> Result<&StageDefinition, CatalogError> {
        let wf = self.workflow(workflow);
        wf.by_id
            .get(stage_id)
            .map(|&i| &wf.stages[i])
            .ok_or_else(|| CatalogError::UnknownStage {
                workflow,
                stage_id: stage_id.to_string(),
            })
    }

    pub fn stage_at(&self, workflow: WorkflowType, order: u32) -> Option<&StageDefinition> {
        self.workflow(workflow).stages.get(order as usize)
    }

    pub fn index_of(&self, workflow: WorkflowType, stage_id: &str) -> Result<u32, CatalogError> {
        self.stage(workflow, stage_id).map(|s| s.order)
    }

    /// The stage after `stage_id`, or `None` when `stage_id` is terminal.
    pub fn next_stage(
        &self,
        workflow: WorkflowType,
        stage_id: &str,
    ) -> Result<Option<&StageDefinition>, CatalogError> {
        let stage = self.stage(workflow, stage_id)?;
        if stage.is_terminal() {
            return Ok(None);
        }
        Ok(self.stage_at(workflow, stage.order + 1))
    }

    /// Stages strictly between two orders, in catalog order.
    pub fn stages_between(&self, workflow: WorkflowType, after: u32, before: u32) -> &[StageDefinition] {
        let stages = &self.workflow(workflow).stages;
        let start = (after as usize + 1).min(stages.len());
        let end = (before as usize).clamp(start, stages.len());
        &stages[start..end]
    }

    pub fn terminal_stages(&self, workflow: WorkflowType) -> impl Iterator<Item = &StageDefinition> {
        self.workflow(workflow).stages.iter().filter(|s| s.is_terminal())
    }

    /// The stage that requires the artifact uploaded to `slot`.
    pub fn slot_owner(&self, workflow: WorkflowType, slot: &str) -> Result<&StageDefinition, CatalogError> {
        let wf = self.workflow(workflow);
        wf.by_slot
            .get(slot)
            .map(|&i| &wf.stages[i])
            .ok_or_else(|| CatalogError::UnknownSlot {
                workflow,
                slot: slot.to_string(),
            })
    }

    /// Translate an external system's stage name (case-insensitive).
    pub fn external_stage(&self, workflow: WorkflowType, name: &str) -> Result<&StageDefinition, CatalogError> {
        let wf = self.workflow(workflow);
        wf.by_external
            .get(&name.trim().to_lowercase())
            .map(|&i| &wf.stages[i])
            .ok_or_else(|| CatalogError::UnknownExternalStage {
                workflow,
                name: name.to_string(),
            })
    }
}

fn invalid(workflow: WorkflowType, message: impl Into<String>) -> CatalogError {
    CatalogError::Invalid {
        workflow,
        message: message.into(),
    }
}

fn index_workflow(def: WorkflowDefinition) -> Result<WorkflowStages, CatalogError> {
    let workflow = def.workflow;
    if def.stages.is_empty() {
        return Err(invalid(workflow, "stage list is empty"));
    }

    let mut by_id = HashMap::new();
    let mut by_slot = HashMap::new();
    for (pos, stage) in def.stages.iter().enumerate() {
        if stage.order as usize != pos {
            return Err(invalid(
                workflow,
                format!(
                    "stage '{}' has order {} at position {}",
                    stage.id, stage.order, pos
                ),
            ));
        }
        if by_id.insert(stage.id.clone(), pos).is_some() {
            return Err(invalid(workflow, format!("duplicate stage id '{}'", stage.id)));
        }
        if let Some(slot) = &stage.artifact_slot {
            if by_slot.insert(slot.clone(), pos).is_some() {
                return Err(invalid(workflow, format!("artifact slot '{slot}' used twice")));
            }
        }
        let mut items = HashSet::new();
        for item in &stage.checklist {
            if !items.insert(item.id.as_str()) {
                return Err(invalid(
                    workflow,
                    format!("stage '{}' repeats checklist item '{}'", stage.id, item.id),
                ));
            }
        }
        if stage.checklist_gate && stage.checklist.is_empty() {
            return Err(invalid(
                workflow,
                format!("stage '{}' gates on an empty checklist", stage.id),
            ));
        }
        let is_decision = stage.trigger_kind == TriggerKind::Decision;
        if is_decision == stage.decision_options.is_empty() {
            return Err(invalid(
                workflow,
                format!(
                    "stage '{}' must carry decision options if and only if it is a decision stage",
                    stage.id
                ),
            ));
        }
    }

    if !def.stages.iter().any(|s| s.is_terminal()) {
        return Err(invalid(workflow, "no terminal stage"));
    }
    // A terminal stage ends forward movement, so every stage after the first
    // terminal must be an alternative terminal outcome.
    if let Some(first_terminal) = def.stages.iter().position(|s| s.is_terminal()) {
        if let Some(stray) = def.stages[first_terminal..].iter().find(|s| !s.is_terminal()) {
            return Err(invalid(
                workflow,
                format!("stage '{}' is unreachable after a terminal stage", stray.id),
            ));
        }
    }

    for stage in &def.stages {
        for option in &stage.decision_options {
            if let DecisionTarget::Stage(target) = &option.target {
                match by_id.get(target) {
                    Some(&pos) if pos as u32 > stage.order => {}
                    Some(_) => {
                        return Err(invalid(
                            workflow,
                            format!(
                                "decision '{}' of stage '{}' points backwards to '{}'",
                                option.label, stage.id, target
                            ),
                        ))
                    }
                    None => {
                        return Err(invalid(
                            workflow,
                            format!(
                                "decision '{}' of stage '{}' targets unknown stage '{}'",
                                option.label, stage.id, target
                            ),
                        ))
                    }
                }
            }
        }
    }

    let mut by_external = HashMap::new();
    for (external, local) in &def.external_names {
        let pos = *by_id.get(local).ok_or_else(|| {
            invalid(
                workflow,
                format!("external name '{external}' maps to unknown stage '{local}'"),
            )
        })?;
        by_external.insert(external.trim().to_lowercase(), pos);
    }

    Ok(WorkflowStages {
        stages: def.stages,
        by_id,
        by_slot,
        by_external,
    })
}
