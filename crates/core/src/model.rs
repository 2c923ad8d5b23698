//! Stage definition types shared by the catalog, storage and engine.
//!
//! Everything here is immutable configuration: a [`StageDefinition`] is
//! created once when the catalog is built and never changes afterwards.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CatalogError;

// ──────────────────────────────────────────────
// Workflow types
// ──────────────────────────────────────────────

/// The fixed set of pipelines a tracked entity can move through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowType {
    /// Sales lead onboarding, from first contact to kickoff.
    SalesLead,
    /// Sales deal pipeline, ending in won or lost.
    SalesDeal,
    /// Customer offboarding.
    Offboarding,
}

impl WorkflowType {
    pub const ALL: [WorkflowType; 3] = [
        WorkflowType::SalesLead,
        WorkflowType::SalesDeal,
        WorkflowType::Offboarding,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowType::SalesLead => "sales-lead",
            WorkflowType::SalesDeal => "sales-deal",
            WorkflowType::Offboarding => "offboarding",
        }
    }
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowType {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkflowType::ALL
            .into_iter()
            .find(|w| w.as_str() == s)
            .ok_or_else(|| CatalogError::UnknownWorkflow {
                name: s.to_string(),
            })
    }
}

// ──────────────────────────────────────────────
// Stage attributes
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AutomationLevel {
    FullyAutomated,
    ManualIntervention,
}

/// What kind of external event normally completes a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerKind {
    FileUpload,
    ManualConfirm,
    Decision,
    ExternalSync,
    Timed,
}

/// How a terminal stage ends the workflow.
///
/// `Won` and `Lost` are deal outcomes and can only be completed through the
/// deal outcome operations. `Completion` and `Rejection` are closed with a
/// plain terminal confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminalKind {
    Completion,
    Rejection,
    Won,
    Lost,
}

impl TerminalKind {
    pub fn is_deal_outcome(&self) -> bool {
        matches!(self, TerminalKind::Won | TerminalKind::Lost)
    }
}

/// Where a decision option leads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "stage", rename_all = "kebab-case")]
pub enum DecisionTarget {
    /// The next stage in catalog order.
    Next,
    /// A non-linear jump; every stage in between is skipped.
    Stage(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionOption {
    pub label: String,
    pub target: DecisionTarget,
}

/// Timer flavours the automation scheduler knows how to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimerKind {
    /// Enroll the entity in a follow-up sequence. One-shot.
    FollowUp,
    /// Send a reminder notification. Re-armed after every firing.
    Reminder,
    /// Advance the entity out of the stage. One-shot.
    AutoAdvance,
}

impl TimerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerKind::FollowUp => "follow-up",
            TimerKind::Reminder => "reminder",
            TimerKind::AutoAdvance => "auto-advance",
        }
    }

    pub fn is_recurring(&self) -> bool {
        matches!(self, TimerKind::Reminder)
    }
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A timed side effect armed when an entity enters the owning stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationRule {
    pub kind: TimerKind,
    pub delay_business_days: u32,
    /// Notification template used by reminders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Upper bound on reminder firings. `None` keeps reminding until the
    /// entity leaves the stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fires: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub id: String,
    pub label: String,
}

// ──────────────────────────────────────────────
// StageDefinition
// ──────────────────────────────────────────────

/// One named stage of a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDefinition {
    pub id: String,
    /// Rank within the workflow; contiguous from 0.
    pub order: u32,
    pub title: String,
    pub automation_level: AutomationLevel,
    pub trigger_kind: TriggerKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decision_options: Vec<DecisionOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal: Option<TerminalKind>,
    /// Artifact slot whose upload completes this stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_slot: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checklist: Vec<ChecklistItem>,
    /// When set, a local advance requires every checklist item checked.
    #[serde(default)]
    pub checklist_gate: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub automations: Vec<AutomationRule>,
}

impl StageDefinition {
    /// Start a definition with no slot, checklist, decision or automation.
    /// `order` is assigned when the stage list is assembled.
    pub fn new(
        id: &str,
        title: &str,
        automation_level: AutomationLevel,
        trigger_kind: TriggerKind,
    ) -> Self {
        StageDefinition {
            id: id.to_string(),
            order: 0,
            title: title.to_string(),
            automation_level,
            trigger_kind,
            decision_options: Vec::new(),
            terminal: None,
            artifact_slot: None,
            checklist: Vec::new(),
            checklist_gate: false,
            automations: Vec::new(),
        }
    }

    pub fn with_slot(mut self, slot: &str) -> Self {
        self.artifact_slot = Some(slot.to_string());
        self
    }

    pub fn with_terminal(mut self, kind: TerminalKind) -> Self {
        self.terminal = Some(kind);
        self
    }

    pub fn with_option(mut self, label: &str, target: DecisionTarget) -> Self {
        self.decision_options.push(DecisionOption {
            label: label.to_string(),
            target,
        });
        self
    }

    pub fn with_checklist(mut self, items: &[(&str, &str)], gate: bool) -> Self {
        self.checklist = items
            .iter()
            .map(|(id, label)| ChecklistItem {
                id: id.to_string(),
                label: label.to_string(),
            })
            .collect();
        self.checklist_gate = gate;
        self
    }

    pub fn with_automation(mut self, kind: TimerKind, delay_business_days: u32) -> Self {
        self.automations.push(AutomationRule {
            kind,
            delay_business_days,
            template: None,
            max_fires: None,
        });
        self
    }

    pub fn with_reminder(mut self, template: &str, every_business_days: u32, max_fires: u32) -> Self {
        self.automations.push(AutomationRule {
            kind: TimerKind::Reminder,
            delay_business_days: every_business_days,
            template: Some(template.to_string()),
            max_fires: Some(max_fires),
        });
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal.is_some()
    }

    pub fn decision_option(&self, label: &str) -> Option<&DecisionOption> {
        self.decision_options.iter().find(|o| o.label == label)
    }

    pub fn has_checklist_item(&self, item_id: &str) -> bool {
        self.checklist.iter().any(|i| i.id == item_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_type_round_trips_through_str() {
        for wf in WorkflowType::ALL {
            assert_eq!(wf.as_str().parse::<WorkflowType>().unwrap(), wf);
        }
        assert!(matches!(
            "pipeline".parse::<WorkflowType>(),
            Err(CatalogError::UnknownWorkflow { .. })
        ));
    }

    #[test]
    fn workflow_type_serializes_kebab_case() {
        let json = serde_json::to_string(&WorkflowType::SalesDeal).unwrap();
        assert_eq!(json, "\"sales-deal\"");
    }

    #[test]
    fn decision_target_wire_shape() {
        let next = serde_json::to_value(DecisionTarget::Next).unwrap();
        assert_eq!(next, serde_json::json!({"kind": "next"}));
        let jump = serde_json::to_value(DecisionTarget::Stage("not-a-fit".into())).unwrap();
        assert_eq!(
            jump,
            serde_json::json!({"kind": "stage", "stage": "not-a-fit"})
        );
    }

    #[test]
    fn only_won_and_lost_are_deal_outcomes() {
        assert!(TerminalKind::Won.is_deal_outcome());
        assert!(TerminalKind::Lost.is_deal_outcome());
        assert!(!TerminalKind::Completion.is_deal_outcome());
        assert!(!TerminalKind::Rejection.is_deal_outcome());
    }
}
