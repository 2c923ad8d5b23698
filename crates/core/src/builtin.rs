//! Built-in stage lists for the three workflow types.

use crate::catalog::WorkflowDefinition;
use crate::model::{
    AutomationLevel::{FullyAutomated, ManualIntervention},
    DecisionTarget, StageDefinition, TerminalKind, TimerKind,
    TriggerKind::{Decision, ExternalSync, FileUpload, ManualConfirm, Timed},
    WorkflowType,
};

/// Business days of silence before a follow-up enrollment fires.
pub const FOLLOW_UP_BUSINESS_DAYS: u32 = 3;

pub(crate) fn definitions() -> Vec<WorkflowDefinition> {
    vec![sales_lead(), sales_deal(), offboarding()]
}

fn sales_lead() -> WorkflowDefinition {
    let stages = vec![
        StageDefinition::new("new-lead", "New Lead", ManualIntervention, ManualConfirm),
        StageDefinition::new("intro-call", "Intro Call", ManualIntervention, ManualConfirm)
            .with_automation(TimerKind::FollowUp, FOLLOW_UP_BUSINESS_DAYS),
        StageDefinition::new("discovery", "Discovery", ManualIntervention, ManualConfirm)
            .with_checklist(
                &[
                    ("budget", "Budget confirmed"),
                    ("timeline", "Timeline confirmed"),
                    ("stakeholders", "Stakeholders identified"),
                ],
                false,
            ),
        StageDefinition::new("demo", "Demo", ManualIntervention, FileUpload)
            .with_slot("demo-recording"),
        StageDefinition::new("readiness", "Readiness Assessment", ManualIntervention, FileUpload)
            .with_slot("readiness-assessment"),
        StageDefinition::new("decision", "Decision", ManualIntervention, Decision)
            .with_option("Proceed", DecisionTarget::Next)
            .with_option("Not a Fit", DecisionTarget::Stage("not-a-fit".to_string())),
        StageDefinition::new("proposal", "Proposal", ManualIntervention, FileUpload)
            .with_slot("proposal"),
        StageDefinition::new("proposal-review", "Proposal Review", ManualIntervention, ManualConfirm)
            .with_reminder("proposal-review-reminder", 2, 3),
        StageDefinition::new("contract", "Signed Contract", ManualIntervention, FileUpload)
            .with_slot("signed-contract"),
        StageDefinition::new("crm-handoff", "CRM Handoff", FullyAutomated, ExternalSync),
        StageDefinition::new("onboarding-form", "Onboarding Form", ManualIntervention, ManualConfirm)
            .with_checklist(
                &[
                    ("billing-contact", "Billing contact collected"),
                    ("admin-users", "Admin users listed"),
                    ("data-import", "Data import scheduled"),
                ],
                true,
            ),
        StageDefinition::new("welcome-sequence", "Welcome Sequence", FullyAutomated, Timed)
            .with_automation(TimerKind::AutoAdvance, 1),
        StageDefinition::new("kickoff", "Kickoff", ManualIntervention, ManualConfirm)
            .with_terminal(TerminalKind::Completion),
        StageDefinition::new("not-a-fit", "Not a Fit", ManualIntervention, ManualConfirm)
            .with_terminal(TerminalKind::Rejection),
    ];
    WorkflowDefinition::ordered(
        WorkflowType::SalesLead,
        stages,
        &[
            ("Lead", "new-lead"),
            ("Marketing Qualified Lead", "discovery"),
            ("Sales Qualified Lead", "demo"),
            ("Opportunity", "proposal"),
            ("Customer", "onboarding-form"),
        ],
    )
}

fn sales_deal() -> WorkflowDefinition {
    let stages = vec![
        StageDefinition::new("qualification", "Qualification", ManualIntervention, ManualConfirm),
        StageDefinition::new("needs-analysis", "Needs Analysis", ManualIntervention, ManualConfirm)
            .with_checklist(
                &[
                    ("pain-points", "Pain points documented"),
                    ("decision-maker", "Decision maker identified"),
                ],
                false,
            ),
        StageDefinition::new("quote-prep", "Quote Preparation", ManualIntervention, FileUpload)
            .with_slot("quote"),
        StageDefinition::new("quote-sent", "Quote Sent", ManualIntervention, ManualConfirm)
            .with_automation(TimerKind::FollowUp, FOLLOW_UP_BUSINESS_DAYS),
        StageDefinition::new("negotiation", "Negotiation", ManualIntervention, ManualConfirm)
            .with_reminder("negotiation-check-in", 5, 4),
        StageDefinition::new("closed-won", "Closed Won", ManualIntervention, ManualConfirm)
            .with_terminal(TerminalKind::Won),
        StageDefinition::new("closed-lost", "Closed Lost", ManualIntervention, ManualConfirm)
            .with_terminal(TerminalKind::Lost),
    ];
    WorkflowDefinition::ordered(
        WorkflowType::SalesDeal,
        stages,
        &[
            ("Qualification", "qualification"),
            ("Needs Analysis", "needs-analysis"),
            ("Proposal/Price Quote", "quote-sent"),
            ("Negotiation/Review", "negotiation"),
            ("Closed Won", "closed-won"),
        ],
    )
}

fn offboarding() -> WorkflowDefinition {
    let stages = vec![
        StageDefinition::new("notice-received", "Notice Received", ManualIntervention, ManualConfirm),
        StageDefinition::new("exit-interview", "Exit Interview", ManualIntervention, ManualConfirm)
            .with_automation(TimerKind::FollowUp, FOLLOW_UP_BUSINESS_DAYS),
        StageDefinition::new("data-export", "Data Export", ManualIntervention, FileUpload)
            .with_slot("data-export"),
        StageDefinition::new("access-revoked", "Access Revoked", FullyAutomated, ExternalSync),
        StageDefinition::new("final-invoice", "Final Invoice", ManualIntervention, FileUpload)
            .with_slot("final-invoice")
            .with_reminder("final-invoice-reminder", 5, 3),
        StageDefinition::new("complete", "Complete", ManualIntervention, ManualConfirm)
            .with_terminal(TerminalKind::Completion),
    ];
    WorkflowDefinition::ordered(
        WorkflowType::Offboarding,
        stages,
        &[
            ("Access Revoked", "final-invoice"),
            ("Closed", "complete"),
        ],
    )
}
