//! Progress Projector: read-only display metrics.

use serde::Serialize;
use stagewise_core::{Catalog, WorkflowType};
use stagewise_storage::{CompletionRecord, EntityRecord};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub workflow: WorkflowType,
    pub current_stage: String,
    /// Completion records, skipped ones included.
    pub completed: usize,
    pub skipped: usize,
    pub remaining: usize,
    pub total: usize,
    pub percent: u8,
    pub is_terminal_reached: bool,
}

/// Derive progress from an entity and its completion records.
///
/// Records for stages the catalog does not know are ignored.
pub fn project(catalog: &Catalog, entity: &EntityRecord, completions: &[CompletionRecord]) -> Progress {
    let workflow = entity.workflow_type;
    let total = catalog.total_stages(workflow);
    let known: Vec<&CompletionRecord> = completions
        .iter()
        .filter(|c| catalog.stage(workflow, &c.stage_id).is_ok())
        .collect();
    let completed = known.len().min(total);
    let skipped = known.iter().filter(|c| c.is_skipped).count();
    let percent = if total == 0 {
        0
    } else {
        (completed as f64 * 100.0 / total as f64).round() as u8
    };
    let is_terminal_reached = catalog
        .stage(workflow, &entity.current_stage_id)
        .map(|s| s.is_terminal())
        .unwrap_or(false);

    Progress {
        workflow,
        current_stage: entity.current_stage_id.clone(),
        completed,
        skipped,
        remaining: total - completed,
        total,
        percent,
        is_terminal_reached,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn entity(workflow: WorkflowType, stage: &str) -> EntityRecord {
        EntityRecord {
            entity_id: "e-1".into(),
            workflow_type: workflow,
            current_stage_id: stage.into(),
            version: 0,
            created_at: datetime!(2026-03-02 09:00 UTC),
            updated_at: datetime!(2026-03-02 09:00 UTC),
        }
    }

    fn done(catalog: &Catalog, workflow: WorkflowType, n: usize, skipped: &[usize]) -> Vec<CompletionRecord> {
        catalog.stages_for(workflow)[..n]
            .iter()
            .map(|s| CompletionRecord {
                stage_id: s.id.clone(),
                order: s.order,
                completed_at: datetime!(2026-03-02 09:00 UTC),
                is_skipped: skipped.contains(&(s.order as usize)),
                is_auto_synced: false,
                reason: None,
            })
            .collect()
    }

    #[test]
    fn seven_of_fourteen_is_fifty_percent() {
        let catalog = Catalog::builtin();
        let lead = entity(WorkflowType::SalesLead, "proposal-review");
        let p = project(&catalog, &lead, &done(&catalog, WorkflowType::SalesLead, 7, &[]));
        assert_eq!(p.total, 14);
        assert_eq!(p.completed, 7);
        assert_eq!(p.remaining, 7);
        assert_eq!(p.percent, 50);
        assert!(!p.is_terminal_reached);
    }

    #[test]
    fn skipped_stages_count_as_completed() {
        let catalog = Catalog::builtin();
        let deal = entity(WorkflowType::SalesDeal, "negotiation");
        let p = project(&catalog, &deal, &done(&catalog, WorkflowType::SalesDeal, 4, &[1, 2]));
        assert_eq!(p.completed, 4);
        assert_eq!(p.skipped, 2);
        // 4 / 7 = 57.14
        assert_eq!(p.percent, 57);
    }

    #[test]
    fn rounds_to_nearest() {
        let catalog = Catalog::builtin();
        let cust = entity(WorkflowType::Offboarding, "data-export");
        // 1 / 6 = 16.67
        let p = project(&catalog, &cust, &done(&catalog, WorkflowType::Offboarding, 1, &[]));
        assert_eq!(p.percent, 17);
    }

    #[test]
    fn unknown_stage_records_are_ignored() {
        let catalog = Catalog::builtin();
        let cust = entity(WorkflowType::Offboarding, "complete");
        let mut completions = done(&catalog, WorkflowType::Offboarding, 2, &[]);
        completions.push(CompletionRecord {
            stage_id: "legacy-stage".into(),
            order: 99,
            completed_at: datetime!(2026-03-02 09:00 UTC),
            is_skipped: false,
            is_auto_synced: false,
            reason: None,
        });
        let p = project(&catalog, &cust, &completions);
        assert_eq!(p.completed, 2);
        assert!(p.is_terminal_reached);
    }
}
