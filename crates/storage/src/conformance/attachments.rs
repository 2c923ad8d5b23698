//! Checklist items, stage data blobs and artifact slots.

use std::future::Future;

use serde_json::json;

use super::{make_artifact, make_checklist, seed_lead, TestResult};
use crate::PipelineStorage;

pub(super) async fn run_attachment_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: PipelineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    // Checklists
    results.push(TestResult::from_result(
        "attachments",
        "checklist_item_set_and_replaced",
        checklist_item_set_and_replaced(factory).await,
    ));
    results.push(TestResult::from_result(
        "attachments",
        "checklist_listed_by_stage_then_item",
        checklist_listed_by_stage_then_item(factory).await,
    ));

    // Stage data
    results.push(TestResult::from_result(
        "attachments",
        "stage_data_put_get_delete",
        stage_data_put_get_delete(factory).await,
    ));

    // Artifacts
    results.push(TestResult::from_result(
        "attachments",
        "artifact_slot_replaced_on_put",
        artifact_slot_replaced_on_put(factory).await,
    ));
    results.push(TestResult::from_result(
        "attachments",
        "artifact_delete_returns_removed_record",
        artifact_delete_returns_removed_record(factory).await,
    ));

    results
}

// ── Checklists ───────────────────────────────────────────────────────────────

async fn checklist_item_set_and_replaced<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: PipelineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_lead(&s, "lead-1").await?;
    s.set_checklist_item("lead-1", make_checklist("discovery", "budget", true))
        .await
        .map_err(|e| format!("set: {e}"))?;
    s.set_checklist_item("lead-1", make_checklist("discovery", "budget", false))
        .await
        .map_err(|e| format!("reset: {e}"))?;
    let items = s
        .list_checklist("lead-1")
        .await
        .map_err(|e| format!("list: {e}"))?;
    if items.len() != 1 || items[0].checked {
        return Err(format!("expected single unchecked item, got {items:?}"));
    }
    Ok(())
}

async fn checklist_listed_by_stage_then_item<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: PipelineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_lead(&s, "lead-1").await?;
    for (stage, item) in [
        ("onboarding-form", "admin-users"),
        ("discovery", "timeline"),
        ("discovery", "budget"),
    ] {
        s.set_checklist_item("lead-1", make_checklist(stage, item, true))
            .await
            .map_err(|e| format!("set {stage}/{item}: {e}"))?;
    }
    let keys: Vec<(String, String)> = s
        .list_checklist("lead-1")
        .await
        .map_err(|e| format!("list: {e}"))?
        .into_iter()
        .map(|c| (c.stage_id, c.item_id))
        .collect();
    let expected = [
        ("discovery", "budget"),
        ("discovery", "timeline"),
        ("onboarding-form", "admin-users"),
    ];
    let matches = keys.len() == expected.len()
        && keys
            .iter()
            .zip(expected.iter())
            .all(|((s, i), (es, ei))| s == es && i == ei);
    if !matches {
        return Err(format!("unexpected order: {keys:?}"));
    }
    Ok(())
}

// ── Stage data ───────────────────────────────────────────────────────────────

async fn stage_data_put_get_delete<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: PipelineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_lead(&s, "lead-1").await?;

    let missing = s
        .get_stage_data("lead-1", "decision")
        .await
        .map_err(|e| format!("get empty: {e}"))?;
    if missing.is_some() {
        return Err(format!("expected no data, got {missing:?}"));
    }

    s.put_stage_data("lead-1", "decision", json!({"choice": "Proceed"}))
        .await
        .map_err(|e| format!("put: {e}"))?;
    s.put_stage_data("lead-1", "decision", json!({"choice": "Not a Fit"}))
        .await
        .map_err(|e| format!("replace: {e}"))?;
    let stored = s
        .get_stage_data("lead-1", "decision")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if stored != Some(json!({"choice": "Not a Fit"})) {
        return Err(format!("unexpected data: {stored:?}"));
    }

    let existed = s
        .delete_stage_data("lead-1", "decision")
        .await
        .map_err(|e| format!("delete: {e}"))?;
    let existed_again = s
        .delete_stage_data("lead-1", "decision")
        .await
        .map_err(|e| format!("delete again: {e}"))?;
    if !existed || existed_again {
        return Err(format!(
            "delete results wrong: first={existed} second={existed_again}"
        ));
    }
    Ok(())
}

// ── Artifacts ────────────────────────────────────────────────────────────────

async fn artifact_slot_replaced_on_put<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: PipelineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_lead(&s, "lead-1").await?;
    s.put_artifact("lead-1", make_artifact("demo-recording", "take-1.mp4"))
        .await
        .map_err(|e| format!("put: {e}"))?;
    s.put_artifact("lead-1", make_artifact("demo-recording", "take-2.mp4"))
        .await
        .map_err(|e| format!("replace: {e}"))?;
    s.put_artifact("lead-1", make_artifact("proposal", "proposal.pdf"))
        .await
        .map_err(|e| format!("put proposal: {e}"))?;

    let demo = s
        .get_artifact("lead-1", "demo-recording")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if demo.as_ref().map(|a| a.file_name.as_str()) != Some("take-2.mp4") {
        return Err(format!("slot not replaced: {demo:?}"));
    }
    let slots: Vec<String> = s
        .list_artifacts("lead-1")
        .await
        .map_err(|e| format!("list: {e}"))?
        .into_iter()
        .map(|a| a.slot)
        .collect();
    if slots != ["demo-recording", "proposal"] {
        return Err(format!("unexpected slots: {slots:?}"));
    }
    Ok(())
}

async fn artifact_delete_returns_removed_record<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: PipelineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_lead(&s, "lead-1").await?;
    let artifact = make_artifact("proposal", "proposal.pdf");
    s.put_artifact("lead-1", artifact.clone())
        .await
        .map_err(|e| format!("put: {e}"))?;

    let removed = s
        .delete_artifact("lead-1", "proposal")
        .await
        .map_err(|e| format!("delete: {e}"))?;
    if removed != Some(artifact) {
        return Err(format!("unexpected removed record: {removed:?}"));
    }
    let again = s
        .delete_artifact("lead-1", "proposal")
        .await
        .map_err(|e| format!("delete again: {e}"))?;
    if again.is_some() {
        return Err(format!("second delete returned {again:?}"));
    }
    Ok(())
}
