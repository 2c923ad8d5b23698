use std::future::Future;

use super::{make_completion, seed_lead, TestResult};
use crate::PipelineStorage;

pub(super) async fn run_completion_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: PipelineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "completion",
        "new_entity_has_no_completions",
        new_entity_has_no_completions(factory).await,
    ));
    results.push(TestResult::from_result(
        "completion",
        "completions_listed_in_stage_order",
        completions_listed_in_stage_order(factory).await,
    ));
    results.push(TestResult::from_result(
        "completion",
        "upsert_replaces_existing_record",
        upsert_replaces_existing_record(factory).await,
    ));
    results.push(TestResult::from_result(
        "completion",
        "delete_from_removes_order_and_later",
        delete_from_removes_order_and_later(factory).await,
    ));
    results.push(TestResult::from_result(
        "completion",
        "delete_from_past_end_is_noop",
        delete_from_past_end_is_noop(factory).await,
    ));

    results
}

async fn new_entity_has_no_completions<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: PipelineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_lead(&s, "lead-1").await?;
    let completions = s
        .list_completions("lead-1")
        .await
        .map_err(|e| format!("list: {e}"))?;
    if !completions.is_empty() {
        return Err(format!("expected none, got {completions:?}"));
    }
    Ok(())
}

async fn completions_listed_in_stage_order<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: PipelineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_lead(&s, "lead-1").await?;
    for (stage, order) in [("discovery", 2), ("new-lead", 0), ("intro-call", 1)] {
        s.upsert_completion("lead-1", make_completion(stage, order))
            .await
            .map_err(|e| format!("upsert {stage}: {e}"))?;
    }
    let stages: Vec<String> = s
        .list_completions("lead-1")
        .await
        .map_err(|e| format!("list: {e}"))?
        .into_iter()
        .map(|c| c.stage_id)
        .collect();
    if stages != ["new-lead", "intro-call", "discovery"] {
        return Err(format!("unexpected order: {stages:?}"));
    }
    Ok(())
}

async fn upsert_replaces_existing_record<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: PipelineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_lead(&s, "lead-1").await?;
    s.upsert_completion("lead-1", make_completion("new-lead", 0))
        .await
        .map_err(|e| format!("first upsert: {e}"))?;

    let mut skipped = make_completion("new-lead", 0);
    skipped.is_skipped = true;
    skipped.reason = Some("imported".to_string());
    s.upsert_completion("lead-1", skipped.clone())
        .await
        .map_err(|e| format!("second upsert: {e}"))?;

    let completions = s
        .list_completions("lead-1")
        .await
        .map_err(|e| format!("list: {e}"))?;
    if completions != vec![skipped] {
        return Err(format!("expected single replaced record, got {completions:?}"));
    }
    Ok(())
}

async fn delete_from_removes_order_and_later<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: PipelineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_lead(&s, "lead-1").await?;
    for (stage, order) in [
        ("new-lead", 0),
        ("intro-call", 1),
        ("discovery", 2),
        ("demo", 3),
    ] {
        s.upsert_completion("lead-1", make_completion(stage, order))
            .await
            .map_err(|e| format!("upsert {stage}: {e}"))?;
    }
    let removed = s
        .delete_completions_from("lead-1", 2)
        .await
        .map_err(|e| format!("delete: {e}"))?;
    if removed != 2 {
        return Err(format!("expected 2 removed, got {removed}"));
    }
    let orders: Vec<u32> = s
        .list_completions("lead-1")
        .await
        .map_err(|e| format!("list: {e}"))?
        .into_iter()
        .map(|c| c.order)
        .collect();
    if orders != [0, 1] {
        return Err(format!("unexpected remaining orders: {orders:?}"));
    }
    Ok(())
}

async fn delete_from_past_end_is_noop<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: PipelineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_lead(&s, "lead-1").await?;
    s.upsert_completion("lead-1", make_completion("new-lead", 0))
        .await
        .map_err(|e| format!("upsert: {e}"))?;
    let removed = s
        .delete_completions_from("lead-1", 9)
        .await
        .map_err(|e| format!("delete: {e}"))?;
    if removed != 0 {
        return Err(format!("expected nothing removed, got {removed}"));
    }
    Ok(())
}
