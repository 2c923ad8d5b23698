use std::future::Future;

use super::{seed_lead, TestResult};
use crate::{PipelineStorage, StorageError};

pub(super) async fn run_version_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: PipelineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    // Basic version tracking
    results.push(TestResult::from_result(
        "version",
        "version_increments_sequentially",
        version_increments_sequentially(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "update_persists_new_fields",
        update_persists_new_fields(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "update_preserves_created_at",
        update_preserves_created_at(factory).await,
    ));

    // Wrong version fails
    results.push(TestResult::from_result(
        "version",
        "stale_version_returns_conflict",
        stale_version_returns_conflict(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "future_version_returns_conflict",
        future_version_returns_conflict(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "conflict_has_correct_fields",
        conflict_has_correct_fields(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "conflict_leaves_record_untouched",
        conflict_leaves_record_untouched(factory).await,
    ));

    results
}

// ── Version tracking ─────────────────────────────────────────────────────────

async fn version_increments_sequentially<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: PipelineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_lead(&s, "lead-1").await?;
    let record = s
        .get_entity("lead-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    for expected in 0..5 {
        let new_version = s
            .update_entity(&record, expected)
            .await
            .map_err(|e| format!("update at {expected}: {e}"))?;
        if new_version != expected + 1 {
            return Err(format!(
                "update at {expected} returned {new_version}, expected {}",
                expected + 1
            ));
        }
    }
    let stored = s
        .get_entity("lead-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if stored.version != 5 {
        return Err(format!("expected stored version 5, got {}", stored.version));
    }
    Ok(())
}

async fn update_persists_new_fields<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: PipelineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_lead(&s, "lead-1").await?;
    let mut record = s
        .get_entity("lead-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    record.current_stage_id = "intro-call".to_string();
    record.updated_at = super::T0 + time::Duration::hours(3);
    s.update_entity(&record, 0)
        .await
        .map_err(|e| format!("update: {e}"))?;

    let stored = s
        .get_entity("lead-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if stored.current_stage_id != "intro-call" {
        return Err(format!("stage not persisted: {}", stored.current_stage_id));
    }
    if stored.updated_at != record.updated_at {
        return Err(format!("updated_at not persisted: {}", stored.updated_at));
    }
    Ok(())
}

async fn update_preserves_created_at<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: PipelineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_lead(&s, "lead-1").await?;
    let mut record = s
        .get_entity("lead-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    record.created_at = super::T0 + time::Duration::days(30);
    s.update_entity(&record, 0)
        .await
        .map_err(|e| format!("update: {e}"))?;
    let stored = s
        .get_entity("lead-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if stored.created_at != super::T0 {
        return Err(format!("created_at changed to {}", stored.created_at));
    }
    Ok(())
}

// ── Conflicts ────────────────────────────────────────────────────────────────

async fn stale_version_returns_conflict<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: PipelineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_lead(&s, "lead-1").await?;
    let record = s
        .get_entity("lead-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    // Intervening writer moves the version to 1.
    s.update_entity(&record, 0)
        .await
        .map_err(|e| format!("first update: {e}"))?;
    match s.update_entity(&record, 0).await {
        Err(StorageError::ConcurrentConflict { .. }) => Ok(()),
        other => Err(format!("expected ConcurrentConflict, got {:?}", other)),
    }
}

async fn future_version_returns_conflict<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: PipelineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_lead(&s, "lead-1").await?;
    let record = s
        .get_entity("lead-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    match s.update_entity(&record, 1).await {
        Err(StorageError::ConcurrentConflict { .. }) => Ok(()),
        other => Err(format!("expected ConcurrentConflict, got {:?}", other)),
    }
}

async fn conflict_has_correct_fields<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: PipelineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_lead(&s, "lead-1").await?;
    let record = s
        .get_entity("lead-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    s.update_entity(&record, 0)
        .await
        .map_err(|e| format!("update 0: {e}"))?;
    s.update_entity(&record, 1)
        .await
        .map_err(|e| format!("update 1: {e}"))?;

    match s.update_entity(&record, 0).await {
        Err(StorageError::ConcurrentConflict {
            entity_id,
            expected_version,
            actual_version,
        }) => {
            if entity_id != "lead-1" {
                return Err(format!("wrong entity_id: {entity_id}"));
            }
            if expected_version != 0 {
                return Err(format!("wrong expected_version: {expected_version}"));
            }
            if actual_version != 2 {
                return Err(format!("wrong actual_version: {actual_version}"));
            }
            Ok(())
        }
        other => Err(format!("expected ConcurrentConflict, got {:?}", other)),
    }
}

async fn conflict_leaves_record_untouched<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: PipelineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_lead(&s, "lead-1").await?;
    let mut record = s
        .get_entity("lead-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    record.current_stage_id = "discovery".to_string();
    let _ = s.update_entity(&record, 3).await;

    let stored = s
        .get_entity("lead-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if stored.current_stage_id != "new-lead" || stored.version != 0 {
        return Err(format!("conflicting write leaked: {stored:?}"));
    }
    Ok(())
}
