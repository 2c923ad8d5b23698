use std::future::Future;

use stagewise_core::WorkflowType;

use super::{make_entity, seed_lead, TestResult};
use crate::{PipelineStorage, StorageError};

pub(super) async fn run_entity_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: PipelineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "entity",
        "create_stores_version_0",
        create_stores_version_0(factory).await,
    ));
    results.push(TestResult::from_result(
        "entity",
        "created_entity_readable_via_get_entity",
        created_entity_readable_via_get_entity(factory).await,
    ));
    results.push(TestResult::from_result(
        "entity",
        "duplicate_create_returns_already_exists",
        duplicate_create_returns_already_exists(factory).await,
    ));
    results.push(TestResult::from_result(
        "entity",
        "list_entities_sorted_by_id",
        list_entities_sorted_by_id(factory).await,
    ));
    results.push(TestResult::from_result(
        "entity",
        "list_entities_filters_by_workflow",
        list_entities_filters_by_workflow(factory).await,
    ));
    results.push(TestResult::from_result(
        "entity",
        "different_entities_are_independent",
        different_entities_are_independent(factory).await,
    ));

    results
}

// ── 1. create forces version 0 regardless of input ───────────────────────────

async fn create_stores_version_0<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: PipelineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut record = make_entity("lead-1", WorkflowType::SalesLead, "new-lead");
    record.version = 7;
    s.create_entity(record)
        .await
        .map_err(|e| format!("create: {e}"))?;
    let stored = s
        .get_entity("lead-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if stored.version != 0 {
        return Err(format!("expected version 0, got {}", stored.version));
    }
    Ok(())
}

// ── 2. created entity round-trips its fields ─────────────────────────────────

async fn created_entity_readable_via_get_entity<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: PipelineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let record = make_entity("deal-9", WorkflowType::SalesDeal, "qualification");
    s.create_entity(record.clone())
        .await
        .map_err(|e| format!("create: {e}"))?;
    let stored = s
        .get_entity("deal-9")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if stored != record {
        return Err(format!("expected {record:?}, got {stored:?}"));
    }
    Ok(())
}

// ── 3. second create with the same id fails and carries the id ───────────────

async fn duplicate_create_returns_already_exists<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: PipelineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_lead(&s, "lead-1").await?;
    let result = s
        .create_entity(make_entity("lead-1", WorkflowType::SalesDeal, "qualification"))
        .await;
    match result {
        Err(StorageError::AlreadyExists { entity_id }) if entity_id == "lead-1" => {}
        other => return Err(format!("expected AlreadyExists(lead-1), got {:?}", other)),
    }
    // The original record is untouched.
    let stored = s
        .get_entity("lead-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if stored.workflow_type != WorkflowType::SalesLead {
        return Err(format!(
            "duplicate create overwrote workflow type: {}",
            stored.workflow_type
        ));
    }
    Ok(())
}

// ── 4. list_entities returns ids in ascending order ──────────────────────────

async fn list_entities_sorted_by_id<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: PipelineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    for id in ["lead-c", "lead-a", "lead-b"] {
        seed_lead(&s, id).await?;
    }
    let ids: Vec<String> = s
        .list_entities(None)
        .await
        .map_err(|e| format!("list: {e}"))?
        .into_iter()
        .map(|r| r.entity_id)
        .collect();
    if ids != ["lead-a", "lead-b", "lead-c"] {
        return Err(format!("unexpected order: {ids:?}"));
    }
    Ok(())
}

// ── 5. workflow filter ───────────────────────────────────────────────────────

async fn list_entities_filters_by_workflow<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: PipelineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_lead(&s, "lead-1").await?;
    s.create_entity(make_entity("deal-1", WorkflowType::SalesDeal, "qualification"))
        .await
        .map_err(|e| format!("create deal: {e}"))?;
    s.create_entity(make_entity(
        "cust-1",
        WorkflowType::Offboarding,
        "notice-received",
    ))
    .await
    .map_err(|e| format!("create customer: {e}"))?;

    let deals = s
        .list_entities(Some(WorkflowType::SalesDeal))
        .await
        .map_err(|e| format!("list: {e}"))?;
    if deals.len() != 1 || deals[0].entity_id != "deal-1" {
        return Err(format!("expected only deal-1, got {deals:?}"));
    }
    let all = s
        .list_entities(None)
        .await
        .map_err(|e| format!("list all: {e}"))?;
    if all.len() != 3 {
        return Err(format!("expected 3 entities, got {}", all.len()));
    }
    Ok(())
}

// ── 6. writes to one entity never leak into another ──────────────────────────

async fn different_entities_are_independent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: PipelineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_lead(&s, "lead-1").await?;
    seed_lead(&s, "lead-2").await?;

    let mut moved = s
        .get_entity("lead-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    moved.current_stage_id = "intro-call".to_string();
    s.update_entity(&moved, 0)
        .await
        .map_err(|e| format!("update: {e}"))?;

    let other = s
        .get_entity("lead-2")
        .await
        .map_err(|e| format!("get other: {e}"))?;
    if other.current_stage_id != "new-lead" || other.version != 0 {
        return Err(format!("lead-2 changed: {other:?}"));
    }
    Ok(())
}
