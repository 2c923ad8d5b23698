use std::future::Future;

use super::{make_artifact, make_checklist, make_completion, make_entity, TestResult};
use crate::{PipelineStorage, StorageError};
use stagewise_core::WorkflowType;

pub(super) async fn run_error_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: PipelineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "error",
        "get_missing_entity_returns_not_found",
        get_missing_entity_returns_not_found(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "update_missing_entity_returns_not_found",
        update_missing_entity_returns_not_found(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "child_writes_on_missing_entity_return_not_found",
        child_writes_on_missing_entity_return_not_found(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "child_reads_on_missing_entity_return_not_found",
        child_reads_on_missing_entity_return_not_found(factory).await,
    ));

    results
}

fn expect_not_found<T: std::fmt::Debug>(
    op: &str,
    result: Result<T, StorageError>,
) -> Result<(), String> {
    match result {
        Err(StorageError::EntityNotFound { entity_id }) if entity_id == "ghost" => Ok(()),
        other => Err(format!("{op}: expected EntityNotFound(ghost), got {:?}", other)),
    }
}

async fn get_missing_entity_returns_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: PipelineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    expect_not_found("get_entity", s.get_entity("ghost").await)
}

async fn update_missing_entity_returns_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: PipelineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let record = make_entity("ghost", WorkflowType::SalesLead, "new-lead");
    expect_not_found("update_entity", s.update_entity(&record, 0).await)
}

async fn child_writes_on_missing_entity_return_not_found<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: PipelineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    expect_not_found(
        "upsert_completion",
        s.upsert_completion("ghost", make_completion("new-lead", 0))
            .await,
    )?;
    expect_not_found(
        "delete_completions_from",
        s.delete_completions_from("ghost", 0).await,
    )?;
    expect_not_found(
        "set_checklist_item",
        s.set_checklist_item("ghost", make_checklist("discovery", "budget", true))
            .await,
    )?;
    expect_not_found(
        "put_stage_data",
        s.put_stage_data("ghost", "decision", serde_json::json!({}))
            .await,
    )?;
    expect_not_found(
        "put_artifact",
        s.put_artifact("ghost", make_artifact("demo-recording", "demo.mp4"))
            .await,
    )?;
    expect_not_found(
        "delete_artifact",
        s.delete_artifact("ghost", "demo-recording").await,
    )
}

async fn child_reads_on_missing_entity_return_not_found<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: PipelineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    expect_not_found("list_completions", s.list_completions("ghost").await)?;
    expect_not_found("list_checklist", s.list_checklist("ghost").await)?;
    expect_not_found(
        "get_stage_data",
        s.get_stage_data("ghost", "decision").await,
    )?;
    expect_not_found(
        "get_artifact",
        s.get_artifact("ghost", "demo-recording").await,
    )?;
    expect_not_found("list_artifacts", s.list_artifacts("ghost").await)
}
