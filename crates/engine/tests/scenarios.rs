//! End-to-end pipeline scenarios over the in-memory store.

use std::sync::Arc;

use stagewise_core::{Catalog, WorkflowType};
use stagewise_engine::{
    Engine, EngineError, ErrorKind, ManualClock, RecordingSink, SinkCall, TriggerOutcome, Triggers,
};
use stagewise_storage::{MemoryStorage, PipelineStorage};
use time::macros::datetime;
use time::{Duration, OffsetDateTime};

// Monday
const START: OffsetDateTime = datetime!(2026-03-02 09:00 UTC);

struct World {
    engine: Arc<Engine<MemoryStorage>>,
    triggers: Triggers<MemoryStorage>,
    sink: Arc<RecordingSink>,
    clock: Arc<ManualClock>,
}

fn world() -> World {
    let sink = Arc::new(RecordingSink::new());
    let clock = Arc::new(ManualClock::new(START));
    let engine = Arc::new(
        Engine::new(
            Arc::new(Catalog::builtin()),
            Arc::new(MemoryStorage::new()),
            sink.clone(),
        )
        .with_clock(clock.clone()),
    );
    World {
        triggers: Triggers::new(Arc::clone(&engine)),
        engine,
        sink,
        clock,
    }
}

async fn completed(engine: &Engine<MemoryStorage>, id: &str) -> Vec<String> {
    engine
        .storage()
        .list_completions(id)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.stage_id)
        .collect()
}

/// Current stage order is at least the order of every completed stage.
async fn assert_order_invariant(engine: &Engine<MemoryStorage>, id: &str) {
    let entity = engine.get(id).await.unwrap();
    let current = engine
        .catalog()
        .index_of(entity.workflow_type, &entity.current_stage_id)
        .unwrap();
    for c in engine.storage().list_completions(id).await.unwrap() {
        if !c.is_skipped {
            assert!(c.order <= current, "{} completed ahead of {}", c.stage_id, current);
        }
    }
}

#[tokio::test]
async fn demo_upload_advances_and_deleting_it_reverts() {
    let w = world();
    w.engine.create("lead-1", WorkflowType::SalesLead).await.unwrap();
    for stage in ["new-lead", "intro-call", "discovery"] {
        w.triggers.manual.confirm("lead-1", stage).await.unwrap();
    }

    let (outcome, _) = w
        .triggers
        .upload
        .uploaded("lead-1", "demo-recording", "demo.mp4", b"recording")
        .await
        .unwrap();
    assert!(matches!(outcome, TriggerOutcome::Advanced(_)));
    assert_eq!(outcome.entity().current_stage_id, "readiness");

    let outcome = w
        .triggers
        .upload
        .deleted("lead-1", "demo-recording")
        .await
        .unwrap();
    assert!(matches!(outcome, TriggerOutcome::Reverted(_)));
    assert_eq!(outcome.entity().current_stage_id, "demo");
    assert_eq!(
        completed(&w.engine, "lead-1").await,
        vec!["new-lead", "intro-call", "discovery"]
    );
    assert_order_invariant(&w.engine, "lead-1").await;
}

#[tokio::test]
async fn confirm_lost_at_quote_sent_is_decided_once() {
    let w = world();
    w.engine.create("deal-1", WorkflowType::SalesDeal).await.unwrap();
    w.engine
        .record_auto_sync("deal-1", "Proposal/Price Quote")
        .await
        .unwrap();

    let deal = w
        .engine
        .confirm_lost("deal-1", "competitor", "chose X")
        .await
        .unwrap();
    assert_eq!(deal.current_stage_id, "closed-lost");
    let completions = w.engine.storage().list_completions("deal-1").await.unwrap();
    let lost = completions
        .iter()
        .find(|c| c.stage_id == "closed-lost")
        .unwrap();
    assert!(!lost.is_skipped);

    let err = w
        .engine
        .confirm_lost("deal-1", "competitor", "chose X")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AlreadyDecided { .. }));
    assert_eq!(
        w.engine.get("deal-1").await.unwrap().version,
        deal.version
    );
}

#[tokio::test]
async fn advance_before_expiry_cancels_follow_up() {
    let w = world();
    w.engine.create("deal-1", WorkflowType::SalesDeal).await.unwrap();
    for stage in ["qualification", "needs-analysis", "quote-prep"] {
        w.engine.advance("deal-1", stage, "ok").await.unwrap();
    }
    // Follow-up armed on entering quote-sent.
    assert_eq!(w.engine.timers().for_entity("deal-1").len(), 1);

    w.clock.advance(Duration::days(1));
    w.engine.advance("deal-1", "quote-sent", "replied").await.unwrap();

    let report = w.engine.tick(datetime!(2026-03-05 09:00 UTC)).await;
    assert_eq!(report.fired, 0);
    w.engine.drain_notifications().await;
    assert!(w
        .sink
        .automation_calls()
        .iter()
        .all(|c| !matches!(c, SinkCall::Enroll { .. })));
}

#[tokio::test]
async fn repeated_advance_is_conflict_and_changes_nothing() {
    let w = world();
    w.engine.create("lead-1", WorkflowType::SalesLead).await.unwrap();
    let first = w.engine.advance("lead-1", "new-lead", "ok").await.unwrap();
    let err = w.engine.advance("lead-1", "new-lead", "ok").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(w.engine.get("lead-1").await.unwrap(), first);
    assert_eq!(completed(&w.engine, "lead-1").await, vec!["new-lead"]);
}

#[tokio::test]
async fn revert_then_readvance_writes_fresh_records() {
    let w = world();
    w.engine.create("lead-1", WorkflowType::SalesLead).await.unwrap();
    w.engine
        .record_auto_sync("lead-1", "Sales Qualified Lead")
        .await
        .unwrap();
    let original = w.engine.get("lead-1").await.unwrap().current_stage_id;

    w.engine.revert("lead-1", "intro-call").await.unwrap();
    w.clock.advance(Duration::hours(2));
    for stage in ["intro-call", "discovery"] {
        w.engine.advance("lead-1", stage, "redo").await.unwrap();
    }

    assert_eq!(w.engine.get("lead-1").await.unwrap().current_stage_id, original);
    let completions = w.engine.storage().list_completions("lead-1").await.unwrap();
    assert!(completions[0].is_auto_synced);
    for c in &completions[1..] {
        assert!(!c.is_auto_synced, "{} resurrected", c.stage_id);
        assert_eq!(c.completed_at, START + Duration::hours(2));
    }
}

#[tokio::test]
async fn sync_never_moves_backward() {
    let w = world();
    w.engine.create("lead-1", WorkflowType::SalesLead).await.unwrap();
    let at = START;
    let names = [
        "Opportunity",
        "Lead",
        "Marketing Qualified Lead",
        "Customer",
        "Sales Qualified Lead",
    ];
    let mut highest = 0;
    for name in names {
        let outcome = w.triggers.sync.receive("lead-1", name, at).await.unwrap();
        let order = w
            .engine
            .catalog()
            .index_of(WorkflowType::SalesLead, &outcome.entity().current_stage_id)
            .unwrap();
        assert!(order >= highest);
        highest = order;
    }
    assert_eq!(
        w.engine.get("lead-1").await.unwrap().current_stage_id,
        "onboarding-form"
    );
    assert_order_invariant(&w.engine, "lead-1").await;
}

#[tokio::test]
async fn seven_of_fourteen_lead_stages_is_half() {
    let w = world();
    w.engine.create("lead-1", WorkflowType::SalesLead).await.unwrap();
    w.engine.record_auto_sync("lead-1", "Opportunity").await.unwrap();
    w.engine
        .advance("lead-1", "proposal", "file-uploaded")
        .await
        .unwrap();
    let progress = w.engine.progress("lead-1").await.unwrap();
    assert_eq!(progress.total, 14);
    assert_eq!(progress.completed, 7);
    assert_eq!(progress.percent, 50);
}

#[tokio::test]
async fn concurrent_triggers_on_one_entity_serialize() {
    let w = world();
    w.engine.create("lead-1", WorkflowType::SalesLead).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = Arc::clone(&w.engine);
        handles.push(tokio::spawn(async move {
            engine.advance("lead-1", "new-lead", "race").await
        }));
    }
    let mut ok = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(e) => assert_eq!(e.kind(), ErrorKind::Conflict),
        }
    }
    assert_eq!(ok, 1);
    let lead = w.engine.get("lead-1").await.unwrap();
    assert_eq!(lead.current_stage_id, "intro-call");
    assert_eq!(lead.version, 1);
}

#[tokio::test]
async fn upload_racing_sync_leaves_a_consistent_entity() {
    let w = world();
    w.engine.create("lead-1", WorkflowType::SalesLead).await.unwrap();
    w.engine
        .record_auto_sync("lead-1", "Sales Qualified Lead")
        .await
        .unwrap();

    let triggers = Arc::new(w.triggers);
    let upload = {
        let t = Arc::clone(&triggers);
        tokio::spawn(async move {
            t.upload
                .uploaded("lead-1", "demo-recording", "demo.mp4", b"x")
                .await
        })
    };
    let sync = {
        let t = Arc::clone(&triggers);
        tokio::spawn(async move { t.sync.receive("lead-1", "Opportunity", START).await })
    };
    let _ = upload.await.unwrap();
    sync.await.unwrap().unwrap();

    assert_eq!(
        w.engine.get("lead-1").await.unwrap().current_stage_id,
        "proposal"
    );
    assert_order_invariant(&w.engine, "lead-1").await;
}

#[tokio::test]
async fn stage_changes_reach_the_sink() {
    let w = world();
    w.engine.create("lead-1", WorkflowType::SalesLead).await.unwrap();
    w.engine.advance("lead-1", "new-lead", "ok").await.unwrap();
    w.engine.drain_notifications().await;
    let calls = w.sink.calls();
    assert_eq!(calls.len(), 1);
    match &calls[0] {
        SinkCall::Send {
            template, payload, ..
        } => {
            assert_eq!(template, stagewise_engine::STAGE_CHANGED);
            assert_eq!(payload["to"], "intro-call");
        }
        other => panic!("unexpected sink call: {other:?}"),
    }
}
