mod common;

use std::time::Duration;

use common::*;
use conveyor::model::{ConnectionMap, ConnectionRef};
use conveyor::status::{ClusterMessage, ExecutionStatus};
use conveyor::CoreEvent;

fn gated_spec(name: &str, conn_type: &str, connection: &str) -> conveyor::JobSpec {
    let mut spec = job_spec(name, 2);
    spec.moderator = Some(ConnectionMap::new().with_connection(conn_type, connection));
    spec
}

#[tokio::test]
async fn test_deferred_then_released() {
    let cluster = MockCluster::new(5);
    cluster.set_moderator(false);
    let mut ctx = test_context(cluster);
    ctx.controller.start();

    let job_id = ctx
        .service
        .submit_job(gated_spec("throttled", "elasticsearch", "hot"), true)
        .await
        .unwrap();
    let ex_id = latest_ex(&ctx.service, &job_id).await;

    // Refused: held, still pending, and invisible to the allocator.
    assert_eq!(ctx.service.held_executions().await, vec![ex_id.clone()]);
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(ctx.cluster.slicer_allocations().is_empty());
    let ex = ctx.service.get_execution_context(&ex_id).await.unwrap();
    assert_eq!(ex.status, ExecutionStatus::Pending);

    // Throttle lifts; the release promotes and the allocator schedules.
    ctx.cluster.set_moderator(true);
    ctx.bus.emit(CoreEvent::ModerationResume {
        connections: vec![ConnectionRef::new("elasticsearch", "hot")],
    });

    wait_for_status(&ctx.service, &ex_id, ExecutionStatus::Initializing).await;
    assert!(ctx.service.held_executions().await.is_empty());
}

#[tokio::test]
async fn test_release_promotes_to_front_of_pending() {
    let cluster = MockCluster::new(0);
    cluster.set_moderator(false);
    let mut ctx = test_context(cluster);
    ctx.controller.start();

    let held_job = ctx
        .service
        .submit_job(gated_spec("held", "kafka", "events"), true)
        .await
        .unwrap();
    let held_ex = latest_ex(&ctx.service, &held_job).await;

    // An ungated submission goes straight to pending.
    let plain_job = ctx
        .service
        .submit_job(job_spec("plain", 1), true)
        .await
        .unwrap();
    let plain_ex = latest_ex(&ctx.service, &plain_job).await;
    assert_eq!(ctx.service.pending_executions().await, vec![plain_ex.clone()]);

    ctx.cluster.set_moderator(true);
    ctx.bus.emit(CoreEvent::ModerationResume {
        connections: vec![ConnectionRef::new("kafka", "events")],
    });
    wait_for_held_len(&ctx.service, 0).await;

    // The released execution jumps ahead of the one that never waited.
    assert_eq!(
        ctx.service.pending_executions().await,
        vec![held_ex, plain_ex]
    );
}

#[tokio::test]
async fn test_release_keeps_still_throttled_executions_held() {
    let cluster = MockCluster::new(0);
    cluster.set_moderator(false);
    let mut ctx = test_context(cluster);
    ctx.controller.start();

    let job_id = ctx
        .service
        .submit_job(gated_spec("stuck", "elasticsearch", "cold"), true)
        .await
        .unwrap();
    let ex_id = latest_ex(&ctx.service, &job_id).await;

    // Moderator still says no; the re-scan keeps the hold.
    ctx.bus.emit(CoreEvent::ModerationResume {
        connections: vec![ConnectionRef::new("elasticsearch", "cold")],
    });
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(ctx.service.held_executions().await, vec![ex_id]);
    assert!(ctx.service.pending_executions().await.is_empty());
}

#[tokio::test]
async fn test_moderation_pause_and_resume_running_execution() {
    let mut ctx = test_context(MockCluster::new(5));
    ctx.controller.start();

    let job_id = ctx
        .service
        .submit_job(gated_spec("reader", "elasticsearch", "hot"), true)
        .await
        .unwrap();
    let ex_id = latest_ex(&ctx.service, &job_id).await;
    wait_for_status(&ctx.service, &ex_id, ExecutionStatus::Initializing).await;
    ctx.bus.emit(CoreEvent::SlicerInitialized {
        ex_id: ex_id.clone(),
    });
    wait_for_status(&ctx.service, &ex_id, ExecutionStatus::Running).await;

    // The moderator throttles the connection this execution reads.
    ctx.bus.emit(CoreEvent::ModerationPause {
        connections: vec![ConnectionRef::new("elasticsearch", "hot")],
    });
    wait_for_status(&ctx.service, &ex_id, ExecutionStatus::ModeratorPaused).await;
    let pauses: Vec<_> = ctx
        .cluster
        .notifications()
        .into_iter()
        .filter(|(_, message, _)| *message == ClusterMessage::Pause)
        .collect();
    assert_eq!(pauses, vec![("node-1".to_string(), ClusterMessage::Pause, ex_id.clone())]);

    // And releases it.
    ctx.bus.emit(CoreEvent::ModerationResume {
        connections: vec![ConnectionRef::new("elasticsearch", "hot")],
    });
    wait_for_status(&ctx.service, &ex_id, ExecutionStatus::Running).await;
}

#[tokio::test]
async fn test_moderation_pause_ignores_unrelated_connections() {
    let mut ctx = test_context(MockCluster::new(5));
    ctx.controller.start();

    let job_id = ctx
        .service
        .submit_job(gated_spec("unrelated", "elasticsearch", "hot"), true)
        .await
        .unwrap();
    let ex_id = latest_ex(&ctx.service, &job_id).await;
    wait_for_status(&ctx.service, &ex_id, ExecutionStatus::Initializing).await;
    ctx.bus.emit(CoreEvent::SlicerInitialized {
        ex_id: ex_id.clone(),
    });
    wait_for_status(&ctx.service, &ex_id, ExecutionStatus::Running).await;

    ctx.bus.emit(CoreEvent::ModerationPause {
        connections: vec![ConnectionRef::new("kafka", "events")],
    });
    tokio::time::sleep(Duration::from_millis(80)).await;
    let ex = ctx.service.get_execution_context(&ex_id).await.unwrap();
    assert_eq!(ex.status, ExecutionStatus::Running);
}
