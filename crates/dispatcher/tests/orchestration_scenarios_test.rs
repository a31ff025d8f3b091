use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::broadcast;

use orchestrator_core::{
    models::{NewTask, TaskDescriptor, TaskParameters, TaskState, WorkerHealth},
    traits::SnapshotSink,
};
use orchestrator_dispatcher::{
    test_utils::{test_config, DispatchMode, MockWorkerClient},
    Orchestrator, ProbeOutcome, TaskIntake, TIMEOUT_REASON, WORKER_LOST_REASON,
};
use orchestrator_infrastructure::JsonFileSnapshotSink;

fn build(workers: u16, mode: DispatchMode) -> (Arc<Orchestrator>, Arc<MockWorkerClient>) {
    let client = Arc::new(MockWorkerClient::new(mode));
    let orchestrator = Orchestrator::new(test_config(workers), client.clone(), None).unwrap();
    (Arc::new(orchestrator), client)
}

fn request(priority: i32) -> NewTask {
    NewTask {
        algorithm: "benchmark.py".to_string(),
        parameters: TaskParameters::new(),
        priority,
    }
}

/// 让指定Worker以给定延迟通过一次探测
async fn mark_online(orchestrator: &Orchestrator, probes: &[(&str, f64)], now: DateTime<Utc>) {
    let outcomes = probes
        .iter()
        .map(|(worker_id, latency)| ProbeOutcome::success(*worker_id, *latency))
        .collect();
    orchestrator
        .health_monitor()
        .apply_probe_results(outcomes, now)
        .await;
}

async fn wait_for_status(orchestrator: &Orchestrator, task_id: &str, status: TaskState) {
    for _ in 0..200 {
        if orchestrator.tasks().get(task_id).await.unwrap().status == status {
            return;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    panic!("task {task_id} never reached {status}");
}

#[tokio::test]
async fn test_highest_priority_task_assigned_first() {
    let (orchestrator, _client) = build(1, DispatchMode::Hold);
    let now = Utc::now();

    orchestrator.submit(request(1)).await.unwrap();
    let urgent = orchestrator.submit(request(5)).await.unwrap();
    orchestrator.submit(request(3)).await.unwrap();
    mark_online(&orchestrator, &[("worker-1", 0.01)], now).await;

    let assignments = orchestrator.distributor().assign_pending(now).await;
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].task_id, urgent);
    assert_eq!(assignments[0].worker_id, "worker-1");

    let task = orchestrator.tasks().get(&urgent).await.unwrap();
    assert_eq!(task.status, TaskState::Assigned);
    assert_eq!(task.assigned_worker.as_deref(), Some("worker-1"));
}

#[tokio::test]
async fn test_worker_lost_after_five_failed_probes() {
    let (orchestrator, _client) = build(1, DispatchMode::Hold);
    let now = Utc::now();

    let task_id = orchestrator.submit(request(1)).await.unwrap();
    mark_online(&orchestrator, &[("worker-1", 0.01)], now).await;
    let assignment = orchestrator.distributor().assign_pending(now).await.remove(0);
    assert!(
        orchestrator
            .distributor()
            .mark_running(&task_id, "worker-1", assignment.attempt, now)
            .await
    );

    for i in 1..=4 {
        let report = orchestrator
            .health_monitor()
            .apply_probe_results(
                vec![ProbeOutcome::failure("worker-1", "connection refused")],
                now + Duration::seconds(5 * i),
            )
            .await;
        assert!(report.lost.is_empty());
    }
    assert_eq!(
        orchestrator.tasks().get(&task_id).await.unwrap().status,
        TaskState::Running
    );

    let report = orchestrator
        .health_monitor()
        .apply_probe_results(
            vec![ProbeOutcome::failure("worker-1", "connection refused")],
            now + Duration::seconds(25),
        )
        .await;
    assert_eq!(report.lost, vec!["worker-1".to_string()]);
    assert_eq!(report.failed_tasks, vec![task_id.clone()]);

    let task = orchestrator.tasks().get(&task_id).await.unwrap();
    assert_eq!(task.status, TaskState::Failed);
    assert_eq!(task.error.as_deref(), Some(WORKER_LOST_REASON));

    let workers = orchestrator.registry().lock().await;
    let worker = workers.get("worker-1").unwrap();
    assert!(worker.current_task.is_none());
    assert_eq!(worker.health, WorkerHealth::Inactive);
    drop(workers);

    assert_eq!(orchestrator.runtime_stats().counters().workers_lost, 1);
}

#[tokio::test]
async fn test_timed_out_task_ignores_late_response() {
    let (orchestrator, client) = build(1, DispatchMode::Hold);
    let task_id = orchestrator.submit(request(1)).await.unwrap();
    mark_online(&orchestrator, &[("worker-1", 0.01)], Utc::now()).await;

    let assignment = orchestrator
        .distributor()
        .assign_pending(Utc::now())
        .await
        .remove(0);
    let distributor = Arc::clone(orchestrator.distributor());
    let in_flight = tokio::spawn(async move { distributor.dispatch(assignment).await });

    wait_for_status(&orchestrator, &task_id, TaskState::Running).await;
    let started_at = orchestrator
        .tasks()
        .get(&task_id)
        .await
        .unwrap()
        .started_at
        .unwrap();

    let timed_out = orchestrator
        .recovery()
        .check_timeouts(started_at + Duration::seconds(61))
        .await;
    assert_eq!(timed_out, vec![task_id.clone()]);

    // Worker在超时之后才返回结果
    assert!(client.resolve(&task_id, json!({"status": "success", "execution_time": 70.0})));
    in_flight.await.unwrap();

    let task = orchestrator.tasks().get(&task_id).await.unwrap();
    assert_eq!(task.status, TaskState::Failed);
    assert_eq!(task.error.as_deref(), Some(TIMEOUT_REASON));
    assert!(task.result.is_none());

    let workers = orchestrator.registry().lock().await;
    let worker = workers.get("worker-1").unwrap();
    assert!(worker.current_task.is_none());
    assert_eq!(worker.tasks_completed, 0);
    assert_eq!(worker.history.len(), 1);
}

#[tokio::test]
async fn test_late_completion_for_previous_attempt_is_stale() {
    let (orchestrator, _client) = build(1, DispatchMode::Hold);
    let now = Utc::now();
    let task_id = orchestrator.submit(request(1)).await.unwrap();
    mark_online(&orchestrator, &[("worker-1", 0.01)], now).await;

    let distributor = orchestrator.distributor();
    let first = distributor.assign_pending(now).await.remove(0);
    distributor.mark_running(&task_id, "worker-1", first.attempt, now).await;
    orchestrator
        .recovery()
        .check_timeouts(now + Duration::seconds(61))
        .await;
    orchestrator.recovery().requeue_failed().await;

    let later = now + Duration::seconds(62);
    mark_online(&orchestrator, &[("worker-1", 0.01)], later).await;
    let second = distributor.assign_pending(later).await.remove(0);
    assert_eq!(second.attempt, first.attempt + 1);
    distributor.mark_running(&task_id, "worker-1", second.attempt, later).await;

    let report = orchestrator_core::models::ExecutionReport::from_payload(json!({"status": "ok"}));
    assert!(
        !distributor
            .complete(&task_id, "worker-1", first.attempt, Ok(report.clone()), later)
            .await
    );
    assert_eq!(
        orchestrator.tasks().get(&task_id).await.unwrap().status,
        TaskState::Running
    );
    assert!(
        distributor
            .complete(&task_id, "worker-1", second.attempt, Ok(report), later)
            .await
    );
    assert_eq!(
        orchestrator.tasks().get(&task_id).await.unwrap().status,
        TaskState::Completed
    );
}

#[tokio::test]
async fn test_failed_task_requeued_until_retries_exhausted() {
    let (orchestrator, client) = build(1, DispatchMode::Reject("HTTP 500".to_string()));
    let task_id = orchestrator.submit(request(2)).await.unwrap();
    let max_retries = orchestrator.tasks().get(&task_id).await.unwrap().max_retries;
    assert_eq!(max_retries, 3);

    for attempt in 0..=max_retries {
        let now = Utc::now();
        mark_online(&orchestrator, &[("worker-1", 0.01)], now).await;
        let assignment = orchestrator.distributor().assign_pending(now).await.remove(0);
        assert_eq!(assignment.attempt, attempt);
        orchestrator.distributor().dispatch(assignment).await;

        let task = orchestrator.tasks().get(&task_id).await.unwrap();
        assert_eq!(task.status, TaskState::Failed);
        assert!(task.error.as_deref().unwrap().starts_with("dispatch failed"));

        let requeued = orchestrator.recovery().requeue_failed().await;
        let task = orchestrator.tasks().get(&task_id).await.unwrap();
        if attempt < max_retries {
            assert_eq!(requeued, vec![task_id.clone()]);
            assert_eq!(task.status, TaskState::Pending);
            assert_eq!(task.retry_count, attempt + 1);
            assert_eq!(task.priority, 2);
        } else {
            assert!(requeued.is_empty());
            assert_eq!(task.status, TaskState::Failed);
            assert_eq!(task.retry_count, max_retries);
        }
    }

    assert!(orchestrator
        .distributor()
        .assign_pending(Utc::now())
        .await
        .is_empty());
    assert_eq!(client.dispatched().len() as u32, max_retries + 1);
    assert_eq!(
        orchestrator.runtime_stats().counters().tasks_retried,
        u64::from(max_retries)
    );
}

#[tokio::test]
async fn test_lower_load_score_worker_chosen() {
    let (orchestrator, _client) = build(2, DispatchMode::Hold);
    let now = Utc::now();
    let task_id = orchestrator.submit(request(1)).await.unwrap();
    mark_online(&orchestrator, &[("worker-1", 0.5), ("worker-2", 0.1)], now).await;

    let assignments = orchestrator.distributor().assign_pending(now).await;
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].task_id, task_id);
    assert_eq!(assignments[0].worker_id, "worker-2");

    let workers = orchestrator.registry().lock().await;
    assert!(workers.get("worker-1").unwrap().current_task.is_none());
    assert_eq!(
        workers.get("worker-2").unwrap().current_task.as_deref(),
        Some(task_id.as_str())
    );
}

#[tokio::test]
async fn test_same_task_id_ingested_once() {
    let (orchestrator, _client) = build(1, DispatchMode::Hold);
    let descriptor = TaskDescriptor {
        task_id: Some("batch-7".to_string()),
        algorithm: Some("benchmark.py".to_string()),
        ..Default::default()
    };

    orchestrator
        .tasks()
        .insert(descriptor.clone().into_task(3).unwrap())
        .await
        .unwrap();
    assert!(orchestrator
        .tasks()
        .insert(descriptor.into_task(3).unwrap())
        .await
        .is_err());

    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("again.json"),
        serde_json::to_vec(&json!({"tasks": [{"task_id": "batch-7", "algorithm": "benchmark.py"}]}))
            .unwrap(),
    )
    .unwrap();
    let mut intake_config = orchestrator.config().intake.clone();
    intake_config.queue_dir = dir.path().to_path_buf();
    let intake = TaskIntake::new(Arc::clone(orchestrator.tasks()), intake_config, 3);
    let reports = intake.scan_once(Utc::now()).await.unwrap();
    assert_eq!(reports[0].skipped, 1);

    assert_eq!(orchestrator.tasks().list().await.len(), 1);
}

#[tokio::test]
async fn test_timestamps_are_monotonic() {
    let (orchestrator, _client) = build(1, DispatchMode::Complete(json!({
        "status": "completed",
        "execution_time": 0.25,
        "worker_id": "worker-1",
    })));
    let task_id = orchestrator.submit(request(1)).await.unwrap();
    mark_online(&orchestrator, &[("worker-1", 0.01)], Utc::now()).await;

    let assignment = orchestrator
        .distributor()
        .assign_pending(Utc::now())
        .await
        .remove(0);
    orchestrator.distributor().dispatch(assignment).await;

    let task = orchestrator.tasks().get(&task_id).await.unwrap();
    assert_eq!(task.status, TaskState::Completed);
    let assigned_at = task.assigned_at.unwrap();
    let started_at = task.started_at.unwrap();
    let completed_at = task.completed_at.unwrap();
    assert!(task.created_at <= assigned_at);
    assert!(assigned_at <= started_at);
    assert!(started_at <= completed_at);
    assert_eq!(task.execution_time, Some(0.25));
    assert!(task.assigned_worker.is_none());

    let workers = orchestrator.registry().lock().await;
    let worker = workers.get("worker-1").unwrap();
    assert_eq!(worker.tasks_completed, 1);
    assert!(worker.current_task.is_none());
}

#[tokio::test]
async fn test_at_most_one_task_per_worker() {
    let (orchestrator, _client) = build(2, DispatchMode::Hold);
    let now = Utc::now();
    for priority in 1..=5 {
        orchestrator.submit(request(priority)).await.unwrap();
    }
    mark_online(&orchestrator, &[("worker-1", 0.01), ("worker-2", 0.02)], now).await;

    let assignments = orchestrator.distributor().assign_pending(now).await;
    assert_eq!(assignments.len(), 2);
    assert_ne!(assignments[0].worker_id, assignments[1].worker_id);
    assert!(orchestrator.distributor().assign_pending(now).await.is_empty());

    let table = orchestrator.tasks().lock().await;
    for worker_id in ["worker-1", "worker-2"] {
        assert_eq!(table.held_by(worker_id).len(), 1);
    }
    assert_eq!(table.pending_count(), 3);
}

#[tokio::test]
async fn test_healthy_implies_active() {
    let (orchestrator, _client) = build(3, DispatchMode::Hold);
    let start = Utc::now();
    let script: [&[(&str, bool)]; 6] = [
        &[("worker-1", true), ("worker-2", false), ("worker-3", true)],
        &[("worker-1", false), ("worker-2", true), ("worker-3", true)],
        &[("worker-1", false), ("worker-2", false), ("worker-3", false)],
        &[("worker-1", true), ("worker-2", false), ("worker-3", false)],
        &[("worker-1", true), ("worker-2", false), ("worker-3", false)],
        &[("worker-1", true), ("worker-2", false), ("worker-3", false)],
    ];

    for (round, probes) in script.iter().enumerate() {
        let now = start + Duration::seconds(5 * round as i64);
        let outcomes = probes
            .iter()
            .map(|(worker_id, ok)| {
                if *ok {
                    ProbeOutcome::success(*worker_id, 0.01)
                } else {
                    ProbeOutcome::failure(*worker_id, "timeout")
                }
            })
            .collect();
        orchestrator
            .health_monitor()
            .apply_probe_results(outcomes, now)
            .await;

        let workers = orchestrator.registry().lock().await;
        for worker in workers.workers() {
            if worker.is_healthy(now, workers.policy()) {
                assert_eq!(worker.health, WorkerHealth::Active);
            }
        }
    }

    let workers = orchestrator.registry().lock().await;
    let stale = start + Duration::seconds(5 * 5 + 31);
    assert!(!workers.get("worker-1").unwrap().is_healthy(stale, workers.policy()));
    assert_eq!(workers.get("worker-3").unwrap().health, WorkerHealth::Unstable);
}

#[tokio::test]
async fn test_health_cycle_writes_state_snapshot() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(JsonFileSnapshotSink::new(
        dir.path().join("logs/worker_state.json"),
        dir.path().join("results"),
    ));
    let client = Arc::new(MockWorkerClient::default());
    client.set_reachable(&orchestrator_core::models::WorkerEndpoint::new("127.0.0.1", 5002), false);
    let orchestrator = Orchestrator::new(
        test_config(2),
        client,
        Some(sink.clone() as Arc<dyn SnapshotSink>),
    )
    .unwrap();

    let report = orchestrator.health_monitor().run_cycle().await;
    assert_eq!(report.probed, 2);
    assert_eq!(report.recovered, vec!["worker-1".to_string()]);

    let raw = std::fs::read_to_string(dir.path().join("logs/worker_state.json")).unwrap();
    let state: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(state["workers"]["worker-1"]["status"], "active");
    assert_eq!(state["workers"]["worker-2"]["status"], "unstable");
    assert_eq!(state["stats"]["total_pings"], 2);
    assert_eq!(state["stats"]["workers_discovered"], 1);

    let path = orchestrator.dump_results().await.unwrap().unwrap();
    assert!(path.starts_with(dir.path().join("results")));
}

#[tokio::test]
async fn test_background_loops_complete_submitted_task() {
    let mut config = test_config(1);
    config.health.ping_interval_seconds = 1;
    config.dispatcher.distribution_interval_seconds = 1;
    let client = Arc::new(MockWorkerClient::default());
    let orchestrator = Arc::new(Orchestrator::new(config, client, None).unwrap());
    let task_id = orchestrator.submit(request(1)).await.unwrap();

    let (shutdown_tx, _) = broadcast::channel(1);
    orchestrator.start(&shutdown_tx).await;

    for _ in 0..50 {
        if orchestrator.tasks().get(&task_id).await.unwrap().status == TaskState::Completed {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(100)).await;
    }

    shutdown_tx.send(()).unwrap();
    orchestrator.stop().await;

    let statistics = orchestrator.statistics().await;
    assert_eq!(statistics.task_statistics.completed, 1);
    assert_eq!(statistics.counters.tasks_distributed, 1);
    assert_eq!(statistics.task_completion_rate, 1.0);
}
