//! End-to-end tests for orchestrated runs.

use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

use crate::audit::{FileAuditStore, InMemoryAuditStore};
use crate::config::{PipelineConfig, StageTimeouts};
use crate::core::{PipelineState, RunResult};
use crate::dedup::{FileClaimStore, InMemoryClaimStore};
use crate::events::CollectingEventSink;
use crate::pipeline::{Orchestrator, OrchestratorBuilder};
use crate::testing::{
    FailingCompletionHandler, FailingWorker, FlakyAuditStore, FlakyClaimStore,
    RecordingCompletionHandler, RecordingWorker,
};
use crate::utils::FixedClock;

use PipelineState::{Failed, FanOut, Finalize, Init, Success};

/// 2024-01-01 00:00 UTC, which is 09:00 on 2024/01/01 at UTC+9.
fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    ))
}

fn config() -> PipelineConfig {
    PipelineConfig::new("fanflow-test")
}

struct Harness {
    clock: Arc<FixedClock>,
    claims: Arc<InMemoryClaimStore>,
    audit: Arc<InMemoryAuditStore>,
    worker: Arc<RecordingWorker>,
    completion: Arc<RecordingCompletionHandler>,
}

impl Harness {
    fn new() -> Self {
        let clock = clock();
        Self {
            claims: Arc::new(InMemoryClaimStore::new(clock.clone())),
            audit: Arc::new(InMemoryAuditStore::new()),
            worker: Arc::new(RecordingWorker::new()),
            completion: Arc::new(RecordingCompletionHandler::new()),
            clock,
        }
    }

    fn builder(&self, config: PipelineConfig) -> OrchestratorBuilder {
        Orchestrator::builder(config)
            .clock(self.clock.clone())
            .claim_store(self.claims.clone())
            .audit_store(self.audit.clone())
            .worker(self.worker.clone())
            .completion_handler(self.completion.clone())
    }

    fn orchestrator(&self) -> Orchestrator {
        self.builder(config()).build()
    }
}

#[tokio::test]
async fn test_fresh_period_runs_to_completion() {
    let harness = Harness::new();
    let worker = Arc::new(RecordingWorker::with_delay(Duration::from_millis(1)));
    let orchestrator = harness.builder(config()).worker(worker.clone()).build();

    let report = orchestrator.run().await;

    assert_eq!(report.result, RunResult::SuccessCompleted);
    assert_eq!(report.states, vec![Init, FanOut, Finalize, Success]);
    assert_eq!(report.period_key, "period#2024-01-01");
    assert_eq!(report.init_attempts, 1);
    assert_eq!(report.items_scheduled, 100);
    assert_eq!(report.items_succeeded, 100);

    let mut calls = worker.calls();
    assert!(calls.iter().all(|item| item.time_key == "2024/01/01"));
    calls.sort_by_key(|item| item.sequence_index);
    let indices: Vec<u32> = calls.iter().map(|item| item.sequence_index).collect();
    assert_eq!(indices, (0..100).collect::<Vec<_>>());
    assert!(worker.peak_in_flight() <= 2);

    assert_eq!(harness.audit.records_for_run(report.run_marker).len(), 100);

    let summaries = harness.completion.summaries();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].item_count, 100);
    assert_eq!(summaries[0].time_key, "2024/01/01");
}

#[tokio::test]
async fn test_second_trigger_in_period_is_empty_success() {
    let harness = Harness::new();
    let orchestrator = harness.orchestrator();

    let first = orchestrator.run().await;
    assert_eq!(first.result, RunResult::SuccessCompleted);

    harness.clock.advance(chrono::Duration::minutes(1));
    let second = orchestrator.run().await;

    assert_eq!(second.result, RunResult::SuccessEmpty);
    assert_eq!(second.states, vec![Init, Success]);
    assert_eq!(second.items_scheduled, 0);
    assert_eq!(harness.worker.call_count(), 100);
    assert!(harness.audit.records_for_run(second.run_marker).is_empty());
    assert_eq!(harness.completion.summaries().len(), 1);
}

#[tokio::test]
async fn test_worker_error_fails_run() {
    let harness = Harness::new();
    let worker = Arc::new(FailingWorker::on_index(10));
    let orchestrator = harness.builder(config()).worker(worker).build();

    let report = orchestrator.run().await;

    let cause = report.result.cause().unwrap();
    assert!(cause.contains("Dummy Error!"), "cause: {cause}");
    assert!(cause.contains("2024/01/01: 10"), "cause: {cause}");
    assert_eq!(report.states, vec![Init, FanOut, Failed]);
    assert!(report.items_succeeded < 100);
    assert!(harness.completion.summaries().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_triggers_start_one_run() {
    let harness = Harness::new();
    let orchestrator = harness.orchestrator();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.run().await })
        })
        .collect();

    let mut completed = 0;
    let mut empty = 0;
    for handle in handles {
        match handle.await.unwrap().result {
            RunResult::SuccessCompleted => completed += 1,
            RunResult::SuccessEmpty => empty += 1,
            RunResult::Failed(cause) => panic!("unexpected failure: {cause}"),
        }
    }

    assert_eq!(completed, 1);
    assert_eq!(empty, 7);
    assert_eq!(harness.worker.call_count(), 100);
    assert_eq!(harness.claims.len(), 1);
    assert_eq!(harness.audit.len(), 100);
}

#[tokio::test]
async fn test_file_stores_dedup_across_orchestrators() {
    let dir = tempfile::TempDir::new().unwrap();
    let clock = clock();
    let table_dir = dir.path().join("fanflow-test");

    // Each orchestrator opens its own stores, as separate CLI invocations do
    let invoke = || {
        let worker = Arc::new(RecordingWorker::new());
        let orchestrator = Orchestrator::builder(config())
            .clock(clock.clone())
            .claim_store(Arc::new(FileClaimStore::open(&table_dir, clock.clone()).unwrap()))
            .audit_store(Arc::new(FileAuditStore::open(&table_dir, clock.clone()).unwrap()))
            .worker(worker.clone())
            .build();
        (orchestrator, worker)
    };

    let (first, first_worker) = invoke();
    let report = first.run().await;
    assert_eq!(report.result, RunResult::SuccessCompleted);
    assert_eq!(first_worker.call_count(), 100);

    let (second, second_worker) = invoke();
    let repeat = second.run().await;
    assert_eq!(repeat.result, RunResult::SuccessEmpty);
    assert_eq!(second_worker.call_count(), 0);

    let audit = FileAuditStore::open(&table_dir, clock.clone()).unwrap();
    assert_eq!(audit.records_for_run(report.run_marker).unwrap().len(), 100);
    assert!(audit.records_for_run(repeat.run_marker).unwrap().is_empty());
}

#[tokio::test]
async fn test_next_period_is_claimable() {
    let harness = Harness::new();
    let orchestrator = harness.orchestrator();

    assert_eq!(orchestrator.run().await.result, RunResult::SuccessCompleted);

    harness.clock.advance(chrono::Duration::days(1));
    let next = orchestrator.run().await;

    assert_eq!(next.result, RunResult::SuccessCompleted);
    assert_eq!(next.period_key, "period#2024-01-02");
    assert_eq!(harness.claims.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_init_retries_exhausted() {
    let harness = Harness::new();
    let claims = Arc::new(FlakyClaimStore::always_failing(harness.clock.clone()));
    let orchestrator = harness.builder(config()).claim_store(claims.clone()).build();

    let report = orchestrator.run().await;

    assert!(!report.is_success());
    assert!(report.result.cause().unwrap().contains("unavailable"));
    assert_eq!(report.init_attempts, 4);
    assert_eq!(claims.calls(), 4);
    assert_eq!(report.retry_delays_ms, vec![2000, 4000, 8000]);
    assert!(report.retry_delays_ms.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(report.states, vec![Init, Init, Init, Init, Failed]);
    assert_eq!(harness.worker.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_init_success_stops_retrying() {
    let harness = Harness::new();
    let claims = Arc::new(FlakyClaimStore::failing_first(1, harness.clock.clone()));
    let orchestrator = harness.builder(config()).claim_store(claims.clone()).build();

    let report = orchestrator.run().await;

    assert_eq!(report.result, RunResult::SuccessCompleted);
    assert_eq!(report.init_attempts, 2);
    assert_eq!(report.retry_delays_ms, vec![2000]);
    assert_eq!(claims.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_audit_retry_reuses_claim() {
    let harness = Harness::new();
    let audit = Arc::new(FlakyAuditStore::failing_first(1));
    let orchestrator = harness.builder(config()).audit_store(audit.clone()).build();

    let report = orchestrator.run().await;

    assert_eq!(report.result, RunResult::SuccessCompleted);
    assert_eq!(report.init_attempts, 2);
    assert_eq!(audit.calls(), 2);
    assert_eq!(audit.inner().records_for_run(report.run_marker).len(), 100);
    assert_eq!(harness.claims.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_init_timeout_after_claim_commit_keeps_the_period() {
    let harness = Harness::new();
    let sink = Arc::new(CollectingEventSink::new());
    let claims = Arc::new(FlakyClaimStore::stalling_first(
        1,
        Duration::from_secs(30),
        harness.clock.clone(),
    ));
    let orchestrator = harness
        .builder(config())
        .claim_store(claims.clone())
        .event_sink(sink.clone())
        .build();

    let report = orchestrator.run().await;

    assert_eq!(report.result, RunResult::SuccessCompleted);
    assert_eq!(report.init_attempts, 2);
    assert_eq!(report.retry_delays_ms, vec![2000]);
    assert_eq!(report.states, vec![Init, Init, FanOut, Finalize, Success]);
    assert_eq!(claims.calls(), 2);
    assert_eq!(claims.inner().len(), 1);
    assert_eq!(
        claims.inner().get("period#2024-01-01").map(|r| r.owner),
        Some(report.run_marker)
    );
    assert_eq!(harness.worker.call_count(), 100);

    let retries = sink.events_of_type("stage.init.retry_scheduled");
    assert_eq!(retries.len(), 1);
    let payload = retries[0].to_json();
    assert_eq!(payload["error"]["type"], "TimeoutError");
    assert_eq!(payload["error"]["message"], "Stage 'init' timed out after 10000ms");

    // The claim still blocks every other run in the period
    let second = orchestrator.run().await;
    assert_eq!(second.result, RunResult::SuccessEmpty);
}

#[tokio::test(start_paused = true)]
async fn test_init_timeout_after_audit_commit_is_replayed() {
    let harness = Harness::new();
    let audit = Arc::new(FlakyAuditStore::stalling_first(1, Duration::from_secs(30)));
    let orchestrator = harness.builder(config()).audit_store(audit.clone()).build();

    let report = orchestrator.run().await;

    assert_eq!(report.result, RunResult::SuccessCompleted);
    assert_eq!(report.init_attempts, 2);
    assert_eq!(report.retry_delays_ms, vec![2000]);
    assert_eq!(audit.calls(), 2);
    assert_eq!(audit.inner().len(), 100);
    assert_eq!(audit.inner().records_for_run(report.run_marker).len(), 100);
    assert_eq!(harness.worker.call_count(), 100);
}

#[tokio::test(start_paused = true)]
async fn test_init_timeouts_are_retried_until_exhausted() {
    let harness = Harness::new();
    let claims = Arc::new(FlakyClaimStore::stalling_first(
        u32::MAX,
        Duration::from_secs(60),
        harness.clock.clone(),
    ));
    let timeouts = StageTimeouts {
        init_ms: 1_000,
        ..StageTimeouts::default()
    };
    let orchestrator = harness
        .builder(config().with_timeouts(timeouts))
        .claim_store(claims.clone())
        .build();

    let report = orchestrator.run().await;

    assert_eq!(
        report.result,
        RunResult::Failed("Stage 'init' timed out after 1000ms".to_string())
    );
    assert_eq!(report.init_attempts, 4);
    assert_eq!(report.retry_delays_ms, vec![2000, 4000, 8000]);
    assert_eq!(report.states, vec![Init, Init, Init, Init, Failed]);
    assert_eq!(claims.calls(), 4);
    assert_eq!(harness.worker.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_audit_fault_leaves_no_records() {
    let harness = Harness::new();
    harness.audit.fail_at_record(57);
    let orchestrator = harness.orchestrator();

    let report = orchestrator.run().await;

    assert!(!report.is_success());
    assert!(report.result.cause().unwrap().contains("cancelled"));
    assert_eq!(report.init_attempts, 4);
    assert!(harness.audit.is_empty());
    assert_eq!(harness.worker.call_count(), 0);
}

#[tokio::test]
async fn test_configuration_error_is_not_retried() {
    let harness = Harness::new();
    let orchestrator = harness.builder(PipelineConfig::new("")).build();

    let report = orchestrator.run().await;

    assert!(report.result.cause().unwrap().contains("table_name"));
    assert_eq!(report.init_attempts, 1);
    assert!(report.retry_delays_ms.is_empty());
    assert_eq!(report.states, vec![Init, Failed]);
    assert!(harness.claims.is_empty());
}

#[tokio::test]
async fn test_finalize_error_fails_run() {
    let harness = Harness::new();
    let orchestrator = harness
        .builder(config())
        .completion_handler(Arc::new(FailingCompletionHandler::new("notify failed")))
        .build();

    let report = orchestrator.run().await;

    assert_eq!(
        report.result,
        RunResult::Failed("Finalize failed: notify failed".to_string())
    );
    assert_eq!(report.states, vec![Init, FanOut, Finalize, Failed]);
    assert_eq!(report.items_succeeded, 100);
}

#[tokio::test(start_paused = true)]
async fn test_finalize_timeout_fails_run() {
    let harness = Harness::new();
    let orchestrator = harness
        .builder(config())
        .completion_handler(Arc::new(RecordingCompletionHandler::with_delay(
            Duration::from_secs(60),
        )))
        .build();

    let report = orchestrator.run().await;

    assert_eq!(
        report.result,
        RunResult::Failed("Stage 'finalize' timed out after 10000ms".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn test_run_timeout_fails_run() {
    let harness = Harness::new();
    let timeouts = StageTimeouts {
        run_ms: 1_000,
        ..StageTimeouts::default()
    };
    let orchestrator = harness
        .builder(config().with_timeouts(timeouts))
        .worker(Arc::new(RecordingWorker::with_delay(Duration::from_secs(5))))
        .build();

    let report = orchestrator.run().await;

    assert_eq!(
        report.result,
        RunResult::Failed("Stage 'fan_out' timed out after 1000ms".to_string())
    );
    assert_eq!(report.states, vec![Init, FanOut, Failed]);
}

#[tokio::test]
async fn test_lifecycle_events() {
    let harness = Harness::new();
    let sink = Arc::new(CollectingEventSink::new());
    let orchestrator = harness.builder(config()).event_sink(sink.clone()).build();

    let report = orchestrator.run().await;
    assert!(report.is_success());

    let types = sink.event_types();
    assert_eq!(types.first(), Some(&"pipeline.started"));
    assert_eq!(types.last(), Some(&"pipeline.completed"));
    assert_eq!(sink.events_of_type("stage.entered").len(), 3);
    assert_eq!(sink.events_of_type("stage.fan_out.completed").len(), 1);
    assert!(sink
        .events()
        .iter()
        .all(|event| event.run_marker() == report.run_marker));
}

#[tokio::test(start_paused = true)]
async fn test_retry_events() {
    let harness = Harness::new();
    let sink = Arc::new(CollectingEventSink::new());
    let claims = Arc::new(FlakyClaimStore::failing_first(2, harness.clock.clone()));
    let orchestrator = harness
        .builder(config())
        .claim_store(claims)
        .event_sink(sink.clone())
        .build();

    let report = orchestrator.run().await;

    assert!(report.is_success());
    let retries = sink.events_of_type("stage.init.retry_scheduled");
    assert_eq!(retries.len(), 2);
    let payload = retries[0].to_json();
    assert_eq!(payload["attempt"], 1);
    assert_eq!(payload["error"]["type"], "StoreError");
    assert_eq!(payload["error"]["class"], "transient");
}
