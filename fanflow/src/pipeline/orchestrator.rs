//! The orchestrator: drives one triggered run through Init, FanOut and
//! Finalize.
//!
//! Every stage attempt produces a [`StageEvent`]; errors are classified
//! first and only then fed to [`transition`]. The whole drive is bounded by
//! the overall run timeout.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::finalize::{CompletionHandler, CompletionSummary, LoggingCompletionHandler};
use super::retry::{RetryDecision, RetryState};
use super::state::{transition, StageEvent};
use crate::audit::{AuditStore, AuditWriter, InMemoryAuditStore};
use crate::config::PipelineConfig;
use crate::core::{PipelineState, RunResult, WorkItem};
use crate::dedup::{ClaimOutcome, ClaimStore, DedupGuard, DedupRecord, InMemoryClaimStore};
use crate::errors::FanflowError;
use crate::events::{EventSink, NoOpEventSink, PipelineEvent};
use crate::fanout::{FanOutExecutor, NoOpWorker, Worker};
use crate::generator::generate;
use crate::utils::{generate_run_marker, Clock, Period, SystemClock};

/// Summary of one triggered run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    /// The run's marker.
    pub run_marker: Uuid,
    /// The period key the trigger fell into; empty if the offset was invalid.
    pub period_key: String,
    /// The terminal result.
    pub result: RunResult,
    /// Init attempts made.
    pub init_attempts: u32,
    /// Backoff delays applied between Init attempts.
    pub retry_delays_ms: Vec<u64>,
    /// States entered, in order.
    pub states: Vec<PipelineState>,
    /// Items generated and persisted.
    pub items_scheduled: usize,
    /// Items whose worker succeeded.
    pub items_succeeded: usize,
    /// Wall time of the run in milliseconds.
    pub elapsed_ms: f64,
}

impl RunReport {
    /// Returns true for either success result.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_success()
    }
}

enum InitOutcome {
    Ready(Vec<WorkItem>),
    Duplicate,
}

/// Mutable state of a single run.
struct RunContext {
    run_marker: Uuid,
    triggered_at: DateTime<Utc>,
    state: PipelineState,
    states: Vec<PipelineState>,
    retry: RetryState,
    claim: Option<DedupRecord>,
    period: Option<Period>,
    items: Vec<WorkItem>,
    items_scheduled: usize,
    items_succeeded: usize,
    fan_out_ms: f64,
    duplicate: bool,
    cause: Option<String>,
}

impl RunContext {
    fn new(run_marker: Uuid, triggered_at: DateTime<Utc>) -> Self {
        Self {
            run_marker,
            triggered_at,
            state: PipelineState::Init,
            states: vec![PipelineState::Init],
            retry: RetryState::new(),
            claim: None,
            period: None,
            items: Vec::new(),
            items_scheduled: 0,
            items_succeeded: 0,
            fan_out_ms: 0.0,
            duplicate: false,
            cause: None,
        }
    }

    fn fail(&mut self, error: &FanflowError) {
        if self.cause.is_none() {
            self.cause = Some(error.to_string());
        }
    }

    fn result(&self) -> RunResult {
        match self.state {
            PipelineState::Success if self.duplicate => RunResult::SuccessEmpty,
            PipelineState::Success => RunResult::SuccessCompleted,
            _ => RunResult::Failed(
                self.cause
                    .clone()
                    .unwrap_or_else(|| format!("run ended in state '{}'", self.state)),
            ),
        }
    }
}

/// Runs the three-stage pipeline once per trigger.
///
/// Safe to invoke more than once per period: the dedup guard lets exactly
/// one run through and every other ends as [`RunResult::SuccessEmpty`].
#[derive(Debug, Clone)]
pub struct Orchestrator {
    config: Arc<PipelineConfig>,
    guard: DedupGuard,
    audit: AuditWriter,
    clock: Arc<dyn Clock>,
    worker: Arc<dyn Worker>,
    completion: Arc<dyn CompletionHandler>,
    events: Arc<dyn EventSink>,
}

impl Orchestrator {
    /// Starts building an orchestrator for `config`.
    #[must_use]
    pub fn builder(config: PipelineConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    /// The configuration this orchestrator runs with.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Executes one triggered run to a terminal state.
    pub async fn run(&self) -> RunReport {
        let start = Instant::now();
        let mut run = RunContext::new(generate_run_marker(), self.clock.now());
        let period_key = self
            .config
            .offset()
            .map(|offset| Period::containing(run.triggered_at, offset).key())
            .unwrap_or_default();

        info!(
            run_marker = %run.run_marker,
            %period_key,
            table = %self.config.table_name,
            "Pipeline run started"
        );
        self.emit(PipelineEvent::RunStarted {
            run_marker: run.run_marker,
            period_key: period_key.clone(),
        })
        .await;

        let run_timeout = self.config.timeouts.run();
        let timed_out = tokio::time::timeout(run_timeout, self.drive(&mut run))
            .await
            .is_err();
        if timed_out {
            let error = FanflowError::timeout(run.state, run_timeout);
            warn!(run_marker = %run.run_marker, error = %error, "Pipeline run timed out");
            run.fail(&error);
            self.advance(&mut run, StageEvent::RunTimedOut).await;
        }

        let result = run.result();
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        match &result {
            RunResult::Failed(cause) => {
                error!(run_marker = %run.run_marker, %cause, "Pipeline run failed");
            }
            _ => info!(run_marker = %run.run_marker, %result, elapsed_ms, "Pipeline run succeeded"),
        }
        self.emit(PipelineEvent::RunCompleted {
            run_marker: run.run_marker,
            result: result.clone(),
            init_attempts: run.retry.attempts(),
            elapsed_ms,
        })
        .await;

        RunReport {
            run_marker: run.run_marker,
            period_key,
            result,
            init_attempts: run.retry.attempts(),
            retry_delays_ms: run
                .retry
                .delays()
                .iter()
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
                .collect(),
            states: run.states,
            items_scheduled: run.items_scheduled,
            items_succeeded: run.items_succeeded,
            elapsed_ms,
        }
    }

    async fn drive(&self, run: &mut RunContext) {
        while !run.state.is_terminal() {
            let event = match run.state {
                PipelineState::Init => self.init_stage(run).await,
                PipelineState::FanOut => self.fan_out_stage(run).await,
                PipelineState::Finalize => self.finalize_stage(run).await,
                PipelineState::Success | PipelineState::Failed => break,
            };
            self.advance(run, event).await;
        }
    }

    async fn advance(&self, run: &mut RunContext, event: StageEvent) {
        match transition(run.state, event) {
            Ok(next) => {
                debug!(run_marker = %run.run_marker, from = %run.state, to = %next, %event, "State transition");
                run.state = next;
                run.states.push(next);
                self.emit(PipelineEvent::StateEntered {
                    run_marker: run.run_marker,
                    state: next,
                })
                .await;
            }
            Err(invalid) => {
                error!(run_marker = %run.run_marker, error = %invalid, "Rejected state transition");
                run.fail(&FanflowError::from(invalid));
                run.state = PipelineState::Failed;
                run.states.push(PipelineState::Failed);
            }
        }
    }

    async fn init_stage(&self, run: &mut RunContext) -> StageEvent {
        let timeout = self.config.timeouts.init();
        let attempt = run.retry.attempts();
        let outcome = match tokio::time::timeout(timeout, self.init_once(run)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(FanflowError::timeout(PipelineState::Init, timeout)),
        };

        let error = match outcome {
            Ok(InitOutcome::Ready(items)) => {
                run.items_scheduled = items.len();
                run.items = items;
                return StageEvent::InitSucceeded;
            }
            Ok(InitOutcome::Duplicate) => {
                run.duplicate = true;
                self.emit(PipelineEvent::ClaimSkipped {
                    run_marker: run.run_marker,
                    period_key: run.period.map(|p| p.key()).unwrap_or_default(),
                })
                .await;
                return StageEvent::AlreadyClaimed;
            }
            Err(error) => error,
        };

        match run.retry.decide(&self.config.init_retry, error.class()) {
            RetryDecision::Retry(delay) => {
                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                warn!(
                    run_marker = %run.run_marker,
                    attempt,
                    delay_ms,
                    error = %error,
                    "Init attempt failed, retrying"
                );
                self.emit(PipelineEvent::InitRetryScheduled {
                    run_marker: run.run_marker,
                    attempt,
                    delay_ms,
                    error: error.to_dict(),
                })
                .await;
                tokio::time::sleep(delay).await;
                StageEvent::InitRetry
            }
            RetryDecision::GiveUp => {
                warn!(run_marker = %run.run_marker, attempt, error = %error, "Init retries exhausted");
                run.fail(&error);
                StageEvent::InitFailed
            }
            RetryDecision::NotRetryable => {
                run.fail(&error);
                StageEvent::InitFailed
            }
        }
    }

    /// One Init attempt: claim, generate, persist.
    ///
    /// Claims are owned by the run marker, so a retry never sees its own
    /// claim as a duplicate, even when an earlier attempt timed out after the
    /// store committed it. The audit batch is likewise safe to replay.
    async fn init_once(&self, run: &mut RunContext) -> Result<InitOutcome, FanflowError> {
        self.config.validate()?;
        let offset = self.config.offset()?;
        let period = Period::containing(run.triggered_at, offset);
        run.period = Some(period);

        let claim = match &run.claim {
            Some(claim) => claim.clone(),
            None => match self
                .guard
                .try_claim(&period.key(), run.run_marker, self.config.record_ttl())
                .await
            {
                ClaimOutcome::Claimed(record) => {
                    run.claim = Some(record.clone());
                    record
                }
                ClaimOutcome::AlreadyClaimed(_) => return Ok(InitOutcome::Duplicate),
                ClaimOutcome::StoreError(error) => return Err(error.into()),
            },
        };

        let items = generate(run.triggered_at.with_timezone(&offset), self.config.fan_out_width);
        self.audit
            .persist_all(run.run_marker, &items, claim.expires_at)
            .await?;
        Ok(InitOutcome::Ready(items))
    }

    async fn fan_out_stage(&self, run: &mut RunContext) -> StageEvent {
        let executor = FanOutExecutor::new(self.config.concurrency_limit, self.config.timeouts.item())
            .with_policy(self.config.completion_policy);
        let items = std::mem::take(&mut run.items);
        let report = executor.run(items, self.worker.clone()).await;

        run.items_succeeded = report.succeeded();
        run.fan_out_ms = report.duration_ms;
        self.emit(PipelineEvent::FanOutCompleted {
            run_marker: run.run_marker,
            succeeded: report.succeeded(),
            failed: report.failed(),
            not_started: report.not_started(),
            aborted: report.aborted(),
            peak_in_flight: report.peak_in_flight,
        })
        .await;

        match report.first_error {
            Some(error) => {
                run.fail(&FanflowError::from(error));
                StageEvent::FanOutFailed
            }
            None => StageEvent::FanOutSucceeded,
        }
    }

    async fn finalize_stage(&self, run: &mut RunContext) -> StageEvent {
        let (period_key, time_key) = run
            .period
            .map(|p| (p.key(), p.time_key()))
            .unwrap_or_default();
        let summary = CompletionSummary {
            run_marker: run.run_marker,
            period_key,
            time_key,
            item_count: run.items_scheduled,
            fan_out_ms: run.fan_out_ms,
        };

        let timeout = self.config.timeouts.finalize();
        let outcome = match tokio::time::timeout(timeout, self.completion.complete(&summary)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(FanflowError::timeout(PipelineState::Finalize, timeout)),
        };

        match outcome {
            Ok(()) => StageEvent::FinalizeSucceeded,
            Err(error) => {
                run.fail(&error);
                StageEvent::FinalizeFailed
            }
        }
    }

    async fn emit(&self, event: PipelineEvent) {
        self.events.emit(&event).await;
    }
}

/// Builder for [`Orchestrator`].
///
/// Anything not set falls back to in-memory stores, the system clock, a
/// worker that accepts every item and a logging completion handler.
#[derive(Debug)]
pub struct OrchestratorBuilder {
    config: PipelineConfig,
    claim_store: Option<Arc<dyn ClaimStore>>,
    audit_store: Option<Arc<dyn AuditStore>>,
    clock: Option<Arc<dyn Clock>>,
    worker: Option<Arc<dyn Worker>>,
    completion: Option<Arc<dyn CompletionHandler>>,
    events: Option<Arc<dyn EventSink>>,
}

impl OrchestratorBuilder {
    /// Creates a builder for `config`.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            claim_store: None,
            audit_store: None,
            clock: None,
            worker: None,
            completion: None,
            events: None,
        }
    }

    /// Sets the claim store.
    #[must_use]
    pub fn claim_store(mut self, store: Arc<dyn ClaimStore>) -> Self {
        self.claim_store = Some(store);
        self
    }

    /// Sets the audit store.
    #[must_use]
    pub fn audit_store(mut self, store: Arc<dyn AuditStore>) -> Self {
        self.audit_store = Some(store);
        self
    }

    /// Sets the clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the per-item worker.
    #[must_use]
    pub fn worker(mut self, worker: Arc<dyn Worker>) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Sets the completion handler.
    #[must_use]
    pub fn completion_handler(mut self, handler: Arc<dyn CompletionHandler>) -> Self {
        self.completion = Some(handler);
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    /// Builds the orchestrator.
    ///
    /// The configuration is not validated here; an invalid configuration
    /// fails the run's Init stage without retry.
    #[must_use]
    pub fn build(self) -> Orchestrator {
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let claim_store = self
            .claim_store
            .unwrap_or_else(|| Arc::new(InMemoryClaimStore::new(clock.clone())));
        let audit_store = self
            .audit_store
            .unwrap_or_else(|| Arc::new(InMemoryAuditStore::new()));

        Orchestrator {
            config: Arc::new(self.config),
            guard: DedupGuard::new(claim_store, clock.clone()),
            audit: AuditWriter::new(audit_store),
            clock,
            worker: self.worker.unwrap_or_else(|| Arc::new(NoOpWorker)),
            completion: self
                .completion
                .unwrap_or_else(|| Arc::new(LoggingCompletionHandler)),
            events: self.events.unwrap_or_else(|| Arc::new(NoOpEventSink)),
        }
    }
}
