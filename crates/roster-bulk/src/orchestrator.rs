//! Bulk orchestrator: chunked, bounded-concurrency batch execution
//!
//! # Concurrency Model
//!
//! ```text
//! targets ──► dedupe ──► chunks ──► Semaphore (max_concurrent_chunks)
//!                                        │
//!                                   JoinSet tasks ──► ConnectionManager (serialized)
//!                                        │
//!                        merge per chunk ◄┘ ──► audit progress + notification
//! ```
//!
//! Results are merged by the orchestrating task only, one chunk at a time.
//! A chunk's semaphore slot is released when its result is merged, not when
//! its task ends, so a freed slot is never observed before the outcome that
//! freed it.
//! A connection-layer failure, an open circuit or a panicking chunk aborts
//! the batch: nothing further is dispatched, in-flight chunks finish and are
//! merged, and every unaccounted target is marked failed.

use crate::config::BulkConfig;
use crate::error::BulkError;
use crate::job::{BatchJob, BatchStatus, ItemResult};
use crate::operations::{BulkOperation, ChunkOutcome};
use futures::FutureExt;
use roster_connect::{ConnectError, ConnectionManager};
use roster_core_audit::{AuditTrail, OperationId, OperationStatus};
use roster_core_interface::{Notification, Notifier};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const CANCELLED_REASON: &str = "Cancelled before dispatch";

type ChunkResult = Result<Result<ChunkOutcome, ConnectError>, String>;
type JoinedChunk = Result<(Id, (usize, ChunkResult)), JoinError>;

/// Runs [`BulkOperation`]s over target lists
///
/// # Example
///
/// ```no_run
/// use roster_bulk::{AddMembers, BulkConfig, BulkOrchestrator, MemberRole};
/// use roster_connect::ConnectionManager;
/// use std::sync::Arc;
///
/// # async fn example(connection: Arc<ConnectionManager>) -> anyhow::Result<()> {
/// let orchestrator = BulkOrchestrator::new(connection, BulkConfig::default())?;
/// let op = AddMembers::new("team-42", MemberRole::Member)?;
///
/// let job = orchestrator
///     .run(Arc::new(op), vec!["alice@school.edu".into(), "bob@school.edu".into()])
///     .await;
/// println!("{}: {}", job.status, job.summary());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BulkOrchestrator {
    connection: Arc<ConnectionManager>,
    config: BulkConfig,
    audit: AuditTrail,
    notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for BulkOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkOrchestrator")
            .field("config", &self.config)
            .field("audit", &self.audit)
            .finish()
    }
}

/// Mutable state of one run, owned by the orchestrating task
struct RunState {
    job: BatchJob,
    audit_id: Option<OperationId>,
    abort_detail: Option<String>,
}

impl BulkOrchestrator {
    /// Create an orchestrator sharing the connection's audit trail and notifier
    pub fn new(connection: Arc<ConnectionManager>, config: BulkConfig) -> Result<Self, BulkError> {
        config.validate()?;
        let audit = connection.audit().clone();
        let notifier = connection.notifier().clone();
        Ok(Self {
            connection,
            config,
            audit,
            notifier,
        })
    }

    pub fn with_audit(mut self, audit: AuditTrail) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &BulkConfig {
        &self.config
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    /// Run `op` over `items` to completion
    pub async fn run(&self, op: Arc<dyn BulkOperation>, items: Vec<String>) -> BatchJob {
        self.run_with_cancel(op, items, CancellationToken::new()).await
    }

    /// Run `op` over `items`, stopping dispatch when `cancel` fires
    ///
    /// Chunks already dispatched run to completion and are merged.
    pub async fn run_with_cancel(
        &self,
        op: Arc<dyn BulkOperation>,
        items: Vec<String>,
        cancel: CancellationToken,
    ) -> BatchJob {
        let items = dedupe(op.as_ref(), items);
        let total = items.len();

        if total == 0 {
            let mut job = BatchJob::new(OperationId::generate(), op.operation_type(), 0);
            job.finalize();
            debug!(operation = %op.operation_type(), "Empty batch, nothing to do");
            return job;
        }

        let audit_id = self
            .audit
            .begin(
                op.operation_type(),
                op.target_type(),
                &op.target_id(),
                &op.describe(total),
            )
            .await;
        let operation_id = audit_id.clone().unwrap_or_else(OperationId::generate);

        let mut state = RunState {
            job: BatchJob::new(operation_id, op.operation_type(), total),
            audit_id,
            abort_detail: None,
        };
        state.job.start();
        self.audit
            .status(
                state.audit_id.as_ref(),
                OperationStatus::InProgress,
                "Started",
                None,
            )
            .await;

        info!(
            operation = %op.operation_type(),
            operation_id = %state.job.operation_id,
            total,
            chunks = self.config.chunk_count(total),
            "Starting bulk operation"
        );

        let cancelled = self.dispatch(&op, &items, &cancel, &mut state).await;

        if let Some(detail) = state.abort_detail.clone() {
            state.job.abort(detail.as_str());
            state
                .job
                .fail_unaccounted(&items, &format!("Batch aborted: {}", detail));
        } else if cancelled {
            state.job.mark_cancelled();
            state.job.fail_unaccounted(&items, CANCELLED_REASON);
        }
        let status = state.job.finalize();

        let cache = self.connection.cache();
        for scope in op.affected_scopes(&items) {
            cache.invalidate_group(&scope);
        }

        let summary = state.job.summary();
        self.audit
            .status(
                state.audit_id.as_ref(),
                status.into(),
                &summary,
                state.job.error_detail.as_deref(),
            )
            .await;
        self.notifier.notify(Notification::BatchFinished {
            operation_id: state.job.operation_id.to_string(),
            status: status.to_string(),
            message: summary.clone(),
        });

        match status {
            BatchStatus::Completed => {
                info!(operation_id = %state.job.operation_id, %summary, "Bulk operation completed")
            }
            _ => warn!(
                operation_id = %state.job.operation_id,
                status = %status,
                aborted = state.job.aborted,
                cancelled = state.job.cancelled,
                %summary,
                "Bulk operation finished with failures"
            ),
        }

        state.job
    }

    /// Dispatch chunks until done, aborted or cancelled; returns whether
    /// dispatch stopped because of cancellation
    async fn dispatch(
        &self,
        op: &Arc<dyn BulkOperation>,
        items: &[String],
        cancel: &CancellationToken,
        state: &mut RunState,
    ) -> bool {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_chunks));
        let mut tasks: JoinSet<(usize, ChunkResult)> = JoinSet::new();
        let mut permits: HashMap<Id, OwnedSemaphorePermit> = HashMap::new();
        let mut cancelled = false;

        'dispatch: for (index, chunk) in items.chunks(self.config.chunk_size).enumerate() {
            if index > 0 && !self.config.inter_chunk_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        cancelled = true;
                        break;
                    }
                    _ = tokio::time::sleep(self.config.inter_chunk_delay) => {}
                }
            }

            // Merge whatever finished meanwhile; slots free up only through a merge
            while let Some(joined) = tasks.try_join_next_with_id() {
                self.settle(joined, &mut permits, items, state).await;
            }

            let permit = loop {
                if state.abort_detail.is_some() {
                    break 'dispatch;
                }
                match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => break permit,
                    Err(TryAcquireError::Closed) => {
                        error!("Chunk semaphore closed");
                        state
                            .abort_detail
                            .get_or_insert_with(|| "Chunk semaphore closed".to_string());
                        break 'dispatch;
                    }
                    Err(TryAcquireError::NoPermits) => {}
                }
                tokio::select! {
                    _ = cancel.cancelled() => {
                        cancelled = true;
                        break 'dispatch;
                    }
                    Some(joined) = tasks.join_next_with_id() => {
                        self.settle(joined, &mut permits, items, state).await;
                    }
                }
            };
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            debug!(chunk = index + 1, size = chunk.len(), "Dispatching chunk");
            let op = op.clone();
            let connection = self.connection.clone();
            let chunk = chunk.to_vec();
            let handle = tasks.spawn(async move {
                let result = AssertUnwindSafe(op.run_chunk(&connection, &chunk))
                    .catch_unwind()
                    .await
                    .map_err(panic_message);
                (index, result)
            });
            permits.insert(handle.id(), permit);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            self.settle(joined, &mut permits, items, state).await;
        }

        cancelled
    }

    /// Merge a joined chunk, then release its slot
    async fn settle(
        &self,
        joined: JoinedChunk,
        permits: &mut HashMap<Id, OwnedSemaphorePermit>,
        items: &[String],
        state: &mut RunState,
    ) {
        let id = match &joined {
            Ok((id, _)) => *id,
            Err(e) => e.id(),
        };
        self.merge(joined.map(|(_, chunk)| chunk), items, state).await;
        permits.remove(&id);
    }

    /// Fold one finished chunk into the job and report progress
    async fn merge(
        &self,
        joined: Result<(usize, ChunkResult), JoinError>,
        items: &[String],
        state: &mut RunState,
    ) {
        match joined {
            Ok((index, Ok(Ok(outcome)))) => {
                let chunk = index + 1;
                if let Some(detail) = &outcome.command_error {
                    warn!(chunk, error = %detail, "Chunk command failed");
                    self.audit
                        .status(
                            state.audit_id.as_ref(),
                            OperationStatus::InProgress,
                            &format!("Chunk {} failed", chunk),
                            Some(detail.as_str()),
                        )
                        .await;
                }
                let succeeded = outcome.succeeded_count();
                let mut results = outcome.results;
                // Targets the operation forgot to report count as failed
                let reported: HashSet<&str> = results.iter().map(|r| r.key.as_str()).collect();
                let missing: Vec<String> = chunk_items(items, index, self.config.chunk_size)
                    .iter()
                    .filter(|key| !reported.contains(key.as_str()))
                    .cloned()
                    .collect();
                results.extend(
                    missing
                        .into_iter()
                        .map(|key| ItemResult::failure(key, "No result reported")),
                );
                state.job.merge_chunk(results);
                debug!(chunk, succeeded, "Chunk merged");
            }
            Ok((index, Ok(Err(e)))) => {
                error!(
                    chunk = index + 1,
                    error = %e,
                    category = e.category(),
                    "Chunk aborted the batch"
                );
                state.abort_detail.get_or_insert_with(|| e.to_string());
            }
            Ok((index, Err(panic))) => {
                error!(chunk = index + 1, panic = %panic, "Chunk task panicked");
                state
                    .abort_detail
                    .get_or_insert_with(|| format!("Chunk task panicked: {}", panic));
            }
            Err(e) => {
                error!(error = %e, "Chunk task failed to join");
                state.abort_detail.get_or_insert_with(|| e.to_string());
            }
        }

        let job = &state.job;
        self.audit
            .progress(
                state.audit_id.as_ref(),
                job.processed_items,
                job.failed_items,
                job.total_items,
            )
            .await;
        self.notifier.notify(Notification::BatchProgress {
            operation_id: job.operation_id.to_string(),
            processed: job.processed_items,
            failed: job.failed_items,
            total: job.total_items,
        });
    }
}

/// Normalize and drop empty and duplicate targets, keeping first occurrence order
fn dedupe(op: &dyn BulkOperation, items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .iter()
        .map(|item| op.normalize(item))
        .filter(|item| !item.is_empty() && seen.insert(item.clone()))
        .collect()
}

fn chunk_items(items: &[String], index: usize, chunk_size: usize) -> &[String] {
    let start = (index * chunk_size).min(items.len());
    let end = (start + chunk_size).min(items.len());
    &items[start..end]
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
