//! Batch job accounting
//!
//! A [`BatchJob`] is owned by the orchestrator invocation that created it.
//! Chunk results are merged one chunk at a time; an item is counted at most
//! once, so `processed_items + failed_items <= total_items` always holds.

use chrono::{DateTime, Utc};
use roster_core_audit::{OperationId, OperationStatus, OperationType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle status of a batch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    PartialSuccess,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "Pending",
            BatchStatus::InProgress => "InProgress",
            BatchStatus::Completed => "Completed",
            BatchStatus::Failed => "Failed",
            BatchStatus::PartialSuccess => "PartialSuccess",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::PartialSuccess
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<BatchStatus> for OperationStatus {
    fn from(status: BatchStatus) -> Self {
        match status {
            BatchStatus::Pending => OperationStatus::Pending,
            BatchStatus::InProgress => OperationStatus::InProgress,
            BatchStatus::Completed => OperationStatus::Completed,
            BatchStatus::Failed => OperationStatus::Failed,
            BatchStatus::PartialSuccess => OperationStatus::PartialSuccess,
        }
    }
}

/// Outcome for a single target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResult {
    pub key: String,
    /// `None` on success
    pub error: Option<String>,
}

impl ItemResult {
    pub fn success(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            error: None,
        }
    }

    pub fn failure(key: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Accounting for one bulk invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub operation_id: OperationId,
    pub operation_type: OperationType,
    pub total_items: usize,
    /// Items that succeeded
    pub processed_items: usize,
    pub failed_items: usize,
    pub status: BatchStatus,
    /// Per-target outcome; `true` on success
    pub results: BTreeMap<String, bool>,
    /// Failure reason per failed target
    pub errors: BTreeMap<String, String>,
    pub error_detail: Option<String>,
    pub aborted: bool,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchJob {
    pub fn new(
        operation_id: OperationId,
        operation_type: OperationType,
        total_items: usize,
    ) -> Self {
        Self {
            operation_id,
            operation_type,
            total_items,
            processed_items: 0,
            failed_items: 0,
            status: BatchStatus::Pending,
            results: BTreeMap::new(),
            errors: BTreeMap::new(),
            error_detail: None,
            aborted: false,
            cancelled: false,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn start(&mut self) {
        self.status = BatchStatus::InProgress;
    }

    /// Merge one chunk's results
    ///
    /// Keys already accounted for are ignored. Returns how many results were
    /// counted.
    pub fn merge_chunk<I>(&mut self, results: I) -> usize
    where
        I: IntoIterator<Item = ItemResult>,
    {
        let mut merged = 0;
        for result in results {
            if self.results.contains_key(&result.key) || self.accounted() >= self.total_items {
                continue;
            }
            match result.error {
                None => {
                    self.results.insert(result.key, true);
                    self.processed_items += 1;
                }
                Some(error) => {
                    self.results.insert(result.key.clone(), false);
                    self.errors.insert(result.key, error);
                    self.failed_items += 1;
                }
            }
            merged += 1;
        }
        merged
    }

    /// Mark every key in `items` without a result as failed
    pub fn fail_unaccounted<'a, I>(&mut self, items: I, reason: &str) -> usize
    where
        I: IntoIterator<Item = &'a String>,
    {
        let pending: Vec<ItemResult> = items
            .into_iter()
            .filter(|key| !self.results.contains_key(*key))
            .map(|key| ItemResult::failure(key.clone(), reason))
            .collect();
        self.merge_chunk(pending)
    }

    /// Record a chunk-level exception; the job will finish `Failed`
    pub fn abort(&mut self, detail: impl Into<String>) {
        self.aborted = true;
        if self.error_detail.is_none() {
            self.error_detail = Some(detail.into());
        }
    }

    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    /// Settle the final status
    ///
    /// Aborted jobs are `Failed`. Otherwise: no failures and everything
    /// processed is `Completed`, everything failed is `Failed`, anything else
    /// is `PartialSuccess`.
    pub fn finalize(&mut self) -> BatchStatus {
        self.status = if self.aborted {
            BatchStatus::Failed
        } else if self.failed_items == 0 && self.processed_items == self.total_items {
            BatchStatus::Completed
        } else if self.failed_items == self.total_items {
            BatchStatus::Failed
        } else {
            BatchStatus::PartialSuccess
        };
        self.finished_at = Some(Utc::now());
        self.status
    }

    pub fn accounted(&self) -> usize {
        self.processed_items + self.failed_items
    }

    pub fn is_success(&self) -> bool {
        self.status == BatchStatus::Completed
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Outcome for one target, if it has been accounted for
    pub fn result(&self, key: &str) -> Option<bool> {
        self.results.get(key).copied()
    }

    pub fn failed_keys(&self) -> Vec<&str> {
        self.errors.keys().map(String::as_str).collect()
    }

    /// One-line summary for logs, audit entries and the CLI
    pub fn summary(&self) -> String {
        format!(
            "{} of {} succeeded, {} failed",
            self.processed_items, self.total_items, self.failed_items
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(total: usize) -> BatchJob {
        BatchJob::new(OperationId::from("op-1"), OperationType::AddMembers, total)
    }

    fn keys(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("item-{i}")).collect()
    }

    #[test]
    fn test_all_success_completes() {
        let mut job = job(3);
        job.start();
        job.merge_chunk(keys(3).into_iter().map(ItemResult::success));

        assert_eq!(job.finalize(), BatchStatus::Completed);
        assert!(job.is_success());
        assert_eq!(job.result("item-1"), Some(true));
    }

    #[test]
    fn test_all_failed_is_failed() {
        let mut job = job(2);
        job.merge_chunk(keys(2).into_iter().map(|k| ItemResult::failure(k, "boom")));

        assert_eq!(job.finalize(), BatchStatus::Failed);
        assert_eq!(job.errors.get("item-0").map(String::as_str), Some("boom"));
    }

    #[test]
    fn test_mixed_is_partial_success() {
        let mut job = job(3);
        job.merge_chunk(vec![
            ItemResult::success("item-0"),
            ItemResult::failure("item-1", "not found"),
            ItemResult::success("item-2"),
        ]);

        assert_eq!(job.finalize(), BatchStatus::PartialSuccess);
        assert_eq!(job.failed_keys(), vec!["item-1"]);
        assert_eq!(job.summary(), "2 of 3 succeeded, 1 failed");
    }

    #[test]
    fn test_empty_job_completes() {
        let mut job = job(0);
        assert_eq!(job.finalize(), BatchStatus::Completed);
        assert_eq!(job.accounted(), 0);
    }

    #[test]
    fn test_duplicate_results_counted_once() {
        let mut job = job(2);
        job.merge_chunk(vec![ItemResult::success("item-0")]);
        let merged = job.merge_chunk(vec![
            ItemResult::failure("item-0", "late"),
            ItemResult::success("item-1"),
        ]);

        assert_eq!(merged, 1);
        assert_eq!(job.processed_items, 2);
        assert_eq!(job.failed_items, 0);
    }

    #[test]
    fn test_accounting_never_exceeds_total() {
        let mut job = job(2);
        job.merge_chunk(keys(5).into_iter().map(ItemResult::success));
        assert_eq!(job.accounted(), 2);
    }

    #[test]
    fn test_fail_unaccounted() {
        let items = keys(4);
        let mut job = job(4);
        job.merge_chunk(vec![ItemResult::success("item-0")]);

        let failed = job.fail_unaccounted(&items, "Cancelled before dispatch");
        assert_eq!(failed, 3);
        assert_eq!(job.accounted(), 4);
        assert_eq!(job.finalize(), BatchStatus::PartialSuccess);
    }

    #[test]
    fn test_abort_forces_failed_and_keeps_first_detail() {
        let mut job = job(2);
        job.merge_chunk(vec![ItemResult::success("item-0")]);
        job.abort("session lost");
        job.abort("second");
        job.fail_unaccounted(&keys(2), "aborted");

        assert_eq!(job.finalize(), BatchStatus::Failed);
        assert!(job.aborted);
        assert_eq!(job.error_detail.as_deref(), Some("session lost"));
        assert_eq!(job.processed_items, 1);
    }

    #[test]
    fn test_status_maps_to_audit_status() {
        assert_eq!(
            OperationStatus::from(BatchStatus::PartialSuccess),
            OperationStatus::PartialSuccess
        );
        assert!(BatchStatus::Failed.is_terminal());
        assert!(!BatchStatus::InProgress.is_terminal());
    }
}
