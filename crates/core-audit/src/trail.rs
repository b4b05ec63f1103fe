//! Best-effort audit writer
//!
//! Audit failures must never fail the operation being audited. [`AuditTrail`]
//! wraps an optional sink, logs write failures and carries on.

use crate::record::{OperationId, OperationStatus, OperationType};
use crate::sink::AuditSink;
use std::sync::Arc;
use tracing::warn;

#[derive(Clone, Default)]
pub struct AuditTrail {
    sink: Option<Arc<dyn AuditSink>>,
}

impl std::fmt::Debug for AuditTrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditTrail")
            .field("enabled", &self.sink.is_some())
            .finish()
    }
}

impl AuditTrail {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink: Some(sink) }
    }

    /// Trail that records nothing
    pub fn disabled() -> Self {
        Self { sink: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Create an entry; `None` when disabled or the sink failed
    pub async fn begin(
        &self,
        operation_type: OperationType,
        target_type: &str,
        target_id: &str,
        name: &str,
    ) -> Option<OperationId> {
        let sink = self.sink.as_ref()?;
        match sink
            .create_operation_entry(operation_type, target_type, target_id, name)
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(operation = %operation_type, error = %e, "Failed to create audit entry");
                None
            }
        }
    }

    pub async fn progress(
        &self,
        id: Option<&OperationId>,
        processed: usize,
        failed: usize,
        total: usize,
    ) {
        let (Some(sink), Some(id)) = (self.sink.as_ref(), id) else {
            return;
        };
        if let Err(e) = sink.update_progress(id, processed, failed, total).await {
            warn!(operation_id = %id, error = %e, "Failed to write audit progress");
        }
    }

    pub async fn status(
        &self,
        id: Option<&OperationId>,
        status: OperationStatus,
        message: &str,
        detail: Option<&str>,
    ) {
        let (Some(sink), Some(id)) = (self.sink.as_ref(), id) else {
            return;
        };
        if let Err(e) = sink.update_status(id, status, message, detail).await {
            warn!(operation_id = %id, error = %e, "Failed to write audit status");
        }
    }

    /// Create an entry and immediately close it with a final status
    pub async fn record(
        &self,
        operation_type: OperationType,
        target_type: &str,
        target_id: &str,
        status: OperationStatus,
        message: &str,
        detail: Option<&str>,
    ) {
        let id = self
            .begin(operation_type, target_type, target_id, message)
            .await;
        self.status(id.as_ref(), status, message, detail).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemoryAuditSink;

    #[tokio::test]
    async fn test_disabled_trail_is_noop() {
        let trail = AuditTrail::disabled();
        assert!(trail
            .begin(OperationType::AddMembers, "team", "t", "x")
            .await
            .is_none());
        trail.progress(None, 1, 0, 1).await;
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let sink = Arc::new(MemoryAuditSink::new());
        let trail = AuditTrail::new(sink.clone());
        let id = trail
            .begin(OperationType::AddMembers, "team", "t", "x")
            .await;
        assert!(id.is_some());

        sink.set_failing(true);
        trail
            .status(id.as_ref(), OperationStatus::Failed, "boom", Some("detail"))
            .await;
        sink.set_failing(false);

        assert_eq!(sink.events().len(), 1);
    }

    #[tokio::test]
    async fn test_record_one_shot() {
        let sink = Arc::new(MemoryAuditSink::new());
        let trail = AuditTrail::new(sink.clone());
        trail
            .record(
                OperationType::CircuitBreaker,
                "resource",
                "directory",
                OperationStatus::Failed,
                "Circuit opened",
                Some("5 failures"),
            )
            .await;

        let records = sink.records_of(OperationType::CircuitBreaker);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, OperationStatus::Failed);
        assert_eq!(records[0].details, vec!["5 failures".to_string()]);
    }
}
