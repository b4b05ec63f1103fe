//! Audit sink contract and the in-memory implementation

use crate::error::{AuditError, Result};
use crate::record::{
    summarize, AuditEvent, AuditPayload, OperationId, OperationRecord, OperationStatus,
    OperationType,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

/// Collaborator that records the history of long-running operations
#[async_trait]
pub trait AuditSink: Send + Sync + 'static {
    /// Start a new operation and return its identifier
    async fn create_operation_entry(
        &self,
        operation_type: OperationType,
        target_type: &str,
        target_id: &str,
        name: &str,
    ) -> Result<OperationId>;

    async fn update_progress(
        &self,
        id: &OperationId,
        processed: usize,
        failed: usize,
        total: usize,
    ) -> Result<()>;

    /// Record a status change, optionally with exception detail
    async fn update_status(
        &self,
        id: &OperationId,
        status: OperationStatus,
        message: &str,
        detail: Option<&str>,
    ) -> Result<()>;
}

pub(crate) fn created_event(
    operation_type: OperationType,
    target_type: &str,
    target_id: &str,
    name: &str,
) -> AuditEvent {
    AuditEvent::new(
        OperationId::generate(),
        AuditPayload::Created {
            operation_type,
            target_type: target_type.to_string(),
            target_id: target_id.to_string(),
            name: name.to_string(),
        },
    )
}

/// Keeps every event in memory
///
/// Used by tests and by short-lived CLI runs without a journal.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
    known: Mutex<HashSet<OperationId>>,
    failing: AtomicBool,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// All operations, folded, in creation order
    pub fn records(&self) -> Vec<OperationRecord> {
        summarize(self.events.lock().iter())
    }

    pub fn record(&self, id: &OperationId) -> Option<OperationRecord> {
        self.records().into_iter().find(|r| &r.id == id)
    }

    pub fn records_of(&self, operation_type: OperationType) -> Vec<OperationRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.operation_type == operation_type)
            .collect()
    }

    fn check_writable(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AuditError::Unavailable("memory sink set to fail".into()));
        }
        Ok(())
    }

    fn append(&self, id: &OperationId, payload: AuditPayload) -> Result<()> {
        self.check_writable()?;
        if !self.known.lock().contains(id) {
            return Err(AuditError::unknown_operation(id.as_str()));
        }
        self.events.lock().push(AuditEvent::new(id.clone(), payload));
        Ok(())
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn create_operation_entry(
        &self,
        operation_type: OperationType,
        target_type: &str,
        target_id: &str,
        name: &str,
    ) -> Result<OperationId> {
        self.check_writable()?;
        let event = created_event(operation_type, target_type, target_id, name);
        let id = event.operation_id.clone();
        self.known.lock().insert(id.clone());
        self.events.lock().push(event);
        Ok(id)
    }

    async fn update_progress(
        &self,
        id: &OperationId,
        processed: usize,
        failed: usize,
        total: usize,
    ) -> Result<()> {
        self.append(
            id,
            AuditPayload::Progress {
                processed,
                failed,
                total,
            },
        )
    }

    async fn update_status(
        &self,
        id: &OperationId,
        status: OperationStatus,
        message: &str,
        detail: Option<&str>,
    ) -> Result<()> {
        self.append(
            id,
            AuditPayload::Status {
                status,
                message: message.to_string(),
                detail: detail.map(str::to_string),
            },
        )
    }
}
