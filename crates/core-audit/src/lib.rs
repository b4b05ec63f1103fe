//! Audit trail for Roster operations
//!
//! Long-running operations (bulk membership changes, archives, connection
//! attempts, breaker trips) are recorded as a stream of events so their
//! history survives the process.
//!
//! # Key Concepts
//!
//! - **AuditSink**: the collaborator contract (create / progress / status)
//! - **JournalAuditSink**: append-only JSON Lines file
//! - **MemoryAuditSink**: in-process store, used by tests
//! - **AuditTrail**: best-effort wrapper that logs and swallows sink failures
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │   Bulk orchestrator / connection    │
//! └──────────────┬──────────────────────┘
//!                │ begin / progress / status
//!                ▼
//! ┌─────────────────────────────────────┐
//! │           AuditTrail                │
//! └──────────────┬──────────────────────┘
//!                │ AuditSink
//!                ▼
//! ┌─────────────────────────────────────┐
//! │      audit.jsonl                    │
//! │ {"ts":"...","event":"created"}      │
//! │ {"ts":"...","event":"progress"}     │
//! │ {"ts":"...","event":"status"}       │
//! └─────────────────────────────────────┘
//! ```

pub mod error;
pub mod journal;
pub mod record;
pub mod sink;
pub mod trail;

pub use error::{AuditError, Result};
pub use journal::{parse_journal, JournalAuditSink};
pub use record::{
    summarize, AuditEvent, AuditPayload, OperationId, OperationRecord, OperationStatus,
    OperationType,
};
pub use sink::{AuditSink, MemoryAuditSink};
pub use trail::AuditTrail;
