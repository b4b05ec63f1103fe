//! Roster Bulk: chunked, bounded-concurrency bulk operations
//!
//! # Overview
//!
//! A bulk operation (add members, remove members, archive teams, update team
//! properties) runs over a deduplicated list of targets. Targets are split
//! into chunks; each chunk becomes one batched remote command issued through
//! the shared [`roster_connect::ConnectionManager`]. At most
//! `max_concurrent_chunks` chunks are in flight at once.
//!
//! # Features
//!
//! - **Per-item accounting**: every target ends up succeeded or failed on the
//!   [`BatchJob`], and `processed + failed == total` once the job finishes
//! - **Partial success**: a failing chunk fails only its own targets
//! - **Abort on connection loss**: connection-layer failures stop dispatch
//! - **Cancellation**: a `CancellationToken` stops dispatch between chunks
//! - **Audited**: entry, progress per chunk and final status
//!
//! # Example
//!
//! ```no_run
//! use roster_bulk::{ArchiveTeams, BulkConfig, BulkOrchestrator};
//! use roster_connect::ConnectionManager;
//! use std::sync::Arc;
//!
//! # async fn example(connection: Arc<ConnectionManager>) -> anyhow::Result<()> {
//! let orchestrator = BulkOrchestrator::new(connection, BulkConfig::new(25, 2))?;
//! let job = orchestrator
//!     .run(Arc::new(ArchiveTeams::new()), vec!["team-1".into(), "team-2".into()])
//!     .await;
//!
//! if !job.is_success() {
//!     for key in job.failed_keys() {
//!         eprintln!("{}: {}", key, job.errors[key]);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod job;
pub mod operations;
pub mod orchestrator;

pub use config::BulkConfig;
pub use error::BulkError;
pub use job::{BatchJob, BatchStatus, ItemResult};
pub use operations::{
    resolve_users, AddMembers, ArchiveTeams, BulkOperation, ChunkOutcome, MemberRole,
    RemoveMembers, Resolution, UpdateTeamProperties,
};
pub use orchestrator::BulkOrchestrator;
pub use tokio_util::sync::CancellationToken;
