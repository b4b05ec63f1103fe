/*!
 * Roster - resilient team and membership management
 *
 * A client for a remote directory/collaboration service with:
 * - One long-lived connection guarded by a circuit breaker and retry policy
 * - Silent reconnect with the last good credential
 * - A shared cache with scope-based invalidation
 * - Chunked bulk membership and team changes with partial-failure accounting
 * - An audit journal of every long-running operation
 *
 * The building blocks live in the `roster-*` crates; this crate wires them
 * together from a TOML configuration and exposes the [`GroupService`].
 */

pub mod app;
pub mod cli_progress;
pub mod cli_style;
pub mod config;
pub mod error;
pub mod groups;
pub mod input;
pub mod logging;
pub mod token;

pub use app::{App, AppParts};
pub use config::{LogLevel, LoggingConfig, RosterConfig};
pub use error::{exit_code_for, Result, RosterError};
pub use groups::{Channel, GroupService, Member, NewChannel, Team};
pub use token::StaticTokenProvider;

pub use roster_bulk::{BatchJob, BatchStatus, CancellationToken, MemberRole};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
