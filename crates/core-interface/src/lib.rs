//! Roster Core Interface: boundary contracts for the remote directory service
//!
//! This crate defines everything the resilient core talks to but does not own:
//!
//! 1. **Command scripts**: structured, parameterized requests ([`CommandScript`])
//!    and structured results ([`CommandOutput`])
//! 2. **Execution engine**: the factory ([`ExecutionEngine`]) and stateful
//!    authenticated handle ([`EngineSession`]) that run scripts remotely
//! 3. **Token provider**: hands out valid bearer tokens ([`TokenProvider`])
//! 4. **Notifications**: best-effort, non-blocking observer pushes ([`Notifier`])
//!
//! # Example
//!
//! ```rust,no_run
//! use roster_core_interface::{CommandScript, EngineSession};
//!
//! async fn list_members(session: &mut dyn EngineSession, team: &str) -> anyhow::Result<usize> {
//!     let script = CommandScript::new("Get-TeamUser").param("GroupId", team);
//!     let output = session.invoke(&script).await?;
//!     Ok(output.len())
//! }
//! ```

pub mod command;
pub mod engine;
pub mod notify;
pub mod token;

pub use command::{CommandOutput, CommandScript, Record};
pub use engine::{EngineError, EngineErrorKind, EngineSession, ExecutionEngine, SessionRequest};
pub use notify::{ChannelNotifier, ConnectStage, Notification, Notifier, NullNotifier};
pub use token::{AccessToken, Credential, TokenError, TokenProvider};
