//! Roster Connect: resilient connectivity to the remote directory service
//!
//! Provides the [`ConnectionManager`], which owns the one live session,
//! runs every command through a circuit breaker and retry policy, and
//! reconnects silently with the last good credential.
//!
//! # Example
//!
//! ```rust,no_run
//! use roster_connect::{ConnectionManager, HttpEngineConfig, HttpExecutionEngine};
//! use roster_connect::testing::TestTokenProvider;
//! use roster_core_interface::{CommandScript, Credential};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let engine = HttpExecutionEngine::new(HttpEngineConfig::new("https://gateway.example.edu"))?;
//! let manager = ConnectionManager::builder(Arc::new(engine), Arc::new(TestTokenProvider::new()))
//!     .build();
//! let _notifier = manager.start_event_notifier();
//!
//! manager.connect(Credential::new("admin@school.edu"), &[]).await?;
//! if let Some(output) = manager
//!     .execute_command(&CommandScript::new("Get-Team").param("GroupId", "t-1"))
//!     .await?
//! {
//!     println!("{:?}", output.first_str("DisplayName"));
//! }
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod error;
pub mod events;
pub mod http;
pub mod manager;
pub mod testing;

pub use context::{ConnectionContext, ConnectionHealth, ConnectionState};
pub use error::{classify, CommandError, ConnectError};
pub use events::spawn_breaker_notifier;
pub use http::{HttpEngineConfig, HttpExecutionEngine};
pub use manager::{ConnectionConfig, ConnectionManager, ConnectionManagerBuilder};
