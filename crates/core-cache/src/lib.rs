//! Roster Core Cache: shared, invalidation-aware cache of directory lookups
//!
//! - [`Cache`]: TTL + generation-invalidated key/value store
//! - [`keys`]: key builders and [`Scope`]s used for group invalidation
//!
//! The cache is infallible and synchronous. Locks are held only for the
//! duration of a map operation and never across an `.await`.

pub mod cache;
pub mod keys;

pub use cache::{Cache, CacheConfig, CacheStats};
pub use keys::Scope;
