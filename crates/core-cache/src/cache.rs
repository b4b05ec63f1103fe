//! Process-wide cache with generation-based invalidation
//!
//! Every entry records the global generation and the generation of each of
//! its scopes at insert time. Invalidating a scope only bumps a counter; the
//! entry is found stale and dropped the next time it is read, or by the sweep
//! a write runs once the map has doubled since the previous sweep. Expiration
//! is lazy as well. There is no background sweeper.

use crate::keys::{self, Scope};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Map size below which writes never sweep
const SWEEP_FLOOR: usize = 1024;

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// TTL used by [`Cache::set`]
    pub default_ttl: Duration,
    /// TTL used by [`Cache::set_volatile`]
    pub volatile_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(30 * 60),
            volatile_ttl: Duration::from_secs(5 * 60),
        }
    }
}

/// Counters since creation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Entry {
    value: Arc<dyn Any + Send + Sync>,
    expires_at: Instant,
    generation: u64,
    scopes: Vec<(String, u64)>,
}

#[derive(Default)]
struct Generations {
    global: u64,
    scopes: HashMap<String, u64>,
}

impl Generations {
    fn scope(&self, token: &str) -> u64 {
        self.scopes.get(token).copied().unwrap_or(0)
    }

    fn stamp(&self, tokens: Vec<String>) -> (u64, Vec<(String, u64)>) {
        let scopes = tokens
            .into_iter()
            .map(|t| {
                let g = self.scope(&t);
                (t, g)
            })
            .collect();
        (self.global, scopes)
    }

    fn is_current(&self, entry: &Entry, now: Instant) -> bool {
        now < entry.expires_at
            && entry.generation == self.global
            && entry
                .scopes
                .iter()
                .all(|(token, g)| self.scope(token) == *g)
    }
}

struct CacheState {
    entries: HashMap<String, Entry>,
    generations: Generations,
    /// Map size at which the next write sweeps
    next_sweep: usize,
}

impl Default for CacheState {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            generations: Generations::default(),
            next_sweep: SWEEP_FLOOR,
        }
    }
}

impl CacheState {
    fn is_current(&self, entry: &Entry, now: Instant) -> bool {
        self.generations.is_current(entry, now)
    }

    /// Drop expired and invalidated entries, returning how many went
    fn sweep(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let generations = &self.generations;
        self.entries.retain(|_, e| generations.is_current(e, now));
        self.next_sweep = (self.entries.len() * 2).max(SWEEP_FLOOR);
        before - self.entries.len()
    }
}

/// Shared cache of remote lookups
///
/// Values of any `Clone + Send + Sync` type may be stored; reads downcast
/// to the requested type and treat a mismatch as a miss.
///
/// # Example
///
/// ```
/// use roster_core_cache::{keys, Cache, Scope};
///
/// let cache = Cache::default();
/// cache.set(&keys::user("alice@school.edu"), "u-1".to_string());
/// assert_eq!(cache.get::<String>("user:alice@school.edu").as_deref(), Some("u-1"));
///
/// cache.invalidate_group(&Scope::Users);
/// assert!(cache.get::<String>("user:alice@school.edu").is_none());
/// ```
pub struct Cache {
    config: CacheConfig,
    state: RwLock<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Cache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: RwLock::new(CacheState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Read a value; expired, invalidated or differently-typed entries miss
    pub fn get<T>(&self, key: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let now = Instant::now();
        let stale = {
            let state = self.state.read();
            match state.entries.get(key) {
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
                Some(entry) if state.is_current(entry, now) => {
                    match entry.value.downcast_ref::<T>() {
                        Some(value) => {
                            self.hits.fetch_add(1, Ordering::Relaxed);
                            return Some(value.clone());
                        }
                        None => {
                            debug!(key, "Cached value has a different type");
                            false
                        }
                    }
                }
                Some(_) => true,
            }
        };

        if stale {
            let mut state = self.state.write();
            // Re-check: a writer may have replaced it meanwhile
            let still_stale = state
                .entries
                .get(key)
                .is_some_and(|e| !state.is_current(e, now));
            if still_stale {
                state.entries.remove(key);
                trace!(key, "Dropped stale cache entry");
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store with the default TTL
    pub fn set<T>(&self, key: &str, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.set_scoped(key, value, self.config.default_ttl, &[]);
    }

    /// Store with the short TTL, for data that changes often
    pub fn set_volatile<T>(&self, key: &str, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.set_scoped(key, value, self.config.volatile_ttl, &[]);
    }

    pub fn set_with_ttl<T>(&self, key: &str, value: T, ttl: Duration)
    where
        T: Send + Sync + 'static,
    {
        self.set_scoped(key, value, ttl, &[]);
    }

    /// Store with extra scopes beyond the ones implied by the key
    pub fn set_scoped<T>(&self, key: &str, value: T, ttl: Duration, scopes: &[Scope])
    where
        T: Send + Sync + 'static,
    {
        let mut state = self.state.write();
        let stamp = state.generations.stamp(scope_tokens(key, scopes));
        insert(&mut state, key, Arc::new(value), ttl, stamp);
    }

    /// Return the cached value or load, store and return it
    ///
    /// Generations are captured before the loader runs, so a value loaded
    /// across an invalidation is stored already stale.
    pub async fn get_or_try_insert_with<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        loader: F,
    ) -> Result<T, E>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get::<T>(key) {
            return Ok(value);
        }

        let stamp = self.state.read().generations.stamp(scope_tokens(key, &[]));
        let value = loader().await?;

        let mut state = self.state.write();
        insert(&mut state, key, Arc::new(value.clone()), ttl, stamp);
        Ok(value)
    }

    /// Remove one key
    pub fn invalidate(&self, key: &str) {
        if self.state.write().entries.remove(key).is_some() {
            debug!(key, "Cache key invalidated");
        }
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    /// Invalidate every entry tagged with `scope`
    pub fn invalidate_group(&self, scope: &Scope) {
        let token = scope.token();
        {
            let mut state = self.state.write();
            *state.generations.scopes.entry(token.clone()).or_insert(0) += 1;
            for key in scope.well_known_keys() {
                state.entries.remove(&key);
            }
        }
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        debug!(scope = %token, "Cache scope invalidated");
    }

    /// Invalidate everything
    ///
    /// Every held entry is stale after the generation bump, so the map is
    /// emptied as well.
    pub fn invalidate_all(&self) {
        {
            let mut state = self.state.write();
            state.generations.global += 1;
            state.entries.clear();
            state.next_sweep = SWEEP_FLOOR;
        }
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        debug!("Cache fully invalidated");
    }

    /// Drop expired and invalidated entries now
    pub fn purge(&self) -> usize {
        self.state.write().sweep(Instant::now())
    }

    /// Entries physically held, including stale ones not yet read
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

fn scope_tokens(key: &str, extra: &[Scope]) -> Vec<String> {
    let mut tokens = keys::scopes_for_key(key);
    for scope in extra {
        let token = scope.token();
        if !tokens.contains(&token) {
            tokens.push(token);
        }
    }
    tokens
}

fn insert(
    state: &mut CacheState,
    key: &str,
    value: Arc<dyn Any + Send + Sync>,
    ttl: Duration,
    (generation, scopes): (u64, Vec<(String, u64)>),
) {
    let now = Instant::now();
    if state.entries.len() >= state.next_sweep && !state.entries.contains_key(key) {
        let dropped = state.sweep(now);
        trace!(dropped, remaining = state.entries.len(), "Swept stale cache entries");
    }

    let expires_at = now + ttl;
    state.entries.insert(
        key.to_string(),
        Entry {
            value,
            expires_at,
            generation,
            scopes,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{team, team_channels, team_members, user, ALL_TEAMS, SESSION_CONTEXT};

    #[test]
    fn test_get_set_roundtrip_types() {
        let cache = Cache::default();
        cache.set("user:alice", "u-1".to_string());
        cache.set("team:1:members", vec!["a".to_string(), "b".to_string()]);

        assert_eq!(cache.get::<String>("user:alice").as_deref(), Some("u-1"));
        assert_eq!(
            cache.get::<Vec<String>>("team:1:members").map(|v| v.len()),
            Some(2)
        );
        // Wrong type is a miss
        assert!(cache.get::<u32>("user:alice").is_none());
        assert!(cache.get::<String>("user:bob").is_none());
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = Cache::default();
        cache.set_with_ttl("user:alice", 1u32, Duration::from_millis(20));
        assert_eq!(cache.get::<u32>("user:alice"), Some(1));

        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get::<u32>("user:alice").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_invalidate_all_misses_everything() {
        let cache = Cache::default();
        let keys = [
            user("alice"),
            user("bob"),
            team("1"),
            team_members("1"),
            ALL_TEAMS.to_string(),
            SESSION_CONTEXT.to_string(),
            "unscoped".to_string(),
        ];
        for k in &keys {
            cache.set(k, 7u8);
        }

        cache.invalidate_all();
        // Singletons are removed eagerly
        assert!(cache.len() <= keys.len() - 2);

        for k in &keys {
            assert!(cache.get::<u8>(k).is_none(), "{k}");
        }

        cache.set(&user("alice"), 8u8);
        assert_eq!(cache.get::<u8>(&user("alice")), Some(8));
    }

    #[test]
    fn test_user_scope_invalidation_leaves_teams() {
        let cache = Cache::default();
        cache.set(&user("alice"), "u-1".to_string());
        cache.set(&user("bob"), "u-2".to_string());
        cache.set(&team("1"), "Team One".to_string());

        cache.invalidate_group(&Scope::Users);

        assert!(cache.get::<String>(&user("alice")).is_none());
        assert!(cache.get::<String>(&user("bob")).is_none());
        assert_eq!(cache.get::<String>(&team("1")).as_deref(), Some("Team One"));
    }

    #[test]
    fn test_team_scope_removes_well_known_keys() {
        let cache = Cache::default();
        cache.set(&team("1"), 1u8);
        cache.set(&team_members("1"), 2u8);
        cache.set(&team_channels("1"), 3u8);
        cache.set(&team_members("2"), 4u8);

        cache.invalidate_group(&Scope::team("1"));

        assert_eq!(cache.len(), 1);
        assert!(cache.get::<u8>(&team_members("1")).is_none());
        assert_eq!(cache.get::<u8>(&team_members("2")), Some(4));
    }

    #[test]
    fn test_explicit_scopes() {
        let cache = Cache::default();
        cache.set_scoped(
            ALL_TEAMS,
            vec!["1".to_string()],
            Duration::from_secs(60),
            &[Scope::Teams],
        );
        cache.invalidate_group(&Scope::Teams);
        assert!(cache.get::<Vec<String>>(ALL_TEAMS).is_none());
    }

    #[test]
    fn test_invalidate_single_key() {
        let cache = Cache::default();
        cache.set("user:alice", 1u8);
        cache.set("user:bob", 2u8);
        cache.invalidate("user:alice");
        assert!(cache.get::<u8>("user:alice").is_none());
        assert_eq!(cache.get::<u8>("user:bob"), Some(2));
    }

    #[test]
    fn test_purge_and_stats() {
        let cache = Cache::default();
        cache.set("user:alice", 1u8);
        cache.set("team:1", 1u8);
        cache.invalidate_group(&Scope::Users);
        assert_eq!(cache.purge(), 1);

        assert_eq!(cache.get::<u8>("team:1"), Some(1));
        assert!(cache.get::<u8>("user:alice").is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.invalidations, 1);
        assert_eq!(stats.entries, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_invalidated_entries_do_not_accumulate() {
        let cache = Cache::default();
        for round in 0..5 {
            for i in 0..10_000 {
                cache.set(&user(&format!("{}-{}", round, i)), i);
            }
            // Live entries are 10k at most; stale ones never pile up past a sweep
            assert!(cache.len() <= 20_000, "round {} len {}", round, cache.len());
            cache.invalidate_group(&Scope::Users);
        }

        assert!(cache.purge() > 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_all_empties_map() {
        let cache = Cache::default();
        for i in 0..5_000 {
            cache.set(&team(&i.to_string()), i);
        }
        cache.invalidate_all();
        assert!(cache.is_empty());

        cache.set(&team("1"), 1);
        assert_eq!(cache.get::<i32>(&team("1")), Some(1));
    }

    #[test]
    fn test_write_sweeps_expired_entries() {
        let cache = Cache::default();
        for i in 0..SWEEP_FLOOR {
            cache.set_with_ttl(&user(&i.to_string()), i, Duration::from_millis(10));
        }
        std::thread::sleep(Duration::from_millis(30));

        cache.set(&user("fresh"), 1usize);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get::<usize>(&user("fresh")), Some(1));
    }

    #[tokio::test]
    async fn test_get_or_try_insert_with() {
        let cache = Cache::default();
        let ttl = Duration::from_secs(60);

        let first: Result<String, String> = cache
            .get_or_try_insert_with("user:alice", ttl, || async { Ok("u-1".to_string()) })
            .await;
        assert_eq!(first.unwrap(), "u-1");

        let second: Result<String, String> = cache
            .get_or_try_insert_with("user:alice", ttl, || async {
                Err("loader must not run".to_string())
            })
            .await;
        assert_eq!(second.unwrap(), "u-1");

        let failed: Result<String, String> = cache
            .get_or_try_insert_with("user:bob", ttl, || async { Err("lookup failed".to_string()) })
            .await;
        assert!(failed.is_err());
        assert!(cache.get::<String>("user:bob").is_none());
    }

    #[tokio::test]
    async fn test_load_across_invalidation_is_stale() {
        let cache = Arc::new(Cache::default());
        let c = cache.clone();
        let value: Result<u8, ()> = cache
            .get_or_try_insert_with("user:alice", Duration::from_secs(60), || async move {
                c.invalidate_group(&Scope::Users);
                Ok(1)
            })
            .await;

        assert_eq!(value, Ok(1));
        assert!(cache.get::<u8>("user:alice").is_none());
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(Cache::default());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for j in 0..200 {
                        let key = format!("user:{}-{}", i, j);
                        cache.set(&key, j);
                        let _ = cache.get::<i32>(&key);
                        if j % 50 == 0 {
                            cache.invalidate_group(&Scope::Users);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        cache.invalidate_all();
        assert!(cache.get::<i32>("user:0-199").is_none());
    }
}
