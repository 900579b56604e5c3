// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Shared compiled-statement cache
//!
//! One `StatementCache` serves every attachment of a database. Entries are
//! either active (some session holds a handle) or inactive (idle and
//! evictable). Only inactive entries count against `max_size_bytes`; when
//! their total exceeds it the least recently deactivated ones are evicted.
//!
//! Locking: `coherency` is always taken before `state`, and only `put`, purges
//! and the peer-conflict callback take `coherency`. Access checks run with
//! neither mutex held.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::coherency::CoherencyLock;
use super::entry::{CacheEntry, EntryLists};
use super::{build_fingerprint, verification_key, Fingerprint, StatementCacheConfig};
use crate::context::{CompileContext, RoleContext};
use crate::error::{CacheError, CacheResult};
use crate::lock::{BlockingCallback, LockLevel, LockManager, LockWait};
use crate::statement::{
    AccessChecker, CompiledStatement, SharedStatement, StatementCompiler, StatementHandle,
};

/// Statement cache statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StatementCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    /// Puts that returned an uncached statement
    pub skipped_inserts: u64,
    pub evictions: u64,
    /// Explicit `remove_statement` calls that found the statement cached
    pub removals: u64,
    pub purges: u64,
    /// Calls into the access-check collaborator
    pub access_checks: u64,
    pub active_entries: usize,
    pub inactive_entries: usize,
    pub inactive_bytes: usize,
}

impl StatementCacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Point-in-time view of one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntrySnapshot {
    pub key: Fingerprint,
    pub size: usize,
    pub active: bool,
    pub verified_roles: usize,
}

/// Map and lists, guarded by one mutex
struct CacheState<S> {
    map: HashMap<Fingerprint, CacheEntry<S>>,
    lists: EntryLists,
    /// Sum of `size` over inactive entries
    inactive_bytes: usize,
    stats: StatementCacheStats,
}

enum Lookup<S> {
    Miss,
    Verified,
    NeedsCheck(Arc<SharedStatement<S>>),
}

impl<S: CompiledStatement> CacheState<S> {
    fn new() -> Self {
        Self {
            map: HashMap::new(),
            lists: EntryLists::default(),
            inactive_bytes: 0,
            stats: StatementCacheStats::default(),
        }
    }

    /// Hand out a use of the entry under `key`, activating it if idle
    fn hit(
        &mut self,
        key: &Fingerprint,
        cache: Weak<StatementCache<S>>,
    ) -> Option<StatementHandle<S>> {
        let entry = self.map.get_mut(key)?;
        let released = entry.activate(&mut self.lists);
        self.inactive_bytes = self.inactive_bytes.saturating_sub(released);
        self.stats.hits += 1;
        Some(StatementHandle::acquire(entry.statement.clone(), cache))
    }

    fn insert(
        &mut self,
        key: Fingerprint,
        statement: Arc<SharedStatement<S>>,
        verify_key: String,
        cache: Weak<StatementCache<S>>,
    ) -> StatementHandle<S> {
        // Two sessions may compile the same text after both missed
        if self.remove_entry(&key).is_some() {
            log::debug!("Replacing cached statement {:?}", key);
        }

        statement.set_cache_key(key.clone());
        let size = statement.memory_size();
        let entry = CacheEntry::new_active(
            key.clone(),
            statement.clone(),
            size,
            verify_key,
            &mut self.lists,
        );
        self.map.insert(key, entry);
        self.stats.inserts += 1;

        StatementHandle::acquire(statement, cache)
    }

    /// Detach the entry from map and lists and forget its key
    fn remove_entry(&mut self, key: &Fingerprint) -> Option<CacheEntry<S>> {
        let entry = self.map.remove(key)?;
        let released = entry.unlink(&mut self.lists);
        self.inactive_bytes = self.inactive_bytes.saturating_sub(released);
        entry.statement.clear_cache_key();
        Some(entry)
    }

    /// Evict least recently deactivated entries until the bound holds
    fn shrink(&mut self, max_size_bytes: usize) -> usize {
        let mut evicted = 0;

        while self.inactive_bytes > max_size_bytes {
            let (position, key) = match self.lists.oldest_inactive() {
                Some((position, key)) => (position, key.clone()),
                None => break,
            };

            let evictable = matches!(
                self.map.get(&key),
                Some(entry) if !entry.active && entry.position == position
            );

            if !evictable {
                log::error!(
                    "Statement cache inactive list held a stale entry {:?}; unlinking it",
                    key
                );
                self.lists.unlink_inactive(position);
                continue;
            }

            if let Some(entry) = self.remove_entry(&key) {
                log::debug!("Evicted cached statement {:?} ({} bytes)", key, entry.size);
                evicted += 1;
            }
        }

        self.stats.evictions += evicted as u64;
        evicted
    }

    fn purge(&mut self) -> usize {
        let purged = self.map.len();
        for entry in self.map.values() {
            entry.statement.clear_cache_key();
        }
        self.map.clear();
        self.lists.clear();
        self.inactive_bytes = 0;
        self.stats.purges += 1;
        purged
    }
}

/// Process-wide cache of compiled statements for one database
pub struct StatementCache<S: CompiledStatement> {
    config: StatementCacheConfig,
    database: String,
    state: Mutex<CacheState<S>>,
    coherency: Mutex<CoherencyLock>,
    access_checker: Arc<dyn AccessChecker<S>>,
    self_ref: Weak<StatementCache<S>>,
}

impl<S: CompiledStatement> StatementCache<S> {
    /// Create the cache for `database`. The coherency lock is named after the
    /// database and is only created by the first `put`.
    pub fn new(
        config: StatementCacheConfig,
        database: impl Into<String>,
        lock_manager: Arc<dyn LockManager>,
        access_checker: Arc<dyn AccessChecker<S>>,
    ) -> Arc<Self> {
        let database = database.into();
        let resource = format!("statement_cache:{}", database);

        Arc::new_cyclic(|self_ref| Self {
            config,
            database,
            state: Mutex::new(CacheState::new()),
            coherency: Mutex::new(CoherencyLock::new(lock_manager, resource)),
            access_checker,
            self_ref: self_ref.clone(),
        })
    }

    pub fn config(&self) -> &StatementCacheConfig {
        &self.config
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Look up a statement compiled from `text` under `ctx`.
    ///
    /// The first request from each role context runs the access check;
    /// an authorization failure is returned and the entry stays cached.
    pub fn get(
        &self,
        text: &str,
        ctx: &CompileContext,
        role: &RoleContext,
    ) -> CacheResult<Option<StatementHandle<S>>> {
        if !self.config.is_enabled() {
            return Ok(None);
        }

        let key = build_fingerprint(text, ctx);
        let verify_key = verification_key(role);

        let statement = {
            let mut state = self.state.lock();
            let lookup = match state.map.get(&key) {
                None => Lookup::Miss,
                Some(entry) if entry.verified.contains(&verify_key) => Lookup::Verified,
                Some(entry) => Lookup::NeedsCheck(entry.statement.clone()),
            };

            match lookup {
                Lookup::Miss => {
                    state.stats.misses += 1;
                    log::debug!("Statement cache miss: {:?}", key);
                    return Ok(None);
                }
                Lookup::Verified => return Ok(state.hit(&key, self.self_ref.clone())),
                Lookup::NeedsCheck(statement) => {
                    state.stats.access_checks += 1;
                    statement
                }
            }
        };

        self.access_checker.check_access(statement.compiled(), role)?;

        let mut state = self.state.lock();
        let still_cached = match state.map.get_mut(&key) {
            Some(entry) if Arc::ptr_eq(&entry.statement, &statement) => {
                entry.verified.insert(verify_key);
                true
            }
            _ => false,
        };

        if !still_cached {
            // Removed or replaced while the check ran
            state.stats.misses += 1;
            return Ok(None);
        }
        Ok(state.hit(&key, self.self_ref.clone()))
    }

    /// Cache a freshly compiled statement and return the caller's handle to it.
    ///
    /// The statement is returned uncached when the cache is disabled, when it is
    /// not reusable, or when a peer holds the coherency lock in a conflicting
    /// level. Inserting never evicts: new entries are active.
    pub fn put(
        &self,
        text: &str,
        ctx: &CompileContext,
        role: &RoleContext,
        compiled: S,
    ) -> StatementHandle<S> {
        let statement = SharedStatement::new(compiled);

        if !self.config.is_enabled() {
            return StatementHandle::detached(statement);
        }

        if !statement.kind().is_reusable() {
            log::debug!(
                "Not caching {} statement: not reusable",
                statement.kind().as_str()
            );
            self.state.lock().stats.skipped_inserts += 1;
            return StatementHandle::detached(statement);
        }

        let key = build_fingerprint(text, ctx);
        let mut coherency = self.coherency.lock();

        if !coherency.begin_mutation(|| self.blocking_callback()) {
            drop(coherency);
            log::debug!(
                "Statement cache of {} busy with a peer; statement not cached",
                self.database
            );
            self.state.lock().stats.skipped_inserts += 1;
            return StatementHandle::detached(statement);
        }

        let handle = self.state.lock().insert(
            key,
            Arc::new(statement),
            verification_key(role),
            self.self_ref.clone(),
        );
        coherency.end_mutation();

        handle
    }

    /// Reuse a cached statement or compile, cache and return a new one
    pub fn prepare(
        &self,
        text: &str,
        ctx: &CompileContext,
        role: &RoleContext,
        compiler: &dyn StatementCompiler<S>,
    ) -> CacheResult<StatementHandle<S>> {
        if let Some(handle) = self.get(text, ctx, role)? {
            return Ok(handle);
        }

        let compiled = compiler.compile(text, ctx)?;
        Ok(self.put(text, ctx, role, compiled))
    }

    /// Return a statement whose last user went away to the inactive pool,
    /// then evict if the inactive total exceeds the bound.
    ///
    /// No-op when the statement is no longer cached or has been picked up
    /// again by another session.
    pub fn statement_going_inactive(&self, statement: &SharedStatement<S>) {
        let key = match statement.cache_key() {
            Some(key) => key,
            None => return,
        };

        let mut state = self.state.lock();
        if statement.use_count() > 0 {
            return;
        }

        let state = &mut *state;
        let entry = match state.map.get_mut(&key) {
            Some(entry) if std::ptr::eq(Arc::as_ptr(&entry.statement), statement) => entry,
            _ => return,
        };

        let added = entry.deactivate(statement.memory_size(), &mut state.lists);
        state.inactive_bytes += added;

        if state.inactive_bytes > self.config.max_size_bytes {
            state.shrink(self.config.max_size_bytes);
        }
    }

    /// Stop offering `statement` from the cache. Sessions already holding it
    /// keep using it. Idempotent.
    pub fn remove_statement(&self, statement: &SharedStatement<S>) {
        let key = match statement.cache_key() {
            Some(key) => key,
            None => return,
        };

        let mut state = self.state.lock();
        let owned = matches!(
            state.map.get(&key),
            Some(entry) if std::ptr::eq(Arc::as_ptr(&entry.statement), statement)
        );

        if owned && state.remove_entry(&key).is_some() {
            state.stats.removals += 1;
            log::debug!("Removed cached statement {:?}", key);
        } else {
            statement.clear_cache_key();
        }
    }

    /// Evict idle entries until the inactive total fits the bound
    pub fn shrink(&self) -> usize {
        self.state.lock().shrink(self.config.max_size_bytes)
    }

    /// Drop every entry, active or not. Issued handles stay valid.
    pub fn purge(&self) -> usize {
        let purged = self.state.lock().purge();
        log::info!(
            "Purged {} statement(s) from the statement cache of {}",
            purged,
            self.database
        );
        purged
    }

    /// Purge this cache and force every other process attached to the database
    /// to purge theirs, e.g. after a metadata change.
    ///
    /// Fails with `LockTimeout` or `LockConflict` if exclusive access to the
    /// coherency lock cannot be obtained within the configured timeout.
    pub fn purge_all_attachments(&self) -> CacheResult<()> {
        let (manager, resource) = {
            let mut coherency = self.coherency.lock();
            self.purge();
            coherency.release();
            (coherency.manager(), coherency.resource().to_string())
        };

        let wait = LockWait::Wait(self.config.lock_timeout);
        CoherencyLock::purge_peers(manager.as_ref(), &resource, wait).map_err(|e| {
            log::warn!(
                "Failed to purge statement caches of other attachments to {}: {}",
                self.database,
                e
            );
            e
        })
    }

    /// Purge and release the coherency lock when the database is detached
    pub fn shutdown(&self) {
        let mut coherency = self.coherency.lock();
        self.state.lock().purge();
        coherency.release();
    }

    /// A peer requested a level incompatible with ours
    fn on_peer_conflict(&self) {
        let mut coherency = self.coherency.lock();
        let purged = self.state.lock().purge();
        coherency.release();
        log::info!(
            "Peer requested exclusive access to the statement cache of {}: purged {} statement(s)",
            self.database,
            purged
        );
    }

    fn blocking_callback(&self) -> BlockingCallback {
        let cache = self.self_ref.clone();
        Arc::new(move || {
            if let Some(cache) = cache.upgrade() {
                cache.on_peer_conflict();
            }
        })
    }

    pub fn coherency_level(&self) -> LockLevel {
        self.coherency.lock().level()
    }

    /// Lock manager resource the coherency lock is taken on
    pub fn coherency_resource(&self) -> String {
        self.coherency.lock().resource().to_string()
    }

    pub fn contains(&self, text: &str, ctx: &CompileContext) -> bool {
        let key = build_fingerprint(text, ctx);
        self.state.lock().map.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.state.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().map.is_empty()
    }

    pub fn inactive_bytes(&self) -> usize {
        self.state.lock().inactive_bytes
    }

    pub fn stats(&self) -> StatementCacheStats {
        let state = self.state.lock();
        let mut stats = state.stats.clone();
        stats.active_entries = state.lists.active_len();
        stats.inactive_entries = state.lists.inactive_len();
        stats.inactive_bytes = state.inactive_bytes;
        stats
    }

    /// Active entries first, then inactive ones from least recently deactivated
    pub fn snapshot(&self) -> Vec<CacheEntrySnapshot> {
        let state = self.state.lock();
        state
            .lists
            .active_keys()
            .chain(state.lists.inactive_keys())
            .filter_map(|key| state.map.get(key))
            .map(|entry| CacheEntrySnapshot {
                key: entry.key.clone(),
                size: entry.size,
                active: entry.active,
                verified_roles: entry.verified.len(),
            })
            .collect()
    }

    /// Check list membership and size accounting
    pub fn verify_consistency(&self) -> CacheResult<()> {
        let state = self.state.lock();

        let listed = state.lists.active_len() + state.lists.inactive_len();
        if listed != state.map.len() {
            return Err(CacheError::Internal(format!(
                "{} entries mapped but {} listed",
                state.map.len(),
                listed
            )));
        }

        let mut inactive_total = 0usize;
        for (key, entry) in &state.map {
            if &entry.key != key {
                return Err(CacheError::Internal(format!(
                    "entry {:?} mapped under {:?}",
                    entry.key, key
                )));
            }
            if !entry.is_linked(&state.lists) {
                return Err(CacheError::Internal(format!(
                    "entry {:?} is not in exactly its own list",
                    key
                )));
            }
            if entry.statement.cache_key().as_ref() != Some(key) {
                return Err(CacheError::Internal(format!(
                    "statement of {:?} does not carry its key",
                    key
                )));
            }
            if !entry.active {
                inactive_total += entry.size;
            }
        }

        if inactive_total != state.inactive_bytes {
            return Err(CacheError::Internal(format!(
                "inactive entries hold {} bytes but the running total is {}",
                inactive_total, state.inactive_bytes
            )));
        }

        Ok(())
    }
}

impl<S: CompiledStatement> Drop for StatementCache<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
