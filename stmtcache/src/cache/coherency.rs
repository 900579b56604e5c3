// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Cross-process coherency of the statement cache
//!
//! One lock per database signals that a process has statements cached:
//!
//! ```text
//!   NONE ──put──▶ SHARED READ ◀──▶ SHARED WRITE (local insert in flight)
//!     ▲                │
//!     └──peer conflict─┘  (local purge, then release)
//! ```
//!
//! The lock is created on the first `put`, so a database that never caches a
//! statement never touches the lock manager. Conversions never wait; if a peer
//! holds a conflicting level the insert is skipped. A peer that needs every
//! process to drop its cache requests `EXCLUSIVE`, which fires the blocking
//! callback of each holder.

use std::sync::Arc;

use crate::error::{CacheError, CacheResult};
use crate::lock::{BlockingCallback, DistributedLock, LockLevel, LockManager, LockWait};

pub(crate) struct CoherencyLock {
    manager: Arc<dyn LockManager>,
    resource: String,
    lock: Option<Box<dyn DistributedLock>>,
}

impl CoherencyLock {
    pub fn new(manager: Arc<dyn LockManager>, resource: String) -> Self {
        Self {
            manager,
            resource,
            lock: None,
        }
    }

    pub fn level(&self) -> LockLevel {
        self.lock
            .as_ref()
            .map(|lock| lock.level())
            .unwrap_or(LockLevel::None)
    }

    pub fn is_created(&self) -> bool {
        self.lock.is_some()
    }

    /// Raise the lock to `SHARED WRITE` ahead of a cache insert, creating it on
    /// first use. Returns false when a peer holds a conflicting level.
    pub fn begin_mutation<F>(&mut self, on_conflict: F) -> bool
    where
        F: FnOnce() -> BlockingCallback,
    {
        let manager = &self.manager;
        let resource = &self.resource;
        let lock = self
            .lock
            .get_or_insert_with(|| manager.create_lock(resource, on_conflict()));

        if lock.level() == LockLevel::None
            && !lock.acquire(LockLevel::SharedRead, LockWait::NoWait)
        {
            return false;
        }

        lock.convert(LockLevel::SharedWrite, LockWait::NoWait)
    }

    /// Drop back to `SHARED READ` once the insert is visible
    pub fn end_mutation(&mut self) {
        if let Some(lock) = &self.lock {
            if !lock.convert(LockLevel::SharedRead, LockWait::NoWait) {
                log::warn!(
                    "Statement cache lock on {} failed to downgrade to {}",
                    self.resource,
                    LockLevel::SharedRead.as_str()
                );
            }
        }
    }

    /// Give up the lock; the next insert reacquires it
    pub fn release(&mut self) {
        if let Some(lock) = &self.lock {
            if lock.level() != LockLevel::None {
                lock.release();
            }
        }
    }

    /// Force every peer holding the lock to purge its cache.
    ///
    /// Takes `EXCLUSIVE` through a short-lived lock of its own so the request
    /// competes with this process's coherency lock like any other peer.
    /// Callers must have released their own coherency lock and must not hold
    /// the cache mutexes, since peer callbacks run on this thread.
    pub fn purge_peers(
        manager: &dyn LockManager,
        resource: &str,
        wait: LockWait,
    ) -> CacheResult<()> {
        let noop: BlockingCallback = Arc::new(|| {});
        let lock = manager.create_lock(resource, noop);

        if !lock.acquire(LockLevel::Exclusive, wait) {
            return Err(match wait {
                LockWait::Wait(Some(timeout)) => CacheError::LockTimeout(timeout),
                _ => CacheError::LockConflict(format!(
                    "could not take {} on statement cache lock {}",
                    LockLevel::Exclusive.as_str(),
                    resource
                )),
            });
        }

        lock.release();
        Ok(())
    }

    pub fn manager(&self) -> Arc<dyn LockManager> {
        self.manager.clone()
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }
}
