// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! In-process lock manager
//!
//! Every cache that shares one `LocalLockManager` behaves like a separate
//! process attached to the same database: locks on the same resource name
//! conflict with each other and blocking callbacks are delivered across them.
//!
//! Blocking callbacks run on the requesting thread with the lock table
//! unlocked, so a callback may release or convert its own lock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex, MutexGuard};

use super::{BlockingCallback, DistributedLock, LockLevel, LockManager, LockWait};

/// Process-wide lock manager shared by every cache that does not bring its own
static GLOBAL_LOCK_MANAGER: Lazy<Arc<LocalLockManager>> =
    Lazy::new(|| Arc::new(LocalLockManager::new()));

struct LockOwner {
    resource: String,
    level: LockLevel,
    /// Bumped each time the lock is granted from `NONE`
    grants: u64,
    on_conflict: BlockingCallback,
}

#[derive(Default)]
struct LockTable {
    next_id: u64,
    owners: HashMap<u64, LockOwner>,
}

impl LockTable {
    /// Owners on the same resource whose granted level conflicts with `level`
    fn blockers(&self, id: u64, level: LockLevel) -> Vec<((u64, u64), BlockingCallback)> {
        let resource = match self.owners.get(&id) {
            Some(owner) => &owner.resource,
            None => return Vec::new(),
        };

        self.owners
            .iter()
            .filter(|(other_id, other)| {
                **other_id != id
                    && other.resource == *resource
                    && !other.level.compatible_with(level)
            })
            .map(|(other_id, other)| ((*other_id, other.grants), other.on_conflict.clone()))
            .collect()
    }
}

struct Shared {
    table: Mutex<LockTable>,
    changed: Condvar,
}

impl Shared {
    fn set_level(&self, table: &mut MutexGuard<'_, LockTable>, id: u64, level: LockLevel) -> bool {
        match table.owners.get_mut(&id) {
            Some(owner) => {
                if owner.level == LockLevel::None && level != LockLevel::None {
                    owner.grants += 1;
                }
                owner.level = level;
                self.changed.notify_all();
                true
            }
            None => false,
        }
    }
}

/// Lock manager for caches living in one OS process
pub struct LocalLockManager {
    shared: Arc<Shared>,
}

impl LocalLockManager {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                table: Mutex::new(LockTable::default()),
                changed: Condvar::new(),
            }),
        }
    }

    /// The process-wide instance
    pub fn global() -> Arc<LocalLockManager> {
        GLOBAL_LOCK_MANAGER.clone()
    }

    /// Granted level of every live lock on `resource`
    pub fn granted_levels(&self, resource: &str) -> Vec<LockLevel> {
        let table = self.shared.table.lock();
        let mut levels: Vec<LockLevel> = table
            .owners
            .values()
            .filter(|owner| owner.resource == resource && owner.level != LockLevel::None)
            .map(|owner| owner.level)
            .collect();
        levels.sort();
        levels
    }
}

impl Default for LocalLockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager for LocalLockManager {
    fn create_lock(
        &self,
        resource: &str,
        on_conflict: BlockingCallback,
    ) -> Box<dyn DistributedLock> {
        let mut table = self.shared.table.lock();
        table.next_id += 1;
        let id = table.next_id;
        table.owners.insert(
            id,
            LockOwner {
                resource: resource.to_string(),
                level: LockLevel::None,
                grants: 0,
                on_conflict,
            },
        );

        Box::new(LocalLock {
            id,
            shared: self.shared.clone(),
        })
    }
}

/// A lock handed out by [`LocalLockManager`]
pub struct LocalLock {
    id: u64,
    shared: Arc<Shared>,
}

impl LocalLock {
    fn request(&self, level: LockLevel, wait: LockWait) -> bool {
        // A deadline past what `Instant` can represent is no deadline at all
        let deadline = match wait {
            LockWait::Wait(Some(timeout)) => Instant::now().checked_add(timeout),
            _ => None,
        };
        let mut notified = HashSet::new();
        let mut table = self.shared.table.lock();

        loop {
            let blockers = table.blockers(self.id, level);
            if blockers.is_empty() {
                return self.shared.set_level(&mut table, self.id, level);
            }

            if wait == LockWait::NoWait {
                return false;
            }

            // A holder that released and was granted again is notified again
            let pending: Vec<BlockingCallback> = blockers
                .into_iter()
                .filter(|(grant, _)| notified.insert(*grant))
                .map(|(_, callback)| callback)
                .collect();

            if !pending.is_empty() {
                log::debug!(
                    "Lock {} requesting {}: notifying {} blocking owner(s)",
                    self.id,
                    level.as_str(),
                    pending.len()
                );
                MutexGuard::unlocked(&mut table, || {
                    for callback in &pending {
                        callback();
                    }
                });
                continue;
            }

            match deadline {
                Some(deadline) => {
                    let timed_out = self
                        .shared
                        .changed
                        .wait_until(&mut table, deadline)
                        .timed_out();
                    if timed_out && !table.blockers(self.id, level).is_empty() {
                        log::debug!("Lock {} timed out requesting {}", self.id, level.as_str());
                        return false;
                    }
                }
                None => self.shared.changed.wait(&mut table),
            }
        }
    }
}

impl DistributedLock for LocalLock {
    fn level(&self) -> LockLevel {
        self.shared
            .table
            .lock()
            .owners
            .get(&self.id)
            .map(|owner| owner.level)
            .unwrap_or(LockLevel::None)
    }

    fn acquire(&self, level: LockLevel, wait: LockWait) -> bool {
        debug_assert_eq!(self.level(), LockLevel::None, "acquire on a granted lock");
        self.request(level, wait)
    }

    fn convert(&self, level: LockLevel, wait: LockWait) -> bool {
        if level <= self.level() {
            let mut table = self.shared.table.lock();
            return self.shared.set_level(&mut table, self.id, level);
        }
        self.request(level, wait)
    }

    fn release(&self) {
        let mut table = self.shared.table.lock();
        self.shared.set_level(&mut table, self.id, LockLevel::None);
    }
}

impl Drop for LocalLock {
    fn drop(&mut self) {
        let mut table = self.shared.table.lock();
        table.owners.remove(&self.id);
        self.shared.changed.notify_all();
    }
}
