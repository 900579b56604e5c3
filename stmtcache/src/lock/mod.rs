// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Distributed lock manager contract
//!
//! The statement cache uses one lock per database purely as an invalidation
//! signal between processes. Any lock manager that honours this contract can
//! back it; [`LocalLockManager`] is the in-process implementation.

pub mod local;

pub use local::{LocalLock, LocalLockManager};

use std::sync::Arc;
use std::time::Duration;

/// Lock levels in increasing strength
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockLevel {
    None,
    SharedRead,
    SharedWrite,
    Exclusive,
}

impl LockLevel {
    /// Whether two owners may hold these levels on one resource at the same time
    pub fn compatible_with(&self, other: LockLevel) -> bool {
        match (self, other) {
            (LockLevel::None, _) | (_, LockLevel::None) => true,
            (LockLevel::Exclusive, _) | (_, LockLevel::Exclusive) => false,
            _ => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LockLevel::None => "NONE",
            LockLevel::SharedRead => "SHARED READ",
            LockLevel::SharedWrite => "SHARED WRITE",
            LockLevel::Exclusive => "EXCLUSIVE",
        }
    }
}

/// How a lock request behaves when it cannot be granted immediately
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockWait {
    /// Fail at once. Blocking holders are not notified.
    NoWait,
    /// Notify blocking holders and wait, optionally bounded
    Wait(Option<Duration>),
}

/// Invoked by the lock manager when another owner requests a conflicting level.
///
/// Runs on whatever thread the lock manager chooses and must not assume any
/// session state.
pub type BlockingCallback = Arc<dyn Fn() + Send + Sync>;

/// A lock on one resource owned by one cache instance
pub trait DistributedLock: Send + Sync {
    /// Currently granted level
    fn level(&self) -> LockLevel;

    /// Take the lock from `LockLevel::None`
    fn acquire(&self, level: LockLevel, wait: LockWait) -> bool;

    /// Change the granted level. Downgrades always succeed.
    fn convert(&self, level: LockLevel, wait: LockWait) -> bool;

    /// Drop back to `LockLevel::None`
    fn release(&self);
}

pub trait LockManager: Send + Sync {
    /// Create an ungranted lock on `resource`. `on_conflict` fires whenever a
    /// waiting request from another owner is blocked by this lock.
    fn create_lock(
        &self,
        resource: &str,
        on_conflict: BlockingCallback,
    ) -> Box<dyn DistributedLock>;
}
