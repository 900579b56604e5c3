// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Per-session statement handles

use std::ops::Deref;
use std::sync::{Arc, Weak};

use super::{CompiledStatement, SharedStatement};
use crate::cache::StatementCache;

/// One session's use of a compiled statement.
///
/// Each handle counts as one active use. Cloning adds a use; dropping the last
/// use of a cached statement returns it to the cache's inactive pool. Dropping
/// never fails and never blocks on the coherency lock, and a handle stays
/// valid after the cache forgets the statement.
pub struct StatementHandle<S: CompiledStatement> {
    statement: Arc<SharedStatement<S>>,
    cache: Weak<StatementCache<S>>,
}

impl<S: CompiledStatement> StatementHandle<S> {
    /// Register a new use of `statement`
    pub(crate) fn acquire(
        statement: Arc<SharedStatement<S>>,
        cache: Weak<StatementCache<S>>,
    ) -> Self {
        statement.add_user();
        Self { statement, cache }
    }

    /// Handle for a statement that was never cached
    pub(crate) fn detached(statement: SharedStatement<S>) -> Self {
        Self::acquire(Arc::new(statement), Weak::new())
    }

    pub fn shared(&self) -> &Arc<SharedStatement<S>> {
        &self.statement
    }

    pub fn use_count(&self) -> usize {
        self.statement.use_count()
    }

    pub fn is_cached(&self) -> bool {
        self.statement.is_cached()
    }

    /// Both handles refer to the same compiled statement
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.statement, &b.statement)
    }
}

impl<S: CompiledStatement> Clone for StatementHandle<S> {
    fn clone(&self) -> Self {
        Self::acquire(self.statement.clone(), self.cache.clone())
    }
}

impl<S: CompiledStatement> Deref for StatementHandle<S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.statement.compiled()
    }
}

impl<S: CompiledStatement> Drop for StatementHandle<S> {
    fn drop(&mut self) {
        if self.statement.remove_user() > 0 {
            return;
        }
        if let Some(cache) = self.cache.upgrade() {
            cache.statement_going_inactive(&self.statement);
        }
    }
}

impl<S: CompiledStatement> std::fmt::Debug for StatementHandle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatementHandle")
            .field("statement", &self.statement)
            .finish()
    }
}
