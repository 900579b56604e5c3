// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Compiled statements and the collaborators that produce and authorize them
//!
//! The cache never compiles or executes SQL. It stores whatever a
//! [`StatementCompiler`] produced, wrapped in a [`SharedStatement`], and hands
//! out [`StatementHandle`]s that keep the statement alive for each session.

pub mod handle;

pub use handle::StatementHandle;

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::cache::Fingerprint;
use crate::context::{CompileContext, RoleContext};
use crate::error::CacheResult;

/// Statement classes as reported by the compiler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Select,
    SelectForUpdate,
    Insert,
    Update,
    Delete,
    UpdateOrInsert,
    Merge,
    ExecProcedure,
    ExecBlock,
    Ddl,
    SetTransaction,
    Commit,
    Rollback,
    Savepoint,
    SessionManagement,
}

impl StatementKind {
    /// DML-class statements can be shared between attachments. DDL, transaction
    /// control and session management statements are never cached.
    pub fn is_reusable(&self) -> bool {
        matches!(
            self,
            StatementKind::Select
                | StatementKind::SelectForUpdate
                | StatementKind::Insert
                | StatementKind::Update
                | StatementKind::Delete
                | StatementKind::UpdateOrInsert
                | StatementKind::Merge
                | StatementKind::ExecProcedure
                | StatementKind::ExecBlock
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::Select => "SELECT",
            StatementKind::SelectForUpdate => "SELECT FOR UPDATE",
            StatementKind::Insert => "INSERT",
            StatementKind::Update => "UPDATE",
            StatementKind::Delete => "DELETE",
            StatementKind::UpdateOrInsert => "UPDATE OR INSERT",
            StatementKind::Merge => "MERGE",
            StatementKind::ExecProcedure => "EXECUTE PROCEDURE",
            StatementKind::ExecBlock => "EXECUTE BLOCK",
            StatementKind::Ddl => "DDL",
            StatementKind::SetTransaction => "SET TRANSACTION",
            StatementKind::Commit => "COMMIT",
            StatementKind::Rollback => "ROLLBACK",
            StatementKind::Savepoint => "SAVEPOINT",
            StatementKind::SessionManagement => "SESSION MANAGEMENT",
        }
    }
}

/// A compiled, executable statement produced by the compiler collaborator
pub trait CompiledStatement: Send + Sync + 'static {
    /// Approximate memory footprint in bytes. May grow while the statement
    /// executes; the cache samples it when the statement goes idle.
    fn memory_size(&self) -> usize;

    fn kind(&self) -> StatementKind;
}

/// Compiler collaborator: turns text into a statement or fails
pub trait StatementCompiler<S>: Send + Sync {
    fn compile(&self, text: &str, ctx: &CompileContext) -> CacheResult<S>;
}

impl<S, F> StatementCompiler<S> for F
where
    F: Fn(&str, &CompileContext) -> CacheResult<S> + Send + Sync,
{
    fn compile(&self, text: &str, ctx: &CompileContext) -> CacheResult<S> {
        self(text, ctx)
    }
}

/// Access-check collaborator: fails with `CacheError::Authorization` or succeeds
pub trait AccessChecker<S>: Send + Sync {
    fn check_access(&self, statement: &S, role: &RoleContext) -> CacheResult<()>;
}

impl<S, F> AccessChecker<S> for F
where
    F: Fn(&S, &RoleContext) -> CacheResult<()> + Send + Sync,
{
    fn check_access(&self, statement: &S, role: &RoleContext) -> CacheResult<()> {
        self(statement, role)
    }
}

/// Access checker that grants everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl<S> AccessChecker<S> for AllowAll {
    fn check_access(&self, _statement: &S, _role: &RoleContext) -> CacheResult<()> {
        Ok(())
    }
}

/// Compiled statement shared by the cache and every session using it
pub struct SharedStatement<S> {
    compiled: S,
    /// Key under which the cache currently indexes this statement
    cache_key: Mutex<Option<Fingerprint>>,
    /// Live handles
    users: AtomicUsize,
}

impl<S: CompiledStatement> SharedStatement<S> {
    pub(crate) fn new(compiled: S) -> Self {
        Self {
            compiled,
            cache_key: Mutex::new(None),
            users: AtomicUsize::new(0),
        }
    }

    pub fn compiled(&self) -> &S {
        &self.compiled
    }

    pub fn kind(&self) -> StatementKind {
        self.compiled.kind()
    }

    pub fn memory_size(&self) -> usize {
        self.compiled.memory_size()
    }

    pub fn cache_key(&self) -> Option<Fingerprint> {
        self.cache_key.lock().clone()
    }

    /// Whether the cache still indexes this statement
    pub fn is_cached(&self) -> bool {
        self.cache_key.lock().is_some()
    }

    /// Number of handles currently using the statement
    pub fn use_count(&self) -> usize {
        self.users.load(Ordering::SeqCst)
    }

    pub(crate) fn set_cache_key(&self, key: Fingerprint) {
        *self.cache_key.lock() = Some(key);
    }

    pub(crate) fn clear_cache_key(&self) {
        *self.cache_key.lock() = None;
    }

    pub(crate) fn add_user(&self) {
        self.users.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns the number of users left
    pub(crate) fn remove_user(&self) -> usize {
        let previous = self
            .users
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        previous.saturating_sub(1)
    }
}

impl<S> std::fmt::Debug for SharedStatement<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStatement")
            .field("cache_key", &*self.cache_key.lock())
            .field("users", &self.users.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(usize);

    impl CompiledStatement for Fixed {
        fn memory_size(&self) -> usize {
            self.0
        }

        fn kind(&self) -> StatementKind {
            StatementKind::Select
        }
    }

    #[test]
    fn test_reusable_kinds() {
        assert!(StatementKind::Select.is_reusable());
        assert!(StatementKind::Merge.is_reusable());
        assert!(StatementKind::ExecBlock.is_reusable());
        assert!(!StatementKind::Ddl.is_reusable());
        assert!(!StatementKind::SetTransaction.is_reusable());
        assert!(!StatementKind::Commit.is_reusable());
        assert!(!StatementKind::SessionManagement.is_reusable());
    }

    #[test]
    fn test_user_count_never_underflows() {
        let stmt = SharedStatement::new(Fixed(10));
        stmt.add_user();
        assert_eq!(stmt.remove_user(), 0);
        assert_eq!(stmt.remove_user(), 0);
        assert_eq!(stmt.use_count(), 0);
    }

    #[test]
    fn test_closure_collaborators() {
        let compiler = |text: &str, _ctx: &CompileContext| -> CacheResult<Fixed> {
            Ok(Fixed(text.len()))
        };
        let compiled = compiler.compile("SELECT 1", &CompileContext::default()).unwrap();
        assert_eq!(compiled.memory_size(), 8);

        let deny = |_stmt: &Fixed, role: &RoleContext| -> CacheResult<()> {
            if role.roles.is_empty() {
                Err(crate::error::CacheError::Authorization("no role".to_string()))
            } else {
                Ok(())
            }
        };
        assert!(deny.check_access(&compiled, &RoleContext::default()).is_err());
        assert!(deny.check_access(&compiled, &RoleContext::new(["R"])).is_ok());
    }
}
