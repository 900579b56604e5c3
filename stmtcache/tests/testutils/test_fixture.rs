//! Shared fixture for statement cache tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use stmtcache::{
    AccessChecker, CacheError, CacheResult, CompileContext, CompiledStatement, Dialect,
    LocalLockManager, RoleContext, StatementCache, StatementCacheConfig, StatementKind,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Compiled statement stand-in
#[derive(Debug)]
pub struct TestStatement {
    pub id: usize,
    pub size: AtomicUsize,
    pub kind: StatementKind,
}

impl TestStatement {
    pub fn new(size: usize) -> Self {
        Self::with_kind(size, StatementKind::Select)
    }

    pub fn with_kind(size: usize, kind: StatementKind) -> Self {
        static NEXT_ID: AtomicUsize = AtomicUsize::new(1);
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::SeqCst),
            size: AtomicUsize::new(size),
            kind,
        }
    }

    /// Simulate the statement growing while it runs
    pub fn grow_to(&self, size: usize) {
        self.size.store(size, Ordering::SeqCst);
    }

    /// Stands in for executing the statement
    pub fn execute(&self) -> usize {
        self.id
    }
}

impl CompiledStatement for TestStatement {
    fn memory_size(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    fn kind(&self) -> StatementKind {
        self.kind
    }
}

/// Access checker that counts calls and denies a configurable set of roles
#[derive(Default)]
pub struct CountingChecker {
    calls: AtomicUsize,
    denied_roles: Mutex<HashSet<String>>,
}

impl CountingChecker {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn deny(&self, role: &str) {
        self.denied_roles.lock().insert(role.to_string());
    }
}

impl AccessChecker<TestStatement> for CountingChecker {
    fn check_access(&self, _statement: &TestStatement, role: &RoleContext) -> CacheResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let denied = self.denied_roles.lock();
        match role.roles.iter().find(|r| denied.contains(*r)) {
            Some(r) => Err(CacheError::Authorization(format!(
                "no privilege to execute statement with role {}",
                r
            ))),
            None => Ok(()),
        }
    }
}

/// A cache over its own lock manager. Further caches on the same manager and
/// database behave as peer processes.
pub struct CacheFixture {
    pub lock_manager: Arc<LocalLockManager>,
    pub checker: Arc<CountingChecker>,
    pub cache: Arc<StatementCache<TestStatement>>,
}

impl CacheFixture {
    pub fn new(max_size_bytes: usize) -> Self {
        Self::with_config(StatementCacheConfig::with_max_size(max_size_bytes))
    }

    pub fn with_config(config: StatementCacheConfig) -> Self {
        init_logging();
        let lock_manager = Arc::new(LocalLockManager::new());
        let checker = Arc::new(CountingChecker::default());
        let cache = StatementCache::<TestStatement>::new(
            config,
            "fixture.fdb",
            lock_manager.clone(),
            checker.clone(),
        );

        Self {
            lock_manager,
            checker,
            cache,
        }
    }

    /// Another process attached to `database` through the fixture's lock manager
    pub fn peer(
        &self,
        database: &str,
        config: StatementCacheConfig,
    ) -> Arc<StatementCache<TestStatement>> {
        StatementCache::<TestStatement>::new(
            config,
            database,
            self.lock_manager.clone(),
            self.checker.clone(),
        )
    }

    pub fn ctx(&self) -> CompileContext {
        CompileContext::new(Dialect::V3, 4).with_search_path(["PUBLIC"])
    }

    pub fn role(&self) -> RoleContext {
        RoleContext::new(["PUBLIC"])
    }

    /// Put a statement and release it straight away, leaving it inactive
    pub fn put_idle(&self, text: &str, size: usize) {
        drop(self.cache.put(text, &self.ctx(), &self.role(), TestStatement::new(size)));
    }

    pub fn assert_consistent(&self) {
        self.cache
            .verify_consistency()
            .expect("statement cache bookkeeping is inconsistent");
    }
}
