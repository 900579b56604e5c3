// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! StmtCache - a shared compiled-statement cache for SQL engines
//!
//! Every attachment to a database shares one [`StatementCache`]. A request
//! to prepare a statement is keyed by its text plus every setting that
//! affects compilation; a hit hands out the already compiled statement, a
//! miss lets the caller compile and `put` it.
//!
//! # Features
//!
//! - **Exact keys**: dialect, origin, debug mode, character set and schema
//!   search path all take part in the fingerprint
//! - **Shared ownership**: statements stay valid for their users after the
//!   cache forgets them
//! - **Soft size bound**: idle statements are evicted least recently used first
//! - **Access caching**: authorization is checked once per role context
//! - **Cross-process coherency**: a distributed lock lets one process make
//!   every other process purge its cache
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stmtcache::{AllowAll, LocalLockManager, StatementCache, StatementCacheConfig};
//!
//! let cache = StatementCache::new(
//!     StatementCacheConfig::default(),
//!     "employee.fdb",
//!     LocalLockManager::global(),
//!     Arc::new(AllowAll),
//! );
//!
//! let handle = cache.prepare("SELECT * FROM EMPLOYEE", &ctx, &role, &compiler)?;
//! ```

pub mod cache;
pub mod context;
pub mod error;
pub mod lock;
pub mod statement;

pub use cache::{
    build_fingerprint, verification_key, CacheEntrySnapshot, Fingerprint, StatementCache,
    StatementCacheConfig, StatementCacheStats,
};
pub use context::{CompileContext, Dialect, RoleContext};
pub use error::{CacheError, CacheResult};
pub use lock::{
    BlockingCallback, DistributedLock, LocalLockManager, LockLevel, LockManager, LockWait,
};
pub use statement::{
    AccessChecker, AllowAll, CompiledStatement, SharedStatement, StatementCompiler,
    StatementHandle, StatementKind,
};

/// StmtCache version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// StmtCache crate name
pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");
