// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Shared statement cache
//!
//! This module provides:
//! - Statement fingerprints and role verification keys
//! - Cache entries with active/inactive recency lists
//! - The size-bounded cache shared by all attachments of a database
//! - Cross-process invalidation through a coherency lock

pub mod cache_config;
pub(crate) mod coherency;
pub(crate) mod entry;
pub mod fingerprint;
pub mod statement_cache;

pub use cache_config::StatementCacheConfig;
pub use fingerprint::{build_fingerprint, verification_key, Fingerprint};
pub use statement_cache::{CacheEntrySnapshot, StatementCache, StatementCacheStats};
