// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Statement cache configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{CacheError, CacheResult};

/// Environment variable overriding `max_size_bytes`
pub const ENV_MAX_SIZE: &str = "STMTCACHE_MAX_SIZE";
/// Environment variable overriding `lock_timeout`, in milliseconds. `0` waits forever.
pub const ENV_LOCK_TIMEOUT_MS: &str = "STMTCACHE_LOCK_TIMEOUT_MS";

/// Database-level statement cache configuration, read once when the cache is built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatementCacheConfig {
    /// Soft bound on the summed size of inactive statements (bytes).
    /// `0` disables the cache.
    pub max_size_bytes: usize,

    /// Bound on the exclusive lock wait in `purge_all_attachments`.
    /// `None` waits indefinitely.
    pub lock_timeout: Option<Duration>,
}

impl Default for StatementCacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 2 * 1024 * 1024, // 2MB
            lock_timeout: Some(Duration::from_secs(10)),
        }
    }
}

impl StatementCacheConfig {
    pub fn with_max_size(max_size_bytes: usize) -> Self {
        Self {
            max_size_bytes,
            ..Self::default()
        }
    }

    /// Configuration with caching turned off
    pub fn disabled() -> Self {
        Self::with_max_size(0)
    }

    pub fn is_enabled(&self) -> bool {
        self.max_size_bytes > 0
    }

    pub fn from_json_str(json: &str) -> CacheResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> CacheResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Apply `STMTCACHE_MAX_SIZE` and `STMTCACHE_LOCK_TIMEOUT_MS` if set
    pub fn with_env_overrides(self) -> CacheResult<Self> {
        self.with_overrides(
            std::env::var(ENV_MAX_SIZE).ok().as_deref(),
            std::env::var(ENV_LOCK_TIMEOUT_MS).ok().as_deref(),
        )
    }

    fn with_overrides(
        mut self,
        max_size: Option<&str>,
        lock_timeout_ms: Option<&str>,
    ) -> CacheResult<Self> {
        if let Some(value) = max_size {
            self.max_size_bytes = value.trim().parse().map_err(|_| {
                CacheError::Config(format!("{} is not a byte count: {:?}", ENV_MAX_SIZE, value))
            })?;
        }

        if let Some(value) = lock_timeout_ms {
            let millis: u64 = value.trim().parse().map_err(|_| {
                CacheError::Config(format!(
                    "{} is not a millisecond count: {:?}",
                    ENV_LOCK_TIMEOUT_MS, value
                ))
            })?;
            self.lock_timeout = if millis == 0 {
                None
            } else {
                Some(Duration::from_millis(millis))
            };
        }

        self.validate()?;
        Ok(self)
    }

    /// Validate the configuration
    pub fn validate(&self) -> CacheResult<()> {
        if let Some(timeout) = self.lock_timeout {
            if timeout.is_zero() {
                return Err(CacheError::Config(
                    "lock_timeout must be positive; omit it to wait indefinitely".to_string(),
                ));
            }
        }
        Ok(())
    }
}
