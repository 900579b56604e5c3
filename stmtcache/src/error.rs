// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Error types for the shared statement cache

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Raised by the compiler collaborator, passed through unchanged
    #[error("Compilation error: {0}")]
    Compilation(String),

    /// Raised by the access-check collaborator on a cache hit
    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error("Lock conflict: {0}")]
    LockConflict(String),

    #[error("Lock request timed out after {0:?}")]
    LockTimeout(Duration),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Cache bookkeeping found in an inconsistent state
    #[error("Internal consistency violation: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
