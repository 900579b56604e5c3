// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Compilation and authorization context carried by a session request
//!
//! `CompileContext` holds every setting that changes how a statement text is
//! compiled and therefore participates in the cache fingerprint.
//! `RoleContext` holds the privileges a session executes under; it only decides
//! whether an access check has to be repeated for an already cached statement.

use serde::{Deserialize, Serialize};

/// SQL client dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dialect {
    /// Legacy dialect: double-quoted strings, float-typed decimals
    V1,
    /// Transitional dialect, rejects constructs that differ between V1 and V3
    V2,
    /// Current dialect: delimited identifiers, exact numerics, date/time types
    V3,
}

impl Dialect {
    /// Numeric dialect code as sent by clients
    pub fn code(&self) -> u8 {
        match self {
            Dialect::V1 => 1,
            Dialect::V2 => 2,
            Dialect::V3 => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Dialect::V1),
            2 => Some(Dialect::V2),
            3 => Some(Dialect::V3),
            _ => None,
        }
    }
}

impl Default for Dialect {
    fn default() -> Self {
        Dialect::V3
    }
}

/// Settings a statement was compiled under
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompileContext {
    pub dialect: Dialect,
    /// Statement issued by the engine itself rather than by a client
    pub is_internal: bool,
    /// Compile with debug information (source positions, variable names)
    pub debug_mode: bool,
    /// Attachment character set
    pub charset_id: u16,
    /// Schema search path in resolution order
    pub search_path: Vec<String>,
}

impl CompileContext {
    pub fn new(dialect: Dialect, charset_id: u16) -> Self {
        Self {
            dialect,
            is_internal: false,
            debug_mode: false,
            charset_id,
            search_path: Vec::new(),
        }
    }

    pub fn internal(mut self) -> Self {
        self.is_internal = true;
        self
    }

    pub fn with_debug_mode(mut self, debug_mode: bool) -> Self {
        self.debug_mode = debug_mode;
        self
    }

    pub fn with_search_path<I, T>(mut self, path: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.search_path = path.into_iter().map(Into::into).collect();
        self
    }
}

impl Default for CompileContext {
    fn default() -> Self {
        Self::new(Dialect::default(), 0)
    }
}

/// Effective privileges a session executes a statement under
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RoleContext {
    pub is_internal: bool,
    /// Granted roles in effect for the session
    pub roles: Vec<String>,
}

impl RoleContext {
    pub fn new<I, T>(roles: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            is_internal: false,
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    /// Context of a request issued by the engine itself
    pub fn internal() -> Self {
        Self {
            is_internal: true,
            roles: Vec::new(),
        }
    }
}
