// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Statement fingerprints
//!
//! A fingerprint is the byte identity of a compiled statement. Layout:
//!
//! ```text
//! dialect:u8 | internal:u8 | debug:u8 | charset:u16le | text_len:u64le | text | (schema 0x00)*
//! ```
//!
//! The text is length-prefixed so that it can never run into the search path,
//! and each search path component is null-terminated. Identifiers never
//! contain a null byte.

use std::fmt;
use std::sync::Arc;

use crate::context::{CompileContext, RoleContext};

const HEADER_LEN: usize = 3 + 2 + 8;

/// Immutable, cheaply clonable statement key
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(Arc<[u8]>);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Statement text embedded in the key
    pub fn statement_text(&self) -> Option<&str> {
        let bytes = self.as_bytes();
        if bytes.len() < HEADER_LEN {
            return None;
        }
        let len_bytes: [u8; 8] = bytes[5..HEADER_LEN].try_into().ok()?;
        let len = usize::try_from(u64::from_le_bytes(len_bytes)).ok()?;
        let text = bytes.get(HEADER_LEN..HEADER_LEN.checked_add(len)?)?;
        std::str::from_utf8(text).ok()
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fingerprint")
            .field("len", &self.0.len())
            .field("text", &self.statement_text())
            .finish()
    }
}

/// Build the cache key for `text` compiled under `ctx`
pub fn build_fingerprint(text: &str, ctx: &CompileContext) -> Fingerprint {
    let path_len: usize = ctx.search_path.iter().map(|s| s.len() + 1).sum();
    let mut key = Vec::with_capacity(HEADER_LEN + text.len() + path_len);

    key.push(ctx.dialect.code());
    key.push(ctx.is_internal as u8);
    key.push(ctx.debug_mode as u8);
    key.extend_from_slice(&ctx.charset_id.to_le_bytes());
    key.extend_from_slice(&(text.len() as u64).to_le_bytes());
    key.extend_from_slice(text.as_bytes());

    for schema in &ctx.search_path {
        debug_assert!(!schema.contains('\0'), "schema name contains a null byte");
        key.extend_from_slice(schema.as_bytes());
        key.push(0);
    }

    Fingerprint(key.into())
}

/// Key of the per-entry set of already authorized role contexts.
///
/// Role order does not matter, so the roles are sorted before joining.
pub fn verification_key(role: &RoleContext) -> String {
    let mut roles: Vec<&str> = role.roles.iter().map(String::as_str).collect();
    roles.sort_unstable();
    roles.dedup();

    let mut key = String::with_capacity(2 + roles.iter().map(|r| r.len() + 1).sum::<usize>());
    key.push(if role.is_internal { 'I' } else { 'E' });
    key.push(':');
    for role in roles {
        key.push_str(role);
        key.push('\0');
    }
    key
}
