// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Cache entries and their recency lists

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use super::Fingerprint;
use crate::statement::SharedStatement;

/// Active and inactive entries ordered by the time they joined their list.
///
/// Positions come from one increasing sequence, so the first inactive
/// position is always the least recently deactivated entry.
#[derive(Debug, Default)]
pub(crate) struct EntryLists {
    active: BTreeMap<u64, Fingerprint>,
    inactive: BTreeMap<u64, Fingerprint>,
    next_position: u64,
}

impl EntryLists {
    fn next(&mut self) -> u64 {
        self.next_position += 1;
        self.next_position
    }

    pub fn push_active(&mut self, key: Fingerprint) -> u64 {
        let position = self.next();
        self.active.insert(position, key);
        position
    }

    pub fn push_inactive(&mut self, key: Fingerprint) -> u64 {
        let position = self.next();
        self.inactive.insert(position, key);
        position
    }

    pub fn unlink_active(&mut self, position: u64) -> bool {
        self.active.remove(&position).is_some()
    }

    pub fn unlink_inactive(&mut self, position: u64) -> bool {
        self.inactive.remove(&position).is_some()
    }

    /// Least recently deactivated entry
    pub fn oldest_inactive(&self) -> Option<(u64, &Fingerprint)> {
        self.inactive.iter().next().map(|(position, key)| (*position, key))
    }

    pub fn active_at(&self, position: u64) -> Option<&Fingerprint> {
        self.active.get(&position)
    }

    pub fn inactive_at(&self, position: u64) -> Option<&Fingerprint> {
        self.inactive.get(&position)
    }

    pub fn active_keys(&self) -> impl Iterator<Item = &Fingerprint> {
        self.active.values()
    }

    /// Inactive keys, least recently deactivated first
    pub fn inactive_keys(&self) -> impl Iterator<Item = &Fingerprint> {
        self.inactive.values()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn inactive_len(&self) -> usize {
        self.inactive.len()
    }

    pub fn clear(&mut self) {
        self.active.clear();
        self.inactive.clear();
    }
}

/// One cached statement
pub(crate) struct CacheEntry<S> {
    pub key: Fingerprint,
    pub statement: Arc<SharedStatement<S>>,
    /// Last sampled footprint; counts against the cache bound only while inactive
    pub size: usize,
    pub active: bool,
    /// Role contexts already authorized against this statement
    pub verified: HashSet<String>,
    /// Position in the list matching `active`
    pub position: u64,
}

impl<S> CacheEntry<S> {
    /// New entries always start active
    pub fn new_active(
        key: Fingerprint,
        statement: Arc<SharedStatement<S>>,
        size: usize,
        verify_key: String,
        lists: &mut EntryLists,
    ) -> Self {
        let position = lists.push_active(key.clone());
        let mut verified = HashSet::new();
        verified.insert(verify_key);

        Self {
            key,
            statement,
            size,
            active: true,
            verified,
            position,
        }
    }

    /// Move to the active list. Returns the bytes leaving the inactive total.
    pub fn activate(&mut self, lists: &mut EntryLists) -> usize {
        if self.active {
            return 0;
        }
        if !lists.unlink_inactive(self.position) {
            log::error!(
                "Statement cache entry {:?} was missing from the inactive list",
                self.key
            );
        }
        self.active = true;
        self.position = lists.push_active(self.key.clone());
        self.size
    }

    /// Move to the inactive list as the most recently idle entry.
    /// Returns the bytes joining the inactive total.
    pub fn deactivate(&mut self, size: usize, lists: &mut EntryLists) -> usize {
        if !self.active {
            return 0;
        }
        if !lists.unlink_active(self.position) {
            log::error!(
                "Statement cache entry {:?} was missing from the active list",
                self.key
            );
        }
        self.active = false;
        self.size = size;
        self.position = lists.push_inactive(self.key.clone());
        self.size
    }

    /// Detach from whichever list holds the entry.
    /// Returns the bytes leaving the inactive total.
    pub fn unlink(&self, lists: &mut EntryLists) -> usize {
        if self.active {
            if !lists.unlink_active(self.position) {
                log::error!(
                    "Statement cache entry {:?} was missing from the active list",
                    self.key
                );
            }
            0
        } else {
            if !lists.unlink_inactive(self.position) {
                log::error!(
                    "Statement cache entry {:?} was missing from the inactive list",
                    self.key
                );
            }
            self.size
        }
    }

    /// Whether the entry sits in exactly the list its state claims
    pub fn is_linked(&self, lists: &EntryLists) -> bool {
        let (own, other) = if self.active {
            (lists.active_at(self.position), lists.inactive_at(self.position))
        } else {
            (lists.inactive_at(self.position), lists.active_at(self.position))
        };
        own == Some(&self.key) && other.is_none()
    }
}
