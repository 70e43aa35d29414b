// SPDX-License-Identifier: GPL-3.0-only
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::catalog::models::{Action, Artifact, ConflictKey};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub artifact: Artifact,
    pub action: Action,
}

/// Slot-keyed artifacts of one category
///
/// Slots are stable identifiers: removing an entry never renumbers the others,
/// and new entries take the lowest free slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    entries: BTreeMap<u32, Entry>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Smallest slot not currently in use
    pub fn first_free_slot(&self) -> u32 {
        let mut candidate = 0;
        // Keys are ascending, so the first gap is the answer
        for slot in self.entries.keys() {
            if *slot != candidate {
                break;
            }
            candidate += 1;
        }
        candidate
    }

    pub fn insert(&mut self, artifact: Artifact, action: Action) -> u32 {
        let slot = self.first_free_slot();
        self.entries.insert(slot, Entry { artifact, action });
        slot
    }

    /// No-op when the slot is absent
    pub fn set_action(&mut self, slot: u32, action: Action) {
        match self.entries.get_mut(&slot) {
            Some(entry) => entry.action = action,
            None => debug!(slot, "Ignoring action change for missing slot"),
        }
    }

    pub fn remove(&mut self, slot: u32) -> Option<Entry> {
        self.entries.remove(&slot)
    }

    pub fn get(&self, slot: u32) -> Option<&Entry> {
        self.entries.get(&slot)
    }

    pub fn contains(&self, slot: u32) -> bool {
        self.entries.contains_key(&slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &Entry)> {
        self.entries.iter().map(|(slot, entry)| (*slot, entry))
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
        self.entries.values().map(|entry| &entry.artifact)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn has_pending_actions(&self) -> bool {
        self.entries.values().any(|entry| entry.action != Action::None)
    }

    pub fn reset_actions(&mut self) {
        for entry in self.entries.values_mut() {
            entry.action = Action::None;
        }
    }

    /// Switch every entry carrying `from` to `to`
    pub fn replace_actions(&mut self, from: Action, to: Action) {
        for entry in self.entries.values_mut().filter(|entry| entry.action == from) {
            entry.action = to;
        }
    }

    /// Slots whose artifact shares `key`, in ascending order
    pub fn conflicting_slots(&self, key: ConflictKey) -> Vec<u32> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.artifact.conflict_key() == Some(key))
            .map(|(slot, _)| *slot)
            .collect()
    }
}
