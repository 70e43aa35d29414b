// SPDX-License-Identifier: GPL-3.0-only
pub mod models;
pub mod promotion;
pub mod table;

pub use models::{Action, Artifact, Category, OsType, SoftwareType};
pub use table::{Entry, Table};

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

use crate::error::ValidationError;

/// Artifacts grouped by category, the unit the catalog codec works on
pub type ReleaseSet = BTreeMap<Category, Vec<Artifact>>;

/// Outcome of deleting a catalog item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    /// The item was never pushed and has been dropped
    Removed,
    /// The item will be deleted from the server on the next push
    MarkedForDeletion,
}

/// One row of the catalog as shown to the operator
#[derive(Debug, Clone, Serialize)]
pub struct CatalogRow {
    pub category: Category,
    pub slot: u32,
    #[serde(flatten)]
    pub entry: Entry,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    current: Table,
    test: Table,
    old: Table,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh tables from a decoded document; every action starts as `None`
    pub fn from_release_set(set: ReleaseSet) -> Self {
        let mut catalog = Self::new();
        for (category, artifacts) in set {
            let table = catalog.table_mut(category);
            for artifact in artifacts {
                table.insert(artifact, Action::None);
            }
        }
        catalog
    }

    pub fn table(&self, category: Category) -> &Table {
        match category {
            Category::Current => &self.current,
            Category::Test => &self.test,
            Category::Old => &self.old,
        }
    }

    pub fn table_mut(&mut self, category: Category) -> &mut Table {
        match category {
            Category::Current => &mut self.current,
            Category::Test => &mut self.test,
            Category::Old => &mut self.old,
        }
    }

    /// Stage a new artifact in the test table
    ///
    /// Any test artifact it supersedes is marked for server deletion, or
    /// dropped if it was itself never pushed.
    pub fn add_new_item(&mut self, artifact: Artifact) -> Result<u32, ValidationError> {
        if !artifact.is_well_formed() {
            return Err(ValidationError::IllFormedArtifact {
                software: artifact.software_type.to_string(),
                os: artifact.os_type.to_string(),
            });
        }

        if let Some(key) = artifact.conflict_key() {
            for slot in self.test.conflicting_slots(key) {
                let action = self.test.get(slot).map(|entry| entry.action);
                match action {
                    Some(Action::None) => {
                        info!(slot, "Superseded test item marked for deletion");
                        self.test.set_action(slot, Action::DeleteFromServer);
                    }
                    Some(Action::CopyToServer) => {
                        info!(slot, "Dropping unsynced duplicate test item");
                        self.test.remove(slot);
                    }
                    _ => {}
                }
            }
        }

        let slot = self.test.insert(artifact, Action::CopyToServer);
        info!(slot, "Added new test item");
        Ok(slot)
    }

    /// Delete an item; additions that were never pushed are simply undone
    pub fn delete_item(
        &mut self,
        category: Category,
        slot: u32,
    ) -> Result<DeleteOutcome, ValidationError> {
        let table = self.table_mut(category);
        let action = table
            .get(slot)
            .map(|entry| entry.action)
            .ok_or(ValidationError::SlotNotFound { category, slot })?;

        if action == Action::CopyToServer {
            table.remove(slot);
            info!(%category, slot, "Removed unsynced item");
            return Ok(DeleteOutcome::Removed);
        }

        table.set_action(slot, Action::DeleteFromServer);
        info!(%category, slot, "Item marked for deletion from server");
        Ok(DeleteOutcome::MarkedForDeletion)
    }

    pub fn has_pending_actions(&self) -> bool {
        Category::ALL
            .into_iter()
            .any(|category| self.table(category).has_pending_actions())
    }

    pub fn reset_actions(&mut self) {
        for category in Category::ALL {
            self.table_mut(category).reset_actions();
        }
    }

    /// Metadata edits become final once the catalog document is uploaded
    pub fn clear_metadata_changes(&mut self) {
        for category in Category::ALL {
            self.table_mut(category)
                .replace_actions(Action::ChangedMetadata, Action::None);
        }
    }

    /// Artifacts of every category whose entry passes `keep`
    pub fn release_set<F>(&self, keep: F) -> ReleaseSet
    where
        F: Fn(&Entry) -> bool,
    {
        let mut set = ReleaseSet::new();
        for category in Category::ALL {
            let artifacts: Vec<Artifact> = self
                .table(category)
                .iter()
                .filter(|(_, entry)| keep(entry))
                .map(|(_, entry)| entry.artifact.clone())
                .collect();
            if !artifacts.is_empty() {
                set.insert(category, artifacts);
            }
        }
        set
    }

    /// What the server holds once the pending uploads are done: everything
    /// except additions that have not been pushed yet
    pub fn published_set(&self) -> ReleaseSet {
        self.release_set(|entry| entry.action != Action::CopyToServer)
    }

    pub fn rows(&self) -> Vec<CatalogRow> {
        Category::ALL
            .into_iter()
            .flat_map(|category| {
                self.table(category).iter().map(move |(slot, entry)| CatalogRow {
                    category,
                    slot,
                    entry: entry.clone(),
                })
            })
            .collect()
    }

    pub(crate) fn replace_tables(&mut self, current: Table, old: Table) {
        self.current = current;
        self.old = old;
        self.test.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::artifact;

    fn firmware(hw: u16, hash: &str) -> Artifact {
        artifact(SoftwareType::Firmware, OsType::Embedded, hw, hash, 2015, 2, 1)
    }

    fn gcs(os: OsType) -> Artifact {
        artifact(SoftwareType::Gcs, os, 0, "A", 2015, 2, 1)
    }

    #[test]
    fn test_add_new_item_marks_synced_conflict_for_deletion() {
        let mut catalog = Catalog::new();
        let existing = catalog.table_mut(Category::Test).insert(firmware(136, "A"), Action::None);

        let slot = catalog.add_new_item(firmware(136, "B")).unwrap();

        let test = catalog.table(Category::Test);
        assert_eq!(test.get(existing).unwrap().action, Action::DeleteFromServer);
        assert_eq!(test.get(slot).unwrap().action, Action::CopyToServer);
        assert_eq!(test.get(slot).unwrap().artifact.uavo_hash, "B");
        assert_eq!(test.len(), 2);
    }

    #[test]
    fn test_add_new_item_drops_unsynced_duplicate() {
        let mut catalog = Catalog::new();
        let duplicate = catalog.add_new_item(gcs(OsType::Linux64)).unwrap();
        assert_eq!(duplicate, 0);

        let slot = catalog.add_new_item(gcs(OsType::Linux64)).unwrap();

        let test = catalog.table(Category::Test);
        assert_eq!(test.len(), 1);
        assert_eq!(slot, 0);
        assert_eq!(test.get(slot).unwrap().action, Action::CopyToServer);
    }

    #[test]
    fn test_add_new_item_ignores_other_keys() {
        let mut catalog = Catalog::new();
        catalog.table_mut(Category::Test).insert(firmware(4, "A"), Action::None);
        catalog.table_mut(Category::Test).insert(gcs(OsType::Win32), Action::None);

        catalog.add_new_item(firmware(136, "A")).unwrap();
        catalog.add_new_item(gcs(OsType::Linux64)).unwrap();

        let test = catalog.table(Category::Test);
        assert_eq!(test.get(0).unwrap().action, Action::None);
        assert_eq!(test.get(1).unwrap().action, Action::None);
        assert_eq!(test.len(), 4);
    }

    #[test]
    fn test_add_new_item_settings_never_conflict() {
        let mut catalog = Catalog::new();
        let settings = artifact(SoftwareType::Settings, OsType::Embedded, 4, "A", 2015, 1, 1);
        catalog.table_mut(Category::Test).insert(settings.clone(), Action::None);

        catalog.add_new_item(settings).unwrap();

        let test = catalog.table(Category::Test);
        assert_eq!(test.get(0).unwrap().action, Action::None);
        assert_eq!(test.len(), 2);
    }

    #[test]
    fn test_add_new_item_rejects_ill_formed() {
        let mut catalog = Catalog::new();
        let bad = artifact(SoftwareType::Firmware, OsType::Linux64, 4, "A", 2015, 1, 1);

        let err = catalog.add_new_item(bad).unwrap_err();
        assert!(matches!(err, ValidationError::IllFormedArtifact { .. }));
        assert!(catalog.table(Category::Test).is_empty());
    }

    #[test]
    fn test_delete_item_undo_and_mark() {
        let mut catalog = Catalog::new();
        let synced = catalog.table_mut(Category::Current).insert(firmware(1, "A"), Action::None);
        let staged = catalog.add_new_item(firmware(2, "A")).unwrap();

        assert_eq!(
            catalog.delete_item(Category::Test, staged).unwrap(),
            DeleteOutcome::Removed
        );
        assert!(catalog.table(Category::Test).is_empty());

        assert_eq!(
            catalog.delete_item(Category::Current, synced).unwrap(),
            DeleteOutcome::MarkedForDeletion
        );
        let entry = catalog.table(Category::Current).get(synced).unwrap();
        assert_eq!(entry.action, Action::DeleteFromServer);
    }

    #[test]
    fn test_delete_item_missing_slot() {
        let mut catalog = Catalog::new();
        let err = catalog.delete_item(Category::Old, 3).unwrap_err();
        assert_eq!(err, ValidationError::SlotNotFound { category: Category::Old, slot: 3 });
    }

    #[test]
    fn test_from_release_set_resets_actions() {
        let mut set = ReleaseSet::new();
        set.insert(Category::Current, vec![firmware(1, "A"), firmware(2, "A")]);
        set.insert(Category::Old, vec![firmware(1, "Z")]);

        let catalog = Catalog::from_release_set(set);
        assert_eq!(catalog.table(Category::Current).len(), 2);
        assert_eq!(catalog.table(Category::Old).len(), 1);
        assert!(catalog.table(Category::Test).is_empty());
        assert!(!catalog.has_pending_actions());
    }

    #[test]
    fn test_published_set_excludes_unpushed_additions() {
        let mut catalog = Catalog::new();
        catalog.table_mut(Category::Current).insert(firmware(1, "A"), Action::DeleteFromServer);
        catalog.add_new_item(firmware(2, "A")).unwrap();

        let set = catalog.published_set();
        assert_eq!(set.get(&Category::Current).map(Vec::len), Some(1));
        assert!(!set.contains_key(&Category::Test));
    }
}
