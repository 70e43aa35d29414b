// SPDX-License-Identifier: GPL-3.0-only
use serde::Serialize;
use tracing::{info, warn};

use crate::catalog::models::{Action, Category, SoftwareType};
use crate::catalog::Catalog;
use crate::error::ValidationError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PromotionSummary {
    /// Test artifacts now in the current table
    pub promoted: usize,
    /// Current artifacts moved to the old table
    pub demoted: usize,
}

/// Move every test artifact into the current table
///
/// Current artifacts sharing a conflict key with a promoted one go to the old
/// table. All touched entries end up `ChangedMetadata`. The tables are only
/// replaced if every non-updater current artifact shares one UAVO hash.
pub fn promote(catalog: &mut Catalog) -> Result<PromotionSummary, ValidationError> {
    if catalog.has_pending_actions() {
        return Err(ValidationError::PendingChanges);
    }

    let mut current = catalog.table(Category::Current).clone();
    let mut old = catalog.table(Category::Old).clone();
    let mut summary = PromotionSummary::default();

    for (_, entry) in catalog.table(Category::Test).iter() {
        if let Some(key) = entry.artifact.conflict_key() {
            for slot in current.conflicting_slots(key) {
                if let Some(displaced) = current.remove(slot) {
                    old.insert(displaced.artifact, Action::ChangedMetadata);
                    summary.demoted += 1;
                }
            }
        }
        current.insert(entry.artifact.clone(), Action::ChangedMetadata);
        summary.promoted += 1;
    }

    let mut reference: Option<&str> = None;
    for artifact in current.artifacts() {
        if artifact.software_type == SoftwareType::Updater {
            continue;
        }
        match reference {
            None => reference = Some(&artifact.uavo_hash),
            Some(expected) if expected != artifact.uavo_hash => {
                warn!(name = %artifact.name, expected, found = %artifact.uavo_hash, "Refusing promotion");
                return Err(ValidationError::UavoHashMismatch {
                    name: artifact.name.clone(),
                    expected: expected.to_string(),
                    found: artifact.uavo_hash.clone(),
                });
            }
            Some(_) => {}
        }
    }

    catalog.replace_tables(current, old);
    info!(promoted = summary.promoted, demoted = summary.demoted, "Test release promoted");
    Ok(summary)
}
