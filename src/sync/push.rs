// SPDX-License-Identifier: GPL-3.0-only
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::catalog::models::Action;
use crate::codec;
use crate::error::TransportError;
use crate::sync::changeset::{Changeset, UploadFile, remote_parent};
use crate::sync::session::{RemoteOp, SyncSession};

/// Outcome of one remote step of a push
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpReport {
    /// Set when the step was dispatched to the server
    pub id: Option<Uuid>,
    pub description: String,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PushReport {
    pub operations: Vec<OpReport>,

    /// Slots deleted from the server and dropped from the catalog
    pub removed_slots: usize,

    /// Slots whose files are now on the server
    pub synced_slots: usize,

    /// Slots that keep their action for a later push
    pub failed_slots: usize,

    pub catalog_uploaded: bool,
}

impl PushReport {
    pub fn is_complete(&self) -> bool {
        self.failed_slots == 0 && self.catalog_uploaded
    }

    fn record_op(&mut self, outcome: Result<RemoteOp, TransportError>) -> bool {
        match outcome {
            Ok(op) => {
                self.operations.push(OpReport {
                    id: Some(op.id),
                    description: op.description,
                    success: true,
                    error: None,
                });
                true
            }
            Err(e) => {
                self.record_failure(e.operation, e.message);
                false
            }
        }
    }

    fn record_step(&mut self, description: String, outcome: Result<(), TransportError>) -> bool {
        match outcome {
            Ok(()) => {
                self.operations.push(OpReport {
                    id: None,
                    description,
                    success: true,
                    error: None,
                });
                true
            }
            Err(e) => {
                self.record_failure(description, e.to_string());
                false
            }
        }
    }

    fn record_failure(&mut self, description: String, error: String) {
        self.operations.push(OpReport {
            id: None,
            description,
            success: false,
            error: Some(error),
        });
    }
}

/// Apply `changeset` to the server and reconcile the catalog with the outcome
///
/// Deletes run first, then uploads, each one best-effort: a failed item keeps
/// its action and the rest of the batch continues. The catalog document is
/// uploaded last and lists exactly what the server now holds.
pub async fn push(
    session: &mut SyncSession,
    catalog: &mut Catalog,
    changeset: &Changeset,
    catalog_path: &str,
) -> PushReport {
    let mut report = PushReport::default();

    for target in &changeset.deletes {
        let mut all_removed = true;
        for path in &target.remote_paths {
            all_removed &= report.record_op(session.remove(path).await);
        }
        if all_removed {
            catalog.table_mut(target.category).remove(target.slot);
            report.removed_slots += 1;
        } else {
            warn!(category = %target.category, slot = target.slot, "Delete failed, keeping item for retry");
            report.failed_slots += 1;
        }
    }

    for target in &changeset.uploads {
        let mut all_uploaded = true;
        for file in &target.files {
            if !upload_file(session, &mut report, file).await {
                all_uploaded = false;
                break;
            }
        }
        if all_uploaded {
            catalog
                .table_mut(target.category)
                .set_action(target.slot, Action::None);
            report.synced_slots += 1;
        } else {
            warn!(category = %target.category, slot = target.slot, "Upload failed, keeping item for retry");
            report.failed_slots += 1;
        }
    }

    match codec::encode(&catalog.published_set()) {
        Ok(document) => {
            if upload_bytes(session, &mut report, document.as_bytes(), catalog_path).await {
                catalog.clear_metadata_changes();
                report.catalog_uploaded = true;
            }
        }
        Err(e) => report.record_failure("Encode catalog".to_string(), format!("{:#}", e)),
    }

    info!(
        removed = report.removed_slots,
        synced = report.synced_slots,
        failed = report.failed_slots,
        catalog_uploaded = report.catalog_uploaded,
        "Push finished"
    );
    report
}

async fn upload_file(session: &mut SyncSession, report: &mut PushReport, file: &UploadFile) -> bool {
    let data = match tokio::fs::read(&file.local_path).await {
        Ok(data) => data,
        Err(e) => {
            report.record_failure(format!("Read {}", file.local_path.display()), e.to_string());
            return false;
        }
    };
    upload_bytes(session, report, &data, &file.remote_path).await
}

async fn upload_bytes(
    session: &mut SyncSession,
    report: &mut PushReport,
    data: &[u8],
    remote_path: &str,
) -> bool {
    if let Some(parent) = remote_parent(remote_path) {
        let outcome = session.ensure_remote_directory(parent).await;
        if !report.record_step(format!("Ensure directory {}", parent), outcome) {
            return false;
        }
    }
    report.record_op(session.upload(data, remote_path).await)
}
