// SPDX-License-Identifier: GPL-3.0-only
use serde::Serialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::catalog::models::{Action, Artifact, Category};
use crate::catalog::Catalog;

/// Server path of a release or script link
///
/// Links with a scheme contribute their URL path; anything else is already a
/// server path.
pub fn remote_path(link: &str) -> String {
    match Url::parse(link) {
        Ok(url) if url.has_host() => url.path().to_string(),
        _ => link.to_string(),
    }
}

/// Directory part of a remote path, `None` for a bare file name
pub fn remote_parent(path: &str) -> Option<&str> {
    match path.rsplit_once('/') {
        Some(("", _)) => Some("/"),
        Some((parent, _)) => Some(parent),
        None => None,
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Local directory holding the staged files of a new artifact
pub fn local_staging_dir(working_root: &Path, category: Category, slot: u32) -> PathBuf {
    working_root
        .join(category.tag())
        .join(format!("release{}", slot))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteTarget {
    pub category: Category,
    pub slot: u32,
    pub remote_paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadFile {
    pub local_path: PathBuf,
    pub remote_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadTarget {
    pub category: Category,
    pub slot: u32,
    pub files: Vec<UploadFile>,
}

/// Remote work implied by the catalog's pending actions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Changeset {
    pub deletes: Vec<DeleteTarget>,
    pub uploads: Vec<UploadTarget>,
}

impl Changeset {
    pub fn from_catalog(catalog: &Catalog, working_root: &Path) -> Self {
        let mut changeset = Self::default();
        for category in Category::ALL {
            for (slot, entry) in catalog.table(category).iter() {
                match entry.action {
                    Action::DeleteFromServer => changeset.deletes.push(DeleteTarget {
                        category,
                        slot,
                        remote_paths: artifact_links(&entry.artifact)
                            .map(remote_path)
                            .collect(),
                    }),
                    Action::CopyToServer => {
                        let staging = local_staging_dir(working_root, category, slot);
                        let files = artifact_links(&entry.artifact)
                            .map(remote_path)
                            .map(|remote| UploadFile {
                                local_path: staging.join(file_name(&remote)),
                                remote_path: remote,
                            })
                            .collect();
                        changeset.uploads.push(UploadTarget {
                            category,
                            slot,
                            files,
                        });
                    }
                    Action::None | Action::ChangedMetadata => {}
                }
            }
        }
        changeset
    }

    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.uploads.is_empty()
    }
}

fn artifact_links(artifact: &Artifact) -> impl Iterator<Item = &str> {
    std::iter::once(artifact.release_link.as_str())
        .chain(artifact.has_script().then_some(artifact.script_link.as_str()))
}
