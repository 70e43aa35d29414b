// SPDX-License-Identifier: GPL-3.0-only
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::catalog::models::{OsType, SoftwareType};
use crate::error::ValidationError;
use crate::pipeline::naming::board_dir;
use crate::utils::extracted_dir_name;

/// Where a downloaded package and its extracted tree live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagePaths {
    pub download: PathBuf,
    pub extracted: PathBuf,
}

impl PackagePaths {
    pub fn new(working_root: &Path, file_name: &str) -> Self {
        Self {
            download: working_root.join(file_name),
            extracted: working_root.join(extracted_dir_name(file_name)),
        }
    }

    /// `flight/<board>/<prefix>_<board>.tlfw` inside the extracted tree
    pub fn board_image(&self, prefix: &str, hardware_type: u16) -> Result<PathBuf, ValidationError> {
        let board = board_dir(hardware_type)?;
        Ok(self
            .extracted
            .join("flight")
            .join(&board)
            .join(format!("{}_{}.tlfw", prefix, board)))
    }
}

enum Expect {
    Dir(PathBuf),
    Symlink(PathBuf),
    File(PathBuf),
}

async fn satisfied(expect: &Expect) -> bool {
    match expect {
        Expect::Dir(path) => tokio::fs::metadata(path).await.is_ok_and(|m| m.is_dir()),
        Expect::Symlink(path) => tokio::fs::symlink_metadata(path)
            .await
            .is_ok_and(|m| m.file_type().is_symlink()),
        Expect::File(path) => tokio::fs::metadata(path).await.is_ok_and(|m| m.is_file()),
    }
}

fn expectations(
    os: OsType,
    software: SoftwareType,
    hardware_type: u16,
    paths: &PackagePaths,
) -> Result<Vec<Expect>, ValidationError> {
    let x = &paths.extracted;
    let expect = match (software, os) {
        (SoftwareType::SlimGcs, os) if os.is_linux() => vec![
            Expect::Dir(x.join("slimgcs")),
            Expect::Symlink(x.join("tbsagent")),
        ],
        (SoftwareType::Gcs, os) if os.is_linux() => vec![
            Expect::Dir(x.join("gcs")),
            Expect::Symlink(x.join("taulabsgcs")),
        ],
        (SoftwareType::Updater, os) if os.is_linux() => vec![Expect::File(paths.download.clone())],
        (SoftwareType::Settings, OsType::Embedded) => vec![Expect::File(paths.download.clone())],
        (SoftwareType::Firmware, OsType::Embedded) => {
            vec![Expect::File(paths.board_image("fw", hardware_type)?)]
        }
        (SoftwareType::Bootloader, OsType::Embedded) => {
            vec![Expect::File(paths.board_image("bu", hardware_type)?)]
        }
        _ => Vec::new(),
    };
    Ok(expect)
}

/// Verify the package contains what its software type needs
pub async fn check_layout(
    os: OsType,
    software: SoftwareType,
    hardware_type: u16,
    paths: &PackagePaths,
) -> Result<(), ValidationError> {
    for expect in expectations(os, software, hardware_type, paths)? {
        if !satisfied(&expect).await {
            let path = match expect {
                Expect::Dir(p) | Expect::Symlink(p) | Expect::File(p) => p,
            };
            return Err(ValidationError::MissingBuildFile(path.display().to_string()));
        }
    }
    debug!(os = %os, software = %software, "Package layout verified");
    Ok(())
}
