// SPDX-License-Identifier: GPL-3.0-only
use chrono::NaiveDate;

use crate::catalog::models::{OsType, SoftwareType, hardware_name};
use crate::error::ValidationError;

/// Lowercase board name used in build trees and storage paths
pub fn board_dir(hardware_type: u16) -> Result<String, ValidationError> {
    match hardware_name(hardware_type) {
        Some(name) => Ok(name.to_lowercase()),
        None => Err(ValidationError::Unsupported(format!(
            "unknown hardware type {}",
            hardware_type
        ))),
    }
}

fn stamp(date: NaiveDate, git_hash: &str) -> String {
    format!("{}_{}", date.format("%Y%m%d"), git_hash)
}

/// File name of the published payload
pub fn release_file_name(software: SoftwareType, date: NaiveDate, git_hash: &str) -> String {
    match software {
        SoftwareType::Bootloader => format!("bu_{}.tlfw", stamp(date, git_hash)),
        SoftwareType::Firmware => format!("fw_{}.tlfw", stamp(date, git_hash)),
        SoftwareType::Settings => format!("settings_{}.xml", stamp(date, git_hash)),
        SoftwareType::Gcs | SoftwareType::SlimGcs => format!("{}.zip", stamp(date, git_hash)),
        SoftwareType::Updater => "updater".to_string(),
    }
}

/// File list sidecar, only desktop clients carry one
pub fn script_file_name(software: SoftwareType, date: NaiveDate, git_hash: &str) -> Option<String> {
    matches!(software, SoftwareType::Gcs | SoftwareType::SlimGcs)
        .then(|| format!("{}.xml", stamp(date, git_hash)))
}

/// Server directory an artifact is stored under, always ending in `/`
///
/// `<release_path>/<OS>/<software>/` for desktop clients,
/// `<release_path>/<OS>/<board>/` for embedded software and
/// `<release_path>/<OS>/` for the updater.
pub fn remote_storage_dir(
    release_path: &str,
    os: OsType,
    software: SoftwareType,
    hardware_type: u16,
) -> Result<String, ValidationError> {
    let mut dir = format!("{}/", release_path.trim_end_matches('/'));
    dir.push_str(&os.display_name().replace(' ', ""));
    dir.push('/');

    let leaf = match software {
        SoftwareType::Updater => None,
        _ if os == OsType::Embedded => Some(board_dir(hardware_type)?),
        _ => Some(software.display_name().replace(' ', "")),
    };
    if let Some(leaf) = leaf {
        dir.push_str(&leaf);
        dir.push('/');
    }
    Ok(dir)
}
