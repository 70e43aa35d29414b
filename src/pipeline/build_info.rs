// SPDX-License-Identifier: GPL-3.0-only
use chrono::NaiveDate;
use std::path::Path;
use tracing::debug;

use crate::error::ValidationError;

pub const BUILD_INFO_FILE: &str = "BUILD_INFO";

/// Fields of a build's `BUILD_INFO` file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildInfo {
    pub branch: Option<String>,
    pub git_hash: Option<String>,
    pub date: Option<NaiveDate>,

    /// Hex digits only, separators and `0x` prefixes removed
    pub uavo_hash: Option<String>,
}

impl BuildInfo {
    /// Parse `KEY=VALUE` lines; lines without exactly one `=` are ignored
    pub fn parse(text: &str) -> Self {
        let mut info = Self::default();
        for line in text.lines() {
            let mut parts = line.split('=');
            let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
                continue;
            };
            match key {
                "BRANCH" => info.branch = Some(value.to_string()),
                "GIT_HASH" => info.git_hash = Some(value.to_string()),
                "DATE" => match NaiveDate::parse_from_str(value, "%Y%m%d") {
                    Ok(date) => info.date = Some(date),
                    Err(e) => debug!(value, error = %e, "Ignoring unparsable build date"),
                },
                "UAVO_HASH" => info.uavo_hash = Some(value.replace(',', "").replace("0x", "")),
                _ => {}
            }
        }
        info
    }

    pub async fn read(extracted_dir: &Path) -> Result<Self, ValidationError> {
        let path = extracted_dir.join(BUILD_INFO_FILE);
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ValidationError::MissingBuildInfo(format!("{}: {}", path.display(), e)))?;
        Ok(Self::parse(&text))
    }
}
