// SPDX-License-Identifier: GPL-3.0-only
use anyhow::Context;
use chrono::{Local, NaiveDate};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::catalog::models::{Artifact, OsType, SoftwareType};
use crate::config::Config;
use crate::error::{ReleaseError, ValidationError};
use crate::events::EventBus;
use crate::extractor::Extractor;
use crate::pipeline::build_info::BuildInfo;
use crate::pipeline::layout::{PackagePaths, check_layout};
use crate::pipeline::naming::{board_dir, release_file_name, remote_storage_dir, script_file_name};
use crate::pipeline::process::ProcessRunner;
use crate::utils::calculate_file_md5;

/// Directory under the working root where payloads are collected
pub const STAGING_DIR: &str = "releases";

/// Output directory of the desktop packaging script
const SCRIPT_OUTPUT_DIR: &str = "currentbuild";

/// Operator input for a new artifact
#[derive(Debug, Clone, Deserialize)]
pub struct NewItemRequest {
    pub software_type: SoftwareType,
    pub os_type: OsType,
    #[serde(default)]
    pub hardware_type: u16,
    pub name: String,
    pub package_link: String,

    /// Fallbacks for packages without a BUILD_INFO file
    #[serde(default)]
    pub uavo_hash: String,
    #[serde(default)]
    pub git_hash: String,
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

impl NewItemRequest {
    /// Reject combinations no package can satisfy, before anything is downloaded
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.software_type.is_embedded() != (self.os_type == OsType::Embedded) {
            return Err(ValidationError::IllFormedArtifact {
                software: self.software_type.to_string(),
                os: self.os_type.to_string(),
            });
        }
        if self.software_type == SoftwareType::Updater && !self.os_type.is_linux() {
            return Err(ValidationError::Unsupported(format!(
                "updater packages for {}",
                self.os_type
            )));
        }
        if self.os_type == OsType::Embedded {
            board_dir(self.hardware_type)?;
        }
        Ok(())
    }

    fn needs_build_tree(&self) -> bool {
        !matches!(self.software_type, SoftwareType::Settings | SoftwareType::Updater)
    }
}

/// Artifact ready to be added, with its payload files staged locally
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedItem {
    pub artifact: Artifact,
    pub staging_dir: PathBuf,
}

/// Turns a downloaded package into a staged artifact
pub struct ItemBuilder<'a> {
    config: &'a Config,
    extractor: &'a dyn Extractor,
    runner: ProcessRunner,
    events: &'a EventBus,
}

impl<'a> ItemBuilder<'a> {
    pub fn new(config: &'a Config, extractor: &'a dyn Extractor, events: &'a EventBus) -> Self {
        Self {
            config,
            extractor,
            runner: ProcessRunner::new(events.clone()),
            events,
        }
    }

    /// Process the package at `paths`
    ///
    /// `fresh_download` is false when the extracted tree was already present,
    /// in which case extraction is skipped.
    pub async fn build(
        &self,
        request: &NewItemRequest,
        paths: &PackagePaths,
        fresh_download: bool,
    ) -> Result<PreparedItem, ReleaseError> {
        request.validate()?;
        let software = request.software_type;

        if fresh_download && request.needs_build_tree() {
            self.extract(&paths.download).await?;
        }

        self.events.message("Checking package contents");
        check_layout(request.os_type, software, request.hardware_type, paths).await?;

        let info = if request.needs_build_tree() {
            self.events.message("Processing BUILD_INFO");
            BuildInfo::read(&paths.extracted).await?
        } else {
            BuildInfo::default()
        };
        let git_hash = info.git_hash.unwrap_or_else(|| request.git_hash.clone());
        let uavo_hash = info.uavo_hash.unwrap_or_else(|| request.uavo_hash.clone());
        let date = info
            .date
            .or(request.date)
            .unwrap_or_else(|| Local::now().date_naive());

        if matches!(software, SoftwareType::Gcs | SoftwareType::SlimGcs) {
            self.run_packaging_script(request.os_type, &paths.extracted).await?;
        }

        let root = &self.config.working_root;
        let staging_dir = root.join(STAGING_DIR);
        reset_dir(&staging_dir).await?;

        let remote_dir = remote_storage_dir(
            &self.config.ftp.release_path,
            request.os_type,
            software,
            request.hardware_type,
        )?;
        let script_output = root.join(SCRIPT_OUTPUT_DIR);
        let payload = match software {
            SoftwareType::Bootloader => paths.board_image("bu", request.hardware_type)?,
            SoftwareType::Firmware => paths.board_image("fw", request.hardware_type)?,
            SoftwareType::Settings | SoftwareType::Updater => paths.download.clone(),
            SoftwareType::Gcs | SoftwareType::SlimGcs => script_output.join("app.zip"),
        };

        let release_file = release_file_name(software, date, &git_hash);
        let staged = staging_dir.join(&release_file);
        stage(&payload, &staged).await?;
        let md5 = calculate_file_md5(&staged).await?;

        let script_link = match script_file_name(software, date, &git_hash) {
            Some(script_file) => {
                stage(&script_output.join("file_list.xml"), &staging_dir.join(&script_file)).await?;
                format!("{}{}", remote_dir, script_file)
            }
            None => String::new(),
        };

        let artifact = Artifact {
            software_type: software,
            os_type: request.os_type,
            hardware_type: if request.os_type == OsType::Embedded {
                request.hardware_type
            } else {
                0
            },
            name: request.name.clone(),
            uavo_hash,
            md5,
            package_link: request.package_link.clone(),
            release_link: format!("{}{}", remote_dir, release_file),
            script_link,
            date,
        };

        info!(
            software = %software,
            os = %request.os_type,
            release_link = %artifact.release_link,
            "Release package staged"
        );
        self.events.message("Release packages copied to local staging directory");
        Ok(PreparedItem {
            artifact,
            staging_dir,
        })
    }

    async fn extract(&self, archive: &Path) -> Result<(), ReleaseError> {
        let root = &self.config.working_root;
        self.events
            .message(format!("Decompressing {}", archive.display()));

        if archive.extension().is_some_and(|ext| ext == "zip") {
            self.extractor
                .extract_zip(archive.to_path_buf(), root.clone())
                .await?;
        } else {
            let args = [
                "-xvf".to_string(),
                archive.display().to_string(),
                "-C".to_string(),
                root.display().to_string(),
            ];
            self.runner.run("tar", &args, None).await?;
        }
        Ok(())
    }

    async fn run_packaging_script(&self, os: OsType, extracted: &Path) -> Result<(), ReleaseError> {
        let root = &self.config.working_root;
        let output = root.join(SCRIPT_OUTPUT_DIR);
        if tokio::fs::try_exists(&output).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&output)
                .await
                .with_context(|| format!("Failed to clear {}", output.display()))?;
        }

        let scripts = &self.config.scripts;
        let args = [
            scripts.ruby_script_path.clone(),
            "-p".to_string(),
            os.display_name().replace(' ', ""),
            "-v".to_string(),
            "0".to_string(),
            "-u".to_string(),
            scripts.updater_binary(os).to_string(),
            format!("{}/", extracted.display()),
            scripts.updater_script(os).to_string(),
            format!("./{}", SCRIPT_OUTPUT_DIR),
        ];
        self.runner.run("ruby", &args, Some(root)).await?;

        for produced in ["app.zip", "file_list.xml"] {
            let path = output.join(produced);
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Err(ValidationError::MissingBuildFile(path.display().to_string()).into());
            }
        }
        Ok(())
    }
}

async fn reset_dir(dir: &Path) -> anyhow::Result<()> {
    if tokio::fs::try_exists(dir).await.unwrap_or(false) {
        tokio::fs::remove_dir_all(dir)
            .await
            .with_context(|| format!("Failed to clear {}", dir.display()))?;
    }
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    Ok(())
}

async fn stage(source: &Path, dest: &Path) -> Result<(), ReleaseError> {
    if !tokio::fs::try_exists(source).await.unwrap_or(false) {
        return Err(ValidationError::MissingBuildFile(source.display().to_string()).into());
    }
    tokio::fs::copy(source, dest)
        .await
        .with_context(|| format!("Failed to copy {} to {}", source.display(), dest.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::ZipExtractor;
    use crate::test_helpers::{create_temp_dir, create_test_config};
    use std::io::Write;
    use zip::write::FileOptions;

    fn request(software_type: SoftwareType, os_type: OsType, hardware_type: u16, link: &str) -> NewItemRequest {
        NewItemRequest {
            software_type,
            os_type,
            hardware_type,
            name: "Nightly".to_string(),
            package_link: link.to_string(),
            uavo_hash: String::new(),
            git_hash: String::new(),
            date: None,
        }
    }

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let mut writer = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
        for (name, body) in entries {
            writer.start_file(*name, FileOptions::default()).unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    #[tokio::test]
    async fn test_firmware_from_zip_package() {
        let dir = create_temp_dir();
        let config = create_test_config(dir.path());
        let events = EventBus::new();
        let extractor = ZipExtractor::new();
        let builder = ItemBuilder::new(&config, &extractor, &events);

        write_zip(
            &dir.path().join("build.zip"),
            &[
                ("build/BUILD_INFO", "GIT_HASH=1a2b\nDATE=20150201\nUAVO_HASH=0xab,0xcd\n"),
                ("build/flight/sparky/fw_sparky.tlfw", "firmware image"),
            ],
        );
        let paths = PackagePaths::new(dir.path(), "build.zip");
        let req = request(
            SoftwareType::Firmware,
            OsType::Embedded,
            136,
            "https://builds.example.com/nightly/build.zip",
        );

        let item = builder.build(&req, &paths, true).await.unwrap();

        let artifact = &item.artifact;
        assert_eq!(artifact.release_link, "/releases/Embeded/sparky/fw_20150201_1a2b.tlfw");
        assert_eq!(artifact.script_link, "");
        assert_eq!(artifact.uavo_hash, "abcd");
        assert_eq!(artifact.date, NaiveDate::from_ymd_opt(2015, 2, 1).unwrap());
        assert_eq!(artifact.md5, format!("{:x}", md5::compute("firmware image")));
        assert_eq!(artifact.hardware_type, 136);
        assert_eq!(item.staging_dir, dir.path().join(STAGING_DIR));
        assert_eq!(
            std::fs::read_to_string(item.staging_dir.join("fw_20150201_1a2b.tlfw")).unwrap(),
            "firmware image"
        );
    }

    #[tokio::test]
    async fn test_already_extracted_tree_is_reused() {
        let dir = create_temp_dir();
        let config = create_test_config(dir.path());
        let events = EventBus::new();
        let extractor = ZipExtractor::new();
        let builder = ItemBuilder::new(&config, &extractor, &events);

        let tree = dir.path().join("build");
        std::fs::create_dir_all(tree.join("flight/revolution")).unwrap();
        std::fs::write(tree.join("BUILD_INFO"), "GIT_HASH=ffee\nDATE=20150310\n").unwrap();
        std::fs::write(tree.join("flight/revolution/bu_revolution.tlfw"), "bl").unwrap();

        // No archive on disk: extraction must not be attempted
        let paths = PackagePaths::new(dir.path(), "build.zip");
        let req = request(SoftwareType::Bootloader, OsType::Embedded, 127, "/uploads/build.zip");
        let item = builder.build(&req, &paths, false).await.unwrap();

        assert_eq!(
            item.artifact.release_link,
            "/releases/Embeded/revolution/bu_20150310_ffee.tlfw"
        );
    }

    #[tokio::test]
    async fn test_settings_use_request_fields() {
        let dir = create_temp_dir();
        let config = create_test_config(dir.path());
        let events = EventBus::new();
        let extractor = ZipExtractor::new();
        let builder = ItemBuilder::new(&config, &extractor, &events);

        std::fs::write(dir.path().join("defaults.xml"), "<settings/>").unwrap();
        let paths = PackagePaths::new(dir.path(), "defaults.xml");
        let mut req = request(SoftwareType::Settings, OsType::Embedded, 0, "/uploads/defaults.xml");
        req.git_hash = "c0ffee".to_string();
        req.uavo_hash = "A".to_string();
        req.date = NaiveDate::from_ymd_opt(2015, 3, 1);

        let item = builder.build(&req, &paths, true).await.unwrap();
        assert_eq!(
            item.artifact.release_link,
            "/releases/Embeded/none/settings_20150301_c0ffee.xml"
        );
        assert_eq!(item.artifact.uavo_hash, "A");
        assert!(item.staging_dir.join("settings_20150301_c0ffee.xml").is_file());
    }

    #[tokio::test]
    async fn test_missing_build_info() {
        let dir = create_temp_dir();
        let config = create_test_config(dir.path());
        let events = EventBus::new();
        let extractor = ZipExtractor::new();
        let builder = ItemBuilder::new(&config, &extractor, &events);

        write_zip(
            &dir.path().join("build.zip"),
            &[("build/flight/sparky/fw_sparky.tlfw", "fw")],
        );
        let paths = PackagePaths::new(dir.path(), "build.zip");
        let req = request(SoftwareType::Firmware, OsType::Embedded, 136, "/uploads/build.zip");

        let err = builder.build(&req, &paths, true).await.unwrap_err();
        assert!(matches!(
            err,
            ReleaseError::Validation(ValidationError::MissingBuildInfo(_))
        ));
    }

    #[test]
    fn test_request_validation() {
        let updater = request(SoftwareType::Updater, OsType::Win32, 0, "/u/updater");
        assert!(matches!(updater.validate(), Err(ValidationError::Unsupported(_))));

        let misplaced = request(SoftwareType::Gcs, OsType::Embedded, 0, "/u/gcs.zip");
        assert!(matches!(
            misplaced.validate(),
            Err(ValidationError::IllFormedArtifact { .. })
        ));

        let unknown_board = request(SoftwareType::Firmware, OsType::Embedded, 42, "/u/fw.zip");
        assert!(matches!(unknown_board.validate(), Err(ValidationError::Unsupported(_))));

        assert!(request(SoftwareType::Updater, OsType::Linux64, 0, "/u/updater").validate().is_ok());
    }
}
