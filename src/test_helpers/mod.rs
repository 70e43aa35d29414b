// SPDX-License-Identifier: GPL-3.0-only
use chrono::NaiveDate;
use std::net::SocketAddr;
use std::path::Path;

use crate::catalog::models::{Artifact, OsType, SoftwareType};
use crate::config::Config;

/// Build an artifact with predictable links derived from its identity
pub fn artifact(
    software_type: SoftwareType,
    os_type: OsType,
    hardware_type: u16,
    uavo_hash: &str,
    year: i32,
    month: u32,
    day: u32,
) -> Artifact {
    let date = NaiveDate::from_ymd_opt(year, month, day).expect("valid test date");
    let stem = format!(
        "{}_{}_{}_{}",
        software_type.tag(),
        os_type.tag(),
        hardware_type,
        date.format("%Y%m%d")
    );
    Artifact {
        software_type,
        os_type,
        hardware_type,
        name: stem.clone(),
        uavo_hash: uavo_hash.to_string(),
        md5: format!("md5-{}", stem),
        package_link: format!("https://builds.example.com/{}.tar.xz", stem),
        release_link: format!("/releases/{}.bin", stem),
        script_link: String::new(),
        date,
    }
}

/// Create a test configuration rooted in `working_root`
pub fn create_test_config(working_root: &Path) -> Config {
    let mut config = Config::default();
    config.working_root = working_root.to_path_buf();
    config.local_api_bind = SocketAddr::from(([127, 0, 0, 1], 0));
    config.log_level = "error".to_string();
    config.ftp.server_url = "127.0.0.1:21".to_string();
    config.ftp.username = "tester".to_string();
    config.ftp.password = "secret".to_string();
    config.ftp.release_path = "/releases/".to_string();
    config.info.path = "/info/".to_string();
    config.info.use_ftp = true;
    config
}

/// Create a temporary directory for tests
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::TempDir::new().expect("Failed to create temp directory")
}
