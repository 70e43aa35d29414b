// SPDX-License-Identifier: GPL-3.0-only
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::catalog::models::OsType;

const ENV_PREFIX: &str = "RELEASE_BUILDER_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Scratch directory for downloads, extraction and staged releases
    pub working_root: PathBuf,

    /// Local API bind address (e.g., "127.0.0.1:8080")
    pub local_api_bind: SocketAddr,

    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable ones
    #[serde(default)]
    pub log_json: bool,

    #[serde(default)]
    pub ftp: FtpConfig,

    #[serde(default)]
    pub info: InfoConfig,

    #[serde(default)]
    pub scripts: ScriptsConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FtpConfig {
    /// Release server, as `host` or `host:port`
    #[serde(default)]
    pub server_url: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Remote directory that holds every release file
    #[serde(default)]
    pub release_path: String,

    /// Upper bound on each wait for the server; unset waits forever
    #[serde(default)]
    pub op_timeout_secs: Option<u64>,
}

impl FtpConfig {
    pub fn op_timeout(&self) -> Option<Duration> {
        self.op_timeout_secs.map(Duration::from_secs)
    }

    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoConfig {
    /// Directory (FTP path or HTTP URL) that holds the catalog document
    pub path: String,

    pub release_filename: String,

    /// Fetch the catalog and packages over FTP instead of HTTP
    #[serde(default)]
    pub use_ftp: bool,
}

impl InfoConfig {
    /// Location of the catalog document under `path`
    pub fn catalog_location(&self) -> String {
        if self.path.is_empty() || self.path.ends_with('/') {
            format!("{}{}", self.path, self.release_filename)
        } else {
            format!("{}/{}", self.path, self.release_filename)
        }
    }
}

impl Default for InfoConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            release_filename: String::from("releases.xml"),
            use_ftp: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptsConfig {
    /// Packaging script run for desktop clients
    #[serde(default)]
    pub ruby_script_path: String,

    /// Updater script per OS tag (e.g. "linux64")
    #[serde(default)]
    pub updater_script_paths: BTreeMap<String, String>,

    /// Updater binary per OS tag
    #[serde(default)]
    pub updater_binary_paths: BTreeMap<String, String>,
}

impl ScriptsConfig {
    pub fn updater_script(&self, os: OsType) -> &str {
        self.updater_script_paths
            .get(os.tag())
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn updater_binary(&self, os: OsType) -> &str {
        self.updater_binary_paths
            .get(os.tag())
            .map(String::as_str)
            .unwrap_or_default()
    }
}

impl Config {
    /// Load configuration from TOML file with environment variable overrides
    pub fn load() -> anyhow::Result<Self> {
        let config_path = std::env::var(format!("{}CONFIG", ENV_PREFIX))
            .unwrap_or_else(|_| "config.toml".to_string());

        let mut config = Self::load_file(Path::new(&config_path))?;
        config.apply_overrides(|key| std::env::var(format!("{}{}", ENV_PREFIX, key)).ok())?;
        Ok(config)
    }

    /// Read a TOML file, falling back to defaults when it does not exist
    pub fn load_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&contents)?)
        } else {
            Ok(Config::default())
        }
    }

    /// Apply overrides; `lookup` receives the key without the env prefix
    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("WORKING_ROOT") {
            self.working_root = PathBuf::from(val);
        }
        if let Some(val) = lookup("LOCAL_API_BIND") {
            self.local_api_bind = SocketAddr::from_str(&val)?;
        }
        if let Some(val) = lookup("LOG_LEVEL") {
            self.log_level = val;
        }
        if let Some(val) = lookup("LOG_JSON") {
            self.log_json = val.parse()?;
        }
        if let Some(val) = lookup("FTP_SERVER_URL") {
            self.ftp.server_url = val;
        }
        if let Some(val) = lookup("FTP_USERNAME") {
            self.ftp.username = val;
        }
        if let Some(val) = lookup("FTP_PASSWORD") {
            self.ftp.password = val;
        }
        if let Some(val) = lookup("FTP_RELEASE_PATH") {
            self.ftp.release_path = val;
        }
        if let Some(val) = lookup("FTP_OP_TIMEOUT_SECS") {
            self.ftp.op_timeout_secs = Some(val.parse()?);
        }
        if let Some(val) = lookup("INFO_PATH") {
            self.info.path = val;
        }
        if let Some(val) = lookup("INFO_RELEASE_FILENAME") {
            self.info.release_filename = val;
        }
        if let Some(val) = lookup("INFO_USE_FTP") {
            self.info.use_ftp = val.parse()?;
        }
        if let Some(val) = lookup("RUBY_SCRIPT_PATH") {
            self.scripts.ruby_script_path = val;
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            working_root: std::env::temp_dir().join("release_builder"),
            local_api_bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            log_level: String::from("info"),
            log_json: false,
            ftp: FtpConfig::default(),
            info: InfoConfig::default(),
            scripts: ScriptsConfig::default(),
        }
    }
}
