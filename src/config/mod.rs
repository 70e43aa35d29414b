// SPDX-License-Identifier: GPL-3.0-only
mod config;

pub use config::{Config, FtpConfig, InfoConfig, ScriptsConfig};
