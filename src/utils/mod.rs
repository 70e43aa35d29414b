// SPDX-License-Identifier: GPL-3.0-only
pub mod checksum;
pub mod paths;

pub use checksum::calculate_file_md5;
pub use paths::{extracted_dir_name, package_file_name};
