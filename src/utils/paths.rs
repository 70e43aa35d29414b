// SPDX-License-Identifier: GPL-3.0-only
use anyhow::Result;
use url::Url;

/// Archive suffixes stripped to find the directory a package unpacks into
const PACKAGE_SUFFIXES: &[&str] = &[".tar.xz", ".tar.gz", ".zip", ".exe"];

/// Local file name for a downloaded package
///
/// Takes the last path segment of the link and drops anything that is not
/// safe in a file name.
pub fn package_file_name(link: &str) -> Result<String> {
    let path = match Url::parse(link) {
        Ok(url) => url.path().to_string(),
        Err(_) => link.to_string(),
    };
    let last = path
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or_default();

    let sanitized: String = last
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '+'))
        .collect();

    if sanitized.is_empty() || sanitized.starts_with('.') {
        return Err(anyhow::anyhow!("Package link has no usable file name: {}", link));
    }
    Ok(sanitized)
}

/// Name of the directory an archive extracts into
pub fn extracted_dir_name(file_name: &str) -> &str {
    PACKAGE_SUFFIXES
        .iter()
        .find_map(|suffix| file_name.strip_suffix(suffix))
        .unwrap_or(file_name)
}
