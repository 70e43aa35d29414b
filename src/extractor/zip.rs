// SPDX-License-Identifier: GPL-3.0-only
use anyhow::Context;
use async_trait::async_trait;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use zip::ZipArchive;

use crate::extractor::traits::Extractor;

pub struct ZipExtractor;

impl ZipExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ZipExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn unpack(archive_path: &Path, dest: &Path) -> anyhow::Result<usize> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open {}", archive_path.display()))?;
    let mut archive = ZipArchive::new(BufReader::new(file))
        .with_context(|| format!("{} is not a ZIP archive", archive_path.display()))?;

    let mut written = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            warn!(entry = entry.name(), "Skipping archive entry outside the destination");
            continue;
        };
        let outpath = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&outpath)?;
            continue;
        }
        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut outfile = File::create(&outpath)
            .with_context(|| format!("Failed to create {}", outpath.display()))?;
        std::io::copy(&mut entry, &mut outfile)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode))?;
        }
        written += 1;
    }
    Ok(written)
}

#[async_trait]
impl Extractor for ZipExtractor {
    async fn extract_zip(&self, archive_path: PathBuf, dest: PathBuf) -> anyhow::Result<usize> {
        info!(archive = %archive_path.display(), dest = %dest.display(), "Extracting ZIP archive");

        tokio::fs::create_dir_all(&dest).await?;

        let (archive, target) = (archive_path.clone(), dest.clone());
        let written = tokio::task::spawn_blocking(move || unpack(&archive, &target))
            .await
            .context("Extraction task panicked")??;

        info!(archive = %archive_path.display(), files = written, "ZIP extraction completed");
        Ok(written)
    }
}
