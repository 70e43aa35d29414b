// SPDX-License-Identifier: GPL-3.0-only
use async_trait::async_trait;
use std::path::Path;

use crate::sync::traits::ProgressFn;

#[async_trait]
pub trait Downloader: Send + Sync {
    /// Stream the resource at `url` into `output_path`, returning the byte count
    async fn download(
        &self,
        url: &str,
        output_path: &Path,
        progress: ProgressFn<'_>,
    ) -> anyhow::Result<u64>;

    /// Fetch a small resource into memory
    async fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>>;
}
