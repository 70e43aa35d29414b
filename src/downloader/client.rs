// SPDX-License-Identifier: GPL-3.0-only
use anyhow::Context;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::downloader::traits::Downloader;
use crate::sync::traits::{ProgressFn, TransferProgress};

pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300)) // release packages are large
            .user_agent(concat!("ReleaseBuilderDaemon/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }
}

fn partial_path(output_path: &Path) -> PathBuf {
    let mut name = output_path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

#[async_trait]
impl Downloader for HttpClient {
    async fn download(
        &self,
        url: &str,
        output_path: &Path,
        progress: ProgressFn<'_>,
    ) -> anyhow::Result<u64> {
        info!(url = %url, path = %output_path.display(), "Starting download");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?
            .error_for_status()?;
        let total = response.content_length().unwrap_or(0);

        // Only a complete download ever appears under the final name
        let partial = partial_path(output_path);
        let written = async {
            let mut file = tokio::fs::File::create(&partial)
                .await
                .with_context(|| format!("Failed to create {}", partial.display()))?;
            let mut stream = response.bytes_stream();
            let mut done = 0u64;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.with_context(|| format!("Download of {} interrupted", url))?;
                file.write_all(&chunk).await?;
                done += chunk.len() as u64;
                progress(TransferProgress { done, total });
            }
            file.flush().await?;
            anyhow::Ok(done)
        }
        .await;

        let done = match written {
            Ok(done) => done,
            Err(e) => {
                match tokio::fs::remove_file(&partial).await {
                    Err(remove_err) if remove_err.kind() != std::io::ErrorKind::NotFound => {
                        warn!(path = %partial.display(), error = %remove_err, "Failed to remove partial download");
                    }
                    _ => {}
                }
                return Err(e);
            }
        };
        tokio::fs::rename(&partial, output_path)
            .await
            .with_context(|| format!("Failed to move download to {}", output_path.display()))?;

        info!(url = %url, path = %output_path.display(), bytes = done, "Download completed");
        Ok(done)
    }

    async fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?
            .error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}
