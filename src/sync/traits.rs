// SPDX-License-Identifier: GPL-3.0-only
use async_trait::async_trait;
use serde::Serialize;

/// Pseudo path segment for the login directory
pub const HOME: &str = "~";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

/// Bytes moved so far; `total` is 0 when the size is not known up front
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransferProgress {
    pub done: u64,
    pub total: u64,
}

pub type ProgressFn<'a> = &'a (dyn Fn(TransferProgress) + Send + Sync);

/// The control connection is gone or out of step with the server
///
/// Transports return this (inside `anyhow::Error`) instead of a plain error
/// when no further command can be trusted on the current connection.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ConnectionLost(pub String);

pub fn is_connection_lost(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<ConnectionLost>())
}

/// File-transfer primitives the sync session is built on
///
/// Each call resolves once the server has answered the command. Paths are
/// relative to the current directory unless they start with `/`.
#[async_trait]
pub trait Transport: Send {
    async fn connect(&mut self, host: &str, port: u16) -> anyhow::Result<()>;

    async fn login(&mut self, username: &str, password: &str) -> anyhow::Result<()>;

    /// Change directory; `HOME` returns to the login directory
    async fn cd(&mut self, path: &str) -> anyhow::Result<()>;

    async fn list(&mut self, path: &str) -> anyhow::Result<Vec<RemoteEntry>>;

    async fn mkdir(&mut self, name: &str) -> anyhow::Result<()>;

    async fn put(
        &mut self,
        data: &[u8],
        remote_path: &str,
        progress: ProgressFn<'_>,
    ) -> anyhow::Result<()>;

    async fn remove(&mut self, remote_path: &str) -> anyhow::Result<()>;

    async fn get(&mut self, remote_path: &str, progress: ProgressFn<'_>) -> anyhow::Result<Vec<u8>>;

    async fn close(&mut self) -> anyhow::Result<()>;
}
