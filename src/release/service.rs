// SPDX-License-Identifier: GPL-3.0-only
use anyhow::Context;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::catalog::promotion::{PromotionSummary, promote};
use crate::catalog::{Catalog, CatalogRow, Category, DeleteOutcome};
use crate::codec;
use crate::config::Config;
use crate::downloader::Downloader;
use crate::error::{ParseError, ReleaseError, TransportError, ValidationError};
use crate::events::{ConsoleEvent, EventBus};
use crate::extractor::Extractor;
use crate::pipeline::{ItemBuilder, NewItemRequest, PackagePaths};
use crate::sync::changeset::{local_staging_dir, remote_path};
use crate::sync::traits::TransferProgress;
use crate::sync::{Changeset, PushReport, SessionState, SyncSession, Transport, push};
use crate::utils::package_file_name;

/// Snapshot of the catalog for the operator
#[derive(Debug, Clone, Serialize)]
pub struct CatalogView {
    pub loaded: bool,
    pub pending_changes: bool,
    pub session: SessionState,
    pub rows: Vec<CatalogRow>,
}

struct Workspace {
    catalog: Option<Catalog>,
    session: SyncSession,
}

impl Workspace {
    fn catalog_mut(&mut self) -> Result<&mut Catalog, ValidationError> {
        self.catalog.as_mut().ok_or(ValidationError::NoCatalog)
    }
}

/// Owner of the catalog and the server session
///
/// Every workflow takes the workspace lock for its whole duration, so at most
/// one login, item build or push runs at a time.
pub struct ReleaseService {
    config: Config,
    events: EventBus,
    downloader: Arc<dyn Downloader>,
    extractor: Arc<dyn Extractor>,
    workspace: Mutex<Workspace>,
}

impl ReleaseService {
    pub fn new(
        config: Config,
        events: EventBus,
        transport: Box<dyn Transport>,
        downloader: Arc<dyn Downloader>,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        let session = SyncSession::new(transport, config.ftp.op_timeout(), events.clone());
        Self {
            config,
            events,
            downloader,
            extractor,
            workspace: Mutex::new(Workspace {
                catalog: None,
                session,
            }),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub async fn view(&self) -> CatalogView {
        let workspace = self.workspace.lock().await;
        let catalog = workspace.catalog.as_ref();
        CatalogView {
            loaded: catalog.is_some(),
            pending_changes: catalog.is_some_and(Catalog::has_pending_actions),
            session: workspace.session.state(),
            rows: catalog.map(Catalog::rows).unwrap_or_default(),
        }
    }

    async fn login(&self, session: &mut SyncSession) -> Result<(), TransportError> {
        let ftp = &self.config.ftp;
        if !ftp.has_credentials() {
            return Err(TransportError {
                operation: "Log in".to_string(),
                message: "no FTP credentials configured".to_string(),
            });
        }
        session
            .login(&ftp.server_url, &ftp.username, &ftp.password)
            .await
    }

    /// Download and decode the published catalog, replacing the local one
    ///
    /// On a parse error the previously loaded catalog is kept.
    pub async fn fetch_catalog(&self) -> Result<CatalogView, ReleaseError> {
        let location = self.config.info.catalog_location();
        self.events
            .message(format!("Starting catalog download from {}", location));

        let mut workspace = self.workspace.lock().await;
        let data = if self.config.info.use_ftp {
            self.login(&mut workspace.session).await?;
            workspace.session.download(&location).await?
        } else {
            self.downloader.fetch(&location).await?
        };

        let text = String::from_utf8(data).map_err(|e| {
            let valid = e.utf8_error().valid_up_to();
            let lossy = String::from_utf8_lossy(e.as_bytes()).into_owned();
            ParseError::at_offset(&lossy, valid, "catalog is not valid UTF-8")
        })?;
        let catalog = Catalog::from_release_set(codec::decode(&text)?);

        info!(location = %location, items = catalog.rows().len(), "Catalog loaded");
        self.events.message("Catalog download succeeded");
        workspace.catalog = Some(catalog);
        drop(workspace);
        Ok(self.view().await)
    }

    /// Start from an empty catalog, for a server that has none yet
    pub async fn new_catalog(&self) -> CatalogView {
        {
            let mut workspace = self.workspace.lock().await;
            workspace.catalog = Some(Catalog::new());
        }
        info!("Started a new empty catalog");
        self.view().await
    }

    /// Download, build and stage a package, then add it to the test table
    pub async fn create_item(&self, request: NewItemRequest) -> Result<u32, ReleaseError> {
        request.validate()?;
        let mut workspace = self.workspace.lock().await;
        workspace.catalog_mut()?;

        let root = &self.config.working_root;
        tokio::fs::create_dir_all(root)
            .await
            .with_context(|| format!("Failed to create {}", root.display()))?;

        let file_name = package_file_name(&request.package_link)?;
        let paths = PackagePaths::new(root, &file_name);
        // Plain-file packages are fetched every time; only an unpacked tree is reused
        let fresh_download = !tokio::fs::metadata(&paths.extracted)
            .await
            .is_ok_and(|m| m.is_dir());
        if fresh_download {
            self.download_package(&mut workspace.session, &request.package_link, &paths)
                .await?;
        } else {
            self.events.message(format!(
                "{} already present in the working directory, skipping download",
                file_name
            ));
        }

        let builder = ItemBuilder::new(&self.config, self.extractor.as_ref(), &self.events);
        let prepared = builder.build(&request, &paths, fresh_download).await?;

        let catalog = workspace.catalog_mut()?;
        let before: Vec<u32> = catalog.table(Category::Test).iter().map(|(slot, _)| slot).collect();
        let slot = catalog.add_new_item(prepared.artifact)?;

        let test = catalog.table(Category::Test);
        for dropped in before.into_iter().filter(|s| *s != slot && !test.contains(*s)) {
            remove_staging(root, Category::Test, dropped).await?;
        }

        let destination = local_staging_dir(root, Category::Test, slot);
        if let Err(e) = move_dir(&prepared.staging_dir, &destination).await {
            warn!(slot, error = %e, "Staging move failed, dropping new item");
            catalog.table_mut(Category::Test).remove(slot);
            return Err(e.into());
        }

        info!(slot, staging = %destination.display(), "New item added");
        self.events.message("Adding new item done");
        Ok(slot)
    }

    async fn download_package(
        &self,
        session: &mut SyncSession,
        link: &str,
        paths: &PackagePaths,
    ) -> Result<(), ReleaseError> {
        self.events.message(format!("Starting {} download", link));

        if self.config.info.use_ftp {
            self.login(session).await?;
            let data = session.download(&remote_path(link)).await?;
            tokio::fs::write(&paths.download, data)
                .await
                .with_context(|| format!("Failed to save {}", paths.download.display()))?;
        } else {
            let events = self.events.clone();
            let description = format!("Download {}", link);
            let progress = move |p: TransferProgress| {
                events.publish(ConsoleEvent::Progress {
                    description: description.clone(),
                    done: p.done,
                    total: p.total,
                });
            };
            self.downloader
                .download(link, &paths.download, &progress)
                .await?;
        }

        self.events.message("File download succeeded");
        Ok(())
    }

    pub async fn delete_item(&self, category: Category, slot: u32) -> Result<DeleteOutcome, ReleaseError> {
        let mut workspace = self.workspace.lock().await;
        let outcome = workspace.catalog_mut()?.delete_item(category, slot)?;
        if outcome == DeleteOutcome::Removed {
            remove_staging(&self.config.working_root, category, slot).await?;
        }
        Ok(outcome)
    }

    pub async fn promote(&self) -> Result<PromotionSummary, ReleaseError> {
        let mut workspace = self.workspace.lock().await;
        let summary = promote(workspace.catalog_mut()?)?;
        self.events.message(format!(
            "Promoted {} test items, {} moved to old releases",
            summary.promoted, summary.demoted
        ));
        Ok(summary)
    }

    /// Apply every pending action to the server
    pub async fn push(&self) -> Result<PushReport, ReleaseError> {
        let mut workspace = self.workspace.lock().await;
        let Workspace { catalog, session } = &mut *workspace;
        let catalog = catalog.as_mut().ok_or(ValidationError::NoCatalog)?;

        let changeset = Changeset::from_catalog(catalog, &self.config.working_root);
        for target in &changeset.deletes {
            for path in &target.remote_paths {
                self.events.message(format!("Going to delete {}", path));
            }
        }
        for target in &changeset.uploads {
            for file in &target.files {
                self.events.message(format!("Going to push {}", file.remote_path));
            }
        }

        self.login(session).await?;
        let catalog_path = remote_path(&self.config.info.catalog_location());
        let report = push(session, catalog, &changeset, &catalog_path).await;

        self.events.message(if report.is_complete() {
            "Push complete".to_string()
        } else {
            format!("Push finished with {} failed items", report.failed_slots)
        });
        Ok(report)
    }

    pub async fn close_session(&self) -> Result<(), TransportError> {
        self.workspace.lock().await.session.close().await
    }
}

async fn remove_staging(root: &std::path::Path, category: Category, slot: u32) -> anyhow::Result<()> {
    let staging = local_staging_dir(root, category, slot);
    if tokio::fs::try_exists(&staging).await.unwrap_or(false) {
        tokio::fs::remove_dir_all(&staging)
            .await
            .with_context(|| format!("Failed to remove {}", staging.display()))?;
    }
    Ok(())
}

async fn move_dir(from: &std::path::Path, to: &std::path::Path) -> anyhow::Result<()> {
    if tokio::fs::try_exists(to).await.unwrap_or(false) {
        tokio::fs::remove_dir_all(to)
            .await
            .with_context(|| format!("Failed to clear {}", to.display()))?;
    }
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::rename(from, to)
        .await
        .with_context(|| format!("Failed to move {} to {}", from.display(), to.display()))
}
