// SPDX-License-Identifier: GPL-3.0-only
use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{delete, get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::api::handlers::{ApiHandlers, ApiResponse, ApiResult, CreatedItem, DeletedItem};
use crate::api::websocket::WebSocketServer;
use crate::catalog::promotion::PromotionSummary;
use crate::pipeline::NewItemRequest;
use crate::release::{CatalogView, ReleaseService};
use crate::sync::PushReport;

pub struct HttpServer {
    handlers: Arc<ApiHandlers>,
    addr: SocketAddr,
}

impl HttpServer {
    pub fn new(service: Arc<ReleaseService>, addr: SocketAddr) -> Self {
        Self {
            handlers: Arc::new(ApiHandlers::new(service)),
            addr,
        }
    }

    pub fn router(&self) -> Router {
        let websocket = WebSocketServer::new(self.handlers.clone());

        Router::new()
            .route("/api/health", get(ApiHandlers::health))
            .route("/api/catalog", get(catalog_handler))
            .route("/api/catalog/fetch", post(fetch_catalog_handler))
            .route("/api/catalog/new", post(new_catalog_handler))
            .route("/api/items", post(create_item_handler))
            .route("/api/items/:category/:slot", delete(delete_item_handler))
            .route("/api/promote", post(promote_handler))
            .route("/api/push", post(push_handler))
            .with_state(self.handlers.clone())
            .merge(websocket.router())
    }

    pub async fn serve(self) -> anyhow::Result<()> {
        let app = self.router();

        info!(addr = %self.addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

async fn catalog_handler(State(handlers): State<Arc<ApiHandlers>>) -> Json<ApiResponse<CatalogView>> {
    handlers.catalog().await
}

async fn fetch_catalog_handler(State(handlers): State<Arc<ApiHandlers>>) -> ApiResult<CatalogView> {
    handlers.fetch_catalog().await
}

async fn new_catalog_handler(State(handlers): State<Arc<ApiHandlers>>) -> ApiResult<CatalogView> {
    handlers.new_catalog().await
}

async fn create_item_handler(
    State(handlers): State<Arc<ApiHandlers>>,
    Json(request): Json<NewItemRequest>,
) -> ApiResult<CreatedItem> {
    handlers.create_item(Json(request)).await
}

async fn delete_item_handler(
    State(handlers): State<Arc<ApiHandlers>>,
    Path(params): Path<(String, u32)>,
) -> ApiResult<DeletedItem> {
    handlers.delete_item(Path(params)).await
}

async fn promote_handler(State(handlers): State<Arc<ApiHandlers>>) -> ApiResult<PromotionSummary> {
    handlers.promote().await
}

async fn push_handler(State(handlers): State<Arc<ApiHandlers>>) -> ApiResult<PushReport> {
    handlers.push().await
}
