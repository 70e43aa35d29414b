// SPDX-License-Identifier: GPL-3.0-only
use axum::Json;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::catalog::promotion::PromotionSummary;
use crate::catalog::{Category, DeleteOutcome};
use crate::error::{ReleaseError, ValidationError};
use crate::pipeline::NewItemRequest;
use crate::release::{CatalogView, ReleaseService};
use crate::sync::PushReport;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ErrorBody>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(code: &str, message: String) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(ErrorBody {
                code: code.to_string(),
                message,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: String) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request",
            message,
        }
    }
}

impl From<ReleaseError> for ApiError {
    fn from(err: ReleaseError) -> Self {
        let (status, code) = match &err {
            ReleaseError::Parse(_) => (StatusCode::BAD_REQUEST, "parse_error"),
            ReleaseError::Validation(v) => match v {
                ValidationError::SlotNotFound { .. } => (StatusCode::NOT_FOUND, "slot_not_found"),
                ValidationError::PendingChanges => (StatusCode::CONFLICT, "pending_changes"),
                ValidationError::NoCatalog => (StatusCode::CONFLICT, "no_catalog"),
                ValidationError::UavoHashMismatch { .. } => (StatusCode::CONFLICT, "uavo_hash_mismatch"),
                _ => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
            },
            ReleaseError::Transport(_) => (StatusCode::BAD_GATEWAY, "transport_error"),
            ReleaseError::ExternalProcess(_) => (StatusCode::INTERNAL_SERVER_ERROR, "external_process_error"),
            ReleaseError::Other(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        let message = match &err {
            ReleaseError::ExternalProcess(e) if !e.output.is_empty() => {
                format!("{}\n{}", e, e.output.join("\n"))
            }
            ReleaseError::Other(e) => format!("{:#}", e),
            _ => err.to_string(),
        };
        Self {
            status,
            code,
            message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(code = self.code, error = %self.message, "Request failed");
        }
        (self.status, Json(ApiResponse::<()>::error(self.code, self.message))).into_response()
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CreatedItem {
    pub slot: u32,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DeletedItem {
    pub outcome: DeleteOutcome,
}

pub struct ApiHandlers {
    service: Arc<ReleaseService>,
}

impl ApiHandlers {
    pub fn new(service: Arc<ReleaseService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<ReleaseService> {
        &self.service
    }
}

impl ApiHandlers {
    pub async fn health() -> Json<ApiResponse<&'static str>> {
        Json(ApiResponse::success("ok"))
    }

    pub async fn catalog(&self) -> Json<ApiResponse<CatalogView>> {
        Json(ApiResponse::success(self.service.view().await))
    }

    pub async fn fetch_catalog(&self) -> ApiResult<CatalogView> {
        let view = self.service.fetch_catalog().await?;
        Ok(Json(ApiResponse::success(view)))
    }

    pub async fn new_catalog(&self) -> ApiResult<CatalogView> {
        Ok(Json(ApiResponse::success(self.service.new_catalog().await)))
    }

    pub async fn create_item(&self, Json(request): Json<NewItemRequest>) -> ApiResult<CreatedItem> {
        info!(
            software = %request.software_type,
            os = %request.os_type,
            package = %request.package_link,
            "Create item request received"
        );
        let slot = self.service.create_item(request).await?;
        Ok(Json(ApiResponse::success(CreatedItem { slot })))
    }

    pub async fn delete_item(&self, Path((category, slot)): Path<(String, u32)>) -> ApiResult<DeletedItem> {
        let category: Category = category
            .parse()
            .map_err(|e: anyhow::Error| ApiError::bad_request(e.to_string()))?;
        let outcome = self.service.delete_item(category, slot).await?;
        Ok(Json(ApiResponse::success(DeletedItem { outcome })))
    }

    pub async fn promote(&self) -> ApiResult<PromotionSummary> {
        let summary = self.service.promote().await?;
        Ok(Json(ApiResponse::success(summary)))
    }

    pub async fn push(&self) -> ApiResult<PushReport> {
        let report = self.service.push().await?;
        Ok(Json(ApiResponse::success(report)))
    }
}
