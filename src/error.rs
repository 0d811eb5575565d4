//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("duplicate path segment: {0}")]
    DuplicatePathSegment(String),
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

/// Opaque failures raised by a storage provider.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("{model} with id {id} not found")]
    EntityNotFound { model: String, id: String },
    #[error("{model} has no relationship named {relation}")]
    RelationNotFound { model: String, relation: String },
    #[error("validation failed for {model}")]
    ValidationFailed {
        model: String,
        errors: BTreeMap<String, String>,
    },
    #[error("invalid filter: {0}")]
    InvalidFilterSyntax(String),
    #[error("invalid identity for {model}: {reason}")]
    InvalidIdentity { model: String, reason: String },
    #[error("relationship {field}: {reason}")]
    RelationshipResolution { field: String, reason: String },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Storage(StorageError::Db(e))
    }
}

impl AppError {
    pub fn entity_not_found(model: &str, id: impl std::fmt::Display) -> Self {
        AppError::EntityNotFound {
            model: model.to_string(),
            id: id.to_string(),
        }
    }

    /// Stable machine-readable code used in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config_error",
            AppError::ModelNotFound(_) => "model_not_found",
            AppError::EntityNotFound { .. } => "entity_not_found",
            AppError::RelationNotFound { .. } => "relation_not_found",
            AppError::ValidationFailed { .. } => "validation_failed",
            AppError::InvalidFilterSyntax(_) => "invalid_filter",
            AppError::InvalidIdentity { .. } => "invalid_identity",
            AppError::RelationshipResolution { .. } => "relationship_error",
            AppError::Storage(_) => "storage_error",
            AppError::BadRequest(_) => "bad_request",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::ModelNotFound(_)
            | AppError::EntityNotFound { .. }
            | AppError::RelationNotFound { .. } => StatusCode::NOT_FOUND,
            AppError::ValidationFailed { .. }
            | AppError::InvalidFilterSyntax(_)
            | AppError::InvalidIdentity { .. }
            | AppError::RelationshipResolution { .. }
            | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Storage(StorageError::Conflict(_)) => StatusCode::CONFLICT,
            AppError::Config(_) | AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let details = match &self {
            AppError::ValidationFailed { errors, .. } => serde_json::to_value(errors).ok(),
            _ => None,
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.to_string(),
                details,
            },
        };
        (status, Json(body)).into_response()
    }
}
