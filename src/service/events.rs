//! Write lifecycle hooks. Each hook may replace the entity it receives.

use crate::config::ModelDescriptor;
use crate::error::AppError;
use async_trait::async_trait;
use serde_json::Value;

#[async_trait]
pub trait EntityEvents: Send + Sync {
    async fn before_create(&self, _model: &ModelDescriptor, entity: Value) -> Result<Value, AppError> {
        Ok(entity)
    }

    async fn after_create(&self, _model: &ModelDescriptor, entity: Value) -> Result<Value, AppError> {
        Ok(entity)
    }

    async fn before_update(
        &self,
        _model: &ModelDescriptor,
        _id: &Value,
        entity: Value,
    ) -> Result<Value, AppError> {
        Ok(entity)
    }

    async fn after_update(
        &self,
        _model: &ModelDescriptor,
        _id: &Value,
        entity: Value,
    ) -> Result<Value, AppError> {
        Ok(entity)
    }
}

/// Pass-through hooks.
pub struct NoopEvents;

impl EntityEvents for NoopEvents {}
