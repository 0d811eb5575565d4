//! Shared application state for all routes.

use crate::service::DynamicEntityService;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<DynamicEntityService>,
}

impl AppState {
    pub fn new(service: DynamicEntityService) -> Self {
        AppState {
            service: Arc::new(service),
        }
    }
}
