//! Restmodel SDK: generic CRUD and query layer over JSON model definitions.

pub mod coerce;
pub mod config;
pub mod error;
pub mod filter;
pub mod handlers;
pub mod relations;
pub mod response;
pub mod routes;
pub mod service;
pub mod sql;
pub mod state;
pub mod store;

pub use config::{load_from_dir, parse_models, resolve, ModelDescriptor, ModelRegistry, Settings};
pub use error::{AppError, ConfigError, StorageError};
pub use filter::{Filter, FilterLogic, FilterOperation, FilterSpecification};
pub use relations::EntityInput;
pub use response::{error_body, success_many, success_one};
pub use routes::{common_routes, common_routes_with_ready, entity_routes};
pub use service::{DynamicEntityService, EntityEvents, Listing, Page, PageRequest};
pub use state::AppState;
pub use store::{ensure_database_exists, EntityStore, MemoryStore, PgStore, UnitOfWork};
