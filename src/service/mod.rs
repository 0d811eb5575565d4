//! DynamicEntityService: generic CRUD over the model registry and a storage provider.

mod entity;
mod events;
mod validation;
pub use entity::{DynamicEntityService, Listing, Page, PageRequest};
pub use events::{EntityEvents, NoopEvents};
pub use validation::RequestValidator;
