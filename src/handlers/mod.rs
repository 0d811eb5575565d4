//! HTTP handlers for entity CRUD and relationship sub-resources.

pub mod entity;
pub use entity::*;
