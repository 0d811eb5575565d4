//! Storage provider contract. A provider persists flat records and evaluates compiled predicates.
//!
//! Records carry the identity, scalars and owning references as identities; inverse sides are
//! never stored (see `relations::to_record`).

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::{ensure_database_exists, PgStore};

use crate::config::{FieldType, ModelDescriptor};
use crate::error::AppError;
use crate::filter::Predicate;
use async_trait::async_trait;
use serde_json::Value;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("desc") {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        }
    }
}

/// Sort on one root field (identity or scalar).
#[derive(Clone, Debug, PartialEq)]
pub struct Sort {
    pub field: String,
    pub field_type: FieldType,
    pub is_identity: bool,
    pub direction: SortDirection,
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Open a unit of work. Dropping it without `commit` discards its writes.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, AppError>;

    async fn ping(&self) -> Result<(), AppError>;
}

/// One transactional scope. Not shared across requests.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn find_by_identity(
        &mut self,
        model: &ModelDescriptor,
        id: &Value,
    ) -> Result<Option<Value>, AppError>;

    /// Insert a new record; assigns the identity when the model generates it.
    async fn persist(&mut self, model: &ModelDescriptor, record: Value) -> Result<Value, AppError>;

    /// Insert or replace a record by identity.
    async fn merge(&mut self, model: &ModelDescriptor, record: Value) -> Result<Value, AppError>;

    async fn remove(&mut self, model: &ModelDescriptor, id: &Value) -> Result<bool, AppError>;

    /// Records matching `predicate` (all when `None`), identity order unless `sort` is given.
    async fn query(
        &mut self,
        model: &ModelDescriptor,
        predicate: Option<&Predicate>,
        sort: Option<&Sort>,
        offset: Option<u64>,
        limit: Option<u64>,
    ) -> Result<Vec<Value>, AppError>;

    async fn count(
        &mut self,
        model: &ModelDescriptor,
        predicate: Option<&Predicate>,
    ) -> Result<u64, AppError>;

    async fn commit(self: Box<Self>) -> Result<(), AppError>;
}
