//! Relationship loader: expands stored references into embedded entities up to a depth.

use crate::config::{ModelDescriptor, ModelRegistry};
use crate::error::AppError;
use crate::filter::references;
use crate::relations::from_record;
use crate::store::UnitOfWork;
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

type Loading<'b> = Pin<Box<dyn Future<Output = Result<Value, AppError>> + Send + 'b>>;

/// (path segment, coerced identity) pairs already expanded in one traversal.
type Visited = HashSet<(String, String)>;

pub struct RelationshipLoader<'a> {
    registry: &'a ModelRegistry,
}

impl<'a> RelationshipLoader<'a> {
    pub fn new(registry: &'a ModelRegistry) -> Self {
        RelationshipLoader { registry }
    }

    /// Re-fetch `entity` and expand its relationships `depth` levels deep.
    /// Depth 0, a missing identity or an already visited instance return `entity` as given.
    pub async fn load(
        &self,
        model: &ModelDescriptor,
        entity: Value,
        uow: &mut dyn UnitOfWork,
        depth: usize,
    ) -> Result<Value, AppError> {
        let mut visited = Visited::new();
        self.expand(model, entity, uow, depth, &mut visited).await
    }

    fn expand<'b>(
        &'b self,
        model: &'b ModelDescriptor,
        entity: Value,
        uow: &'b mut dyn UnitOfWork,
        depth: usize,
        visited: &'b mut Visited,
    ) -> Loading<'b> {
        Box::pin(async move {
            if depth == 0 {
                return Ok(entity);
            }
            // keyed on the coerced identity so `1` and `1.0` are one instance
            let Some(id) = model
                .identity_of(&entity)
                .and_then(|raw| model.coerce_identity(raw).ok())
            else {
                return Ok(entity);
            };
            if !visited.insert((model.path_segment.clone(), id.to_string())) {
                return Ok(entity);
            }
            let Some(record) = uow.find_by_identity(model, &id).await? else {
                return Ok(entity);
            };
            let mut loaded = from_record(self.registry, model, &record);

            for rel in &model.relations {
                let target = self.registry.resolve(&rel.target)?;
                let value = match rel.mapped_by.as_deref() {
                    None => match loaded.get(&rel.name).cloned().unwrap_or(Value::Null) {
                        Value::Array(items) => {
                            let mut out = Vec::with_capacity(items.len());
                            for item in items {
                                out.push(self.expand(target, item, &mut *uow, depth - 1, &mut *visited).await?);
                            }
                            Value::Array(out)
                        }
                        Value::Null => Value::Null,
                        stub => self.expand(target, stub, &mut *uow, depth - 1, &mut *visited).await?,
                    },
                    Some(mapped_by) => {
                        let predicate = references(self.registry, target, mapped_by, &id)?;
                        let rows = uow.query(target, Some(&predicate), None, None, None).await?;
                        let mut out = Vec::with_capacity(rows.len());
                        for row in rows {
                            let related = from_record(self.registry, target, &row);
                            out.push(self.expand(target, related, &mut *uow, depth - 1, &mut *visited).await?);
                        }
                        if rel.is_collection() {
                            Value::Array(out)
                        } else {
                            out.into_iter().next().unwrap_or(Value::Null)
                        }
                    }
                };
                if let Some(m) = loaded.as_object_mut() {
                    m.insert(rel.name.clone(), value);
                }
            }
            Ok(loaded)
        })
    }
}
