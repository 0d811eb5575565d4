//! Entity graph plumbing: input conversion, entity/record mapping and reference edits.
//!
//! An entity carries relationship fields as embedded objects. A stored record carries owning
//! references as bare identities (a list for collections) and never carries inverse fields.

pub mod loader;
pub mod sync;

pub use loader::RelationshipLoader;
pub use sync::{RelationshipSynchronizer, Synced};

use crate::coerce::{coerce, compare_values};
use crate::config::{ModelDescriptor, ModelRegistry};
use crate::error::AppError;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Write payload as received, converted once into an entity by `to_entity`.
#[derive(Clone, Debug, PartialEq)]
pub enum EntityInput {
    /// Loose field map: relationships may be given as objects, `<field>Id` or `<field>Ids`.
    Fields(Map<String, Value>),
    /// Already-shaped entity; relationship fields are taken as given.
    Instance(Value),
}

impl EntityInput {
    pub fn from_json(body: Value) -> Result<Self, AppError> {
        match body {
            Value::Object(m) => Ok(EntityInput::Fields(m)),
            _ => Err(AppError::BadRequest("request body must be a JSON object".into())),
        }
    }

    /// Same input without `key`.
    pub fn without(self, key: &str) -> Self {
        match self {
            EntityInput::Fields(mut m) => {
                m.remove(key);
                EntityInput::Fields(m)
            }
            EntityInput::Instance(mut v) => {
                if let Some(m) = v.as_object_mut() {
                    m.remove(key);
                }
                EntityInput::Instance(v)
            }
        }
    }

    /// Coerce identity and declared scalars; drop unknown keys. Scalar failures are collected
    /// into one `ValidationFailed`.
    pub fn to_entity(&self, model: &ModelDescriptor) -> Result<Value, AppError> {
        let source = match self {
            EntityInput::Fields(m) => m,
            EntityInput::Instance(Value::Object(m)) => m,
            EntityInput::Instance(_) => {
                return Err(AppError::BadRequest(format!("{} instance must be an object", model.path_segment)))
            }
        };
        let mut entity = Map::new();
        let mut errors = BTreeMap::new();

        if let Some(raw) = source.get(&model.identity).filter(|v| !v.is_null()) {
            entity.insert(model.identity.clone(), model.coerce_identity(raw)?);
        }
        for field in &model.fields {
            let Some(raw) = source.get(&field.name) else { continue };
            match coerce(raw, field.field_type) {
                Ok(v) => {
                    entity.insert(field.name.clone(), v);
                }
                Err(e) => {
                    errors.insert(field.name.clone(), e.to_string());
                }
            }
        }
        if let EntityInput::Instance(_) = self {
            for rel in &model.relations {
                if let Some(v) = source.get(&rel.name) {
                    entity.insert(rel.name.clone(), v.clone());
                }
            }
        }

        if !errors.is_empty() {
            return Err(AppError::ValidationFailed {
                model: model.path_segment.clone(),
                errors,
            });
        }
        Ok(Value::Object(entity))
    }
}

/// An owning-side reference the service persists once the root has an identity:
/// record `id` of `model` gets the root identity under `field`.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingLink {
    pub model: String,
    pub id: Value,
    pub field: String,
    pub many: bool,
}

/// Identity equality across JSON kinds (`5` and `5.0` match).
pub fn same_identity(a: &Value, b: &Value) -> bool {
    compare_values(a, b) == Some(Ordering::Equal)
}

/// Identity held by a reference: an embedded object's identity or a bare value.
fn reference_id(target: &ModelDescriptor, v: &Value) -> Option<Value> {
    let raw = match v {
        Value::Object(_) => target.identity_of(v)?,
        other => other,
    };
    target.coerce_identity(raw).ok()
}

/// Entity to stored record. Relationship values on unknown targets are dropped.
pub fn to_record(registry: &ModelRegistry, model: &ModelDescriptor, entity: &Value) -> Value {
    let mut record = Map::new();
    if let Some(id) = model.identity_of(entity) {
        record.insert(model.identity.clone(), id.clone());
    }
    for field in &model.fields {
        if let Some(v) = entity.get(&field.name) {
            record.insert(field.name.clone(), v.clone());
        }
    }
    for rel in model.relations.iter().filter(|r| r.is_owning()) {
        let (Some(v), Some(target)) = (entity.get(&rel.name), registry.get(&rel.target)) else {
            continue;
        };
        let stored = if rel.is_collection() {
            let mut ids: Vec<Value> = Vec::new();
            for id in v.as_array().into_iter().flatten().filter_map(|e| reference_id(target, e)) {
                if !ids.iter().any(|x| same_identity(x, &id)) {
                    ids.push(id);
                }
            }
            Value::Array(ids)
        } else {
            reference_id(target, v).unwrap_or(Value::Null)
        };
        record.insert(rel.name.clone(), stored);
    }
    Value::Object(record)
}

/// Stored record to entity: owning references become identity stubs, inverse fields stay absent.
pub fn from_record(registry: &ModelRegistry, model: &ModelDescriptor, record: &Value) -> Value {
    let mut entity = Map::new();
    if let Some(id) = model.identity_of(record) {
        entity.insert(model.identity.clone(), id.clone());
    }
    for field in &model.fields {
        if let Some(v) = record.get(&field.name) {
            entity.insert(field.name.clone(), v.clone());
        }
    }
    for rel in model.relations.iter().filter(|r| r.is_owning()) {
        let Some(target) = registry.get(&rel.target) else { continue };
        let stored = record.get(&rel.name).unwrap_or(&Value::Null);
        let value = if rel.is_collection() {
            Value::Array(
                stored
                    .as_array()
                    .into_iter()
                    .flatten()
                    .filter(|id| !id.is_null())
                    .map(|id| target.stub(id.clone()))
                    .collect(),
            )
        } else if stored.is_null() {
            Value::Null
        } else {
            target.stub(stored.clone())
        };
        entity.insert(rel.name.clone(), value);
    }
    Value::Object(entity)
}

/// Point `field` of `record` at `id` (append for collections). Returns whether the record changed.
pub fn set_reference(record: &mut Value, field: &str, id: &Value, many: bool) -> bool {
    let Some(m) = record.as_object_mut() else {
        return false;
    };
    if many {
        let slot = m
            .entry(field.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if !slot.is_array() {
            *slot = Value::Array(Vec::new());
        }
        match slot.as_array_mut() {
            Some(ids) if !ids.iter().any(|x| same_identity(x, id)) => {
                ids.push(id.clone());
                true
            }
            _ => false,
        }
    } else {
        if m.get(field).map_or(false, |x| same_identity(x, id)) {
            return false;
        }
        m.insert(field.to_string(), id.clone());
        true
    }
}

/// Remove `id` from `field` of `record`. Returns whether it was referenced.
pub fn clear_reference(record: &mut Value, field: &str, id: &Value, many: bool) -> bool {
    let Some(slot) = record.get_mut(field) else {
        return false;
    };
    if many {
        let Some(ids) = slot.as_array_mut() else {
            return false;
        };
        let before = ids.len();
        ids.retain(|x| !same_identity(x, id));
        ids.len() != before
    } else if same_identity(slot, id) {
        *slot = Value::Null;
        true
    } else {
        false
    }
}
