//! Resolved model registry: definitions validated and flattened into per-model descriptors.

use crate::coerce::coerce;
use crate::config::{FieldType, RelationKind, ValidationRule};
use crate::error::{AppError, ConfigError};
use serde_json::{Map, Value};
use std::collections::HashMap;

#[derive(Clone, Debug)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: FieldType,
}

/// Relationship field with cardinality, direction and its pairing on the target model.
#[derive(Clone, Debug)]
pub struct RelationDescriptor {
    pub name: String,
    pub kind: RelationKind,
    /// Path segment of the related model.
    pub target: String,
    /// Inverse side only: owning field on the target.
    pub mapped_by: Option<String>,
    /// Owning side only: the target field declaring `mapped_by` to this one, when bidirectional.
    pub inverse: Option<String>,
}

impl RelationDescriptor {
    pub fn is_collection(&self) -> bool {
        matches!(self.kind, RelationKind::OneToMany | RelationKind::ManyToMany)
    }

    /// The owning side persists the reference; the inverse side is rebuilt by querying.
    pub fn is_owning(&self) -> bool {
        self.mapped_by.is_none()
    }

    /// Field on the target that mirrors this one, whichever side declares it.
    pub fn counterpart(&self) -> Option<&str> {
        self.mapped_by.as_deref().or(self.inverse.as_deref())
    }

    /// Input key carrying a bare identity for a to-one field (`categoriaId`).
    pub fn id_key(&self) -> String {
        format!("{}Id", self.name)
    }

    /// Input key carrying a list of identities for a collection field (`etiquetasIds`).
    pub fn ids_key(&self) -> String {
        format!("{}Ids", self.name)
    }
}

/// Runtime descriptor of one registered model, built once at startup.
#[derive(Clone, Debug)]
pub struct ModelDescriptor {
    pub type_name: String,
    pub path_segment: String,
    pub validation_enabled: bool,
    pub identity: String,
    pub identity_type: FieldType,
    pub identity_generated: bool,
    pub fields: Vec<FieldDescriptor>,
    pub relations: Vec<RelationDescriptor>,
    pub validation: HashMap<String, ValidationRule>,
}

impl ModelDescriptor {
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDescriptor> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Declared type of the identity or a scalar field.
    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        if name == self.identity {
            return Some(self.identity_type);
        }
        self.field(name).map(|f| f.field_type)
    }

    /// Identity of an entity or record, if set.
    pub fn identity_of<'a>(&self, entity: &'a Value) -> Option<&'a Value> {
        entity.get(&self.identity).filter(|v| !v.is_null())
    }

    /// Coerce a raw identity to the declared identity type.
    pub fn coerce_identity(&self, raw: &Value) -> Result<Value, AppError> {
        let invalid = |reason: String| AppError::InvalidIdentity {
            model: self.path_segment.clone(),
            reason,
        };
        match coerce(raw, self.identity_type) {
            Ok(Value::Null) => Err(invalid("identity is empty".into())),
            Ok(v) => Ok(v),
            Err(e) => Err(invalid(e.to_string())),
        }
    }

    /// Parse an identity from a path segment.
    pub fn parse_identity(&self, raw: &str) -> Result<Value, AppError> {
        self.coerce_identity(&Value::String(raw.to_string()))
    }

    /// Object carrying only the identity, used where a reference is not materialized.
    pub fn stub(&self, id: Value) -> Value {
        let mut m = Map::new();
        m.insert(self.identity.clone(), id);
        Value::Object(m)
    }

    /// Identity and scalars only; relationship fields stripped.
    pub fn snapshot(&self, entity: &Value) -> Value {
        let mut m = Map::new();
        if let Some(id) = self.identity_of(entity) {
            m.insert(self.identity.clone(), id.clone());
        }
        for f in &self.fields {
            if let Some(v) = entity.get(&f.name) {
                m.insert(f.name.clone(), v.clone());
            }
        }
        Value::Object(m)
    }
}

/// Process-wide registry keyed by path segment. Immutable once built.
#[derive(Clone, Debug, Default)]
pub struct ModelRegistry {
    models: Vec<ModelDescriptor>,
    by_path: HashMap<String, usize>,
}

fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: ModelDescriptor) -> Result<(), ConfigError> {
        let key = normalize(&descriptor.path_segment).to_string();
        if self.by_path.contains_key(&key) {
            return Err(ConfigError::DuplicatePathSegment(key));
        }
        tracing::info!(model = %descriptor.type_name, path = %key, "registered model");
        self.by_path.insert(key, self.models.len());
        self.models.push(descriptor);
        Ok(())
    }

    pub fn get(&self, path_segment: &str) -> Option<&ModelDescriptor> {
        self.by_path
            .get(normalize(path_segment))
            .and_then(|i| self.models.get(*i))
    }

    /// Resolve a path segment; unknown segments are a `ModelNotFound` error.
    pub fn resolve(&self, path_segment: &str) -> Result<&ModelDescriptor, AppError> {
        self.get(path_segment)
            .ok_or_else(|| AppError::ModelNotFound(path_segment.to_string()))
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.iter()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn categoria() -> ModelDescriptor {
        ModelDescriptor {
            type_name: "Categoria".into(),
            path_segment: "categorias".into(),
            validation_enabled: true,
            identity: "id".into(),
            identity_type: FieldType::Long,
            identity_generated: true,
            fields: vec![FieldDescriptor {
                name: "nombre".into(),
                field_type: FieldType::String,
            }],
            relations: Vec::new(),
            validation: HashMap::new(),
        }
    }

    #[test]
    fn resolve_ignores_leading_slash() {
        let mut registry = ModelRegistry::new();
        registry.register(categoria()).unwrap();
        assert_eq!(registry.resolve("/categorias").unwrap().type_name, "Categoria");
        assert!(matches!(
            registry.resolve("productos"),
            Err(AppError::ModelNotFound(p)) if p == "productos"
        ));
    }

    #[test]
    fn duplicate_path_is_rejected() {
        let mut registry = ModelRegistry::new();
        registry.register(categoria()).unwrap();
        assert!(matches!(
            registry.register(categoria()),
            Err(ConfigError::DuplicatePathSegment(_))
        ));
    }

    #[test]
    fn coerce_identity_rejects_garbage() {
        let m = categoria();
        assert_eq!(m.parse_identity("12").unwrap(), serde_json::json!(12));
        assert!(matches!(
            m.parse_identity("abc"),
            Err(AppError::InvalidIdentity { .. })
        ));
        assert!(m.parse_identity("  ").is_err());
    }

    #[test]
    fn snapshot_drops_relations() {
        let m = categoria();
        let e = serde_json::json!({ "id": 1, "nombre": "Hogar", "productos": [{ "id": 2 }] });
        assert_eq!(m.snapshot(&e), serde_json::json!({ "id": 1, "nombre": "Hogar" }));
    }
}
