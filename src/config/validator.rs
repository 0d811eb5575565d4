//! Model definition validation: referential integrity and relationship pairing.

use crate::config::{FieldType, ModelConfig, RelationKind};
use crate::error::ConfigError;
use std::collections::{HashMap, HashSet};

pub fn validate(models: &[ModelConfig]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    let mut path_segments = HashSet::new();
    for m in models {
        if !names.insert(m.name.as_str()) {
            return Err(ConfigError::Validation(format!("duplicate model name: {}", m.name)));
        }
        if !path_segments.insert(m.path_segment.trim_matches('/')) {
            return Err(ConfigError::DuplicatePathSegment(m.path_segment.clone()));
        }
    }
    let by_name: HashMap<&str, &ModelConfig> = models.iter().map(|m| (m.name.as_str(), m)).collect();

    for m in models {
        if !matches!(
            m.identity.type_,
            FieldType::Integer | FieldType::Long | FieldType::String | FieldType::Uuid
        ) {
            return Err(ConfigError::Validation(format!(
                "{}: identity must be integer, long, string or uuid",
                m.name
            )));
        }
        if m.identity.type_ == FieldType::String && m.identity.generated {
            return Err(ConfigError::Validation(format!(
                "{}: string identities cannot be generated",
                m.name
            )));
        }

        let mut seen = HashSet::new();
        seen.insert(m.identity.name.as_str());
        let declared = m
            .fields
            .iter()
            .map(|f| f.name.as_str())
            .chain(m.relationships.iter().map(|r| r.name.as_str()));
        for name in declared {
            if !seen.insert(name) {
                return Err(ConfigError::Validation(format!(
                    "{}: field {} declared twice",
                    m.name, name
                )));
            }
        }

        for r in &m.relationships {
            let target = by_name
                .get(r.target.as_str())
                .ok_or_else(|| ConfigError::MissingReference {
                    kind: "model",
                    id: r.target.clone(),
                })?;
            match (r.kind, r.mapped_by.as_deref()) {
                (RelationKind::OneToMany, None) => {
                    return Err(ConfigError::Validation(format!(
                        "{}.{}: one_to_many requires mapped_by",
                        m.name, r.name
                    )));
                }
                (RelationKind::ManyToOne, Some(_)) => {
                    return Err(ConfigError::Validation(format!(
                        "{}.{}: many_to_one is always the owning side",
                        m.name, r.name
                    )));
                }
                (_, Some(mapped_by)) => {
                    let owner = target
                        .relationships
                        .iter()
                        .find(|o| o.name == mapped_by)
                        .ok_or_else(|| ConfigError::MissingReference {
                            kind: "relationship",
                            id: format!("{}.{}", target.name, mapped_by),
                        })?;
                    let paired = matches!(
                        (r.kind, owner.kind),
                        (RelationKind::OneToMany, RelationKind::ManyToOne)
                            | (RelationKind::ManyToMany, RelationKind::ManyToMany)
                            | (RelationKind::OneToOne, RelationKind::OneToOne)
                    );
                    if !paired || owner.mapped_by.is_some() || owner.target != m.name {
                        return Err(ConfigError::Validation(format!(
                            "{}.{}: mapped_by {}.{} is not a matching owning field",
                            m.name, r.name, target.name, mapped_by
                        )));
                    }
                }
                (_, None) => {}
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn models(v: serde_json::Value) -> Vec<ModelConfig> {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn accepts_paired_relationships() {
        let m = models(json!([
            { "name": "Categoria", "path_segment": "categorias",
              "relationships": [{ "name": "productos", "kind": "one_to_many", "target": "Producto", "mapped_by": "categoria" }] },
            { "name": "Producto", "path_segment": "productos",
              "relationships": [{ "name": "categoria", "kind": "many_to_one", "target": "Categoria" }] }
        ]));
        validate(&m).unwrap();
    }

    #[test]
    fn rejects_unknown_target() {
        let m = models(json!([
            { "name": "Producto", "path_segment": "productos",
              "relationships": [{ "name": "marca", "kind": "many_to_one", "target": "Marca" }] }
        ]));
        assert!(matches!(validate(&m), Err(ConfigError::MissingReference { kind: "model", .. })));
    }

    #[test]
    fn rejects_mismatched_mapped_by() {
        let m = models(json!([
            { "name": "Categoria", "path_segment": "categorias",
              "relationships": [{ "name": "productos", "kind": "one_to_many", "target": "Producto", "mapped_by": "etiquetas" }] },
            { "name": "Producto", "path_segment": "productos",
              "relationships": [{ "name": "etiquetas", "kind": "many_to_many", "target": "Categoria" }] }
        ]));
        assert!(matches!(validate(&m), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn rejects_duplicate_path_segment() {
        let m = models(json!([
            { "name": "A", "path_segment": "items" },
            { "name": "B", "path_segment": "/items" }
        ]));
        assert!(matches!(validate(&m), Err(ConfigError::DuplicatePathSegment(_))));
    }
}
