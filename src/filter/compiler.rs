//! Compile a `FilterSpecification` into a typed predicate tree over resolved access paths.

use crate::coerce::coerce;
use crate::config::{FieldType, ModelDescriptor, ModelRegistry, RelationKind};
use crate::error::AppError;
use crate::filter::{Filter, FilterLogic, FilterOperation, FilterSpecification};
use serde_json::Value;

/// Where the reference crossed by a hop is stored.
#[derive(Clone, Debug, PartialEq)]
pub enum Link {
    /// The source record holds the target identity (or a list of them) under the relation name.
    Owned { many: bool },
    /// The target record holds the source identity (or a list containing it) under `mapped_by`.
    Mapped { mapped_by: String, many: bool },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Hop {
    pub relation: String,
    pub source_identity: String,
    /// Path segment of the model reached by this hop.
    pub target: String,
    pub target_identity: String,
    pub link: Link,
}

/// A dotted field path resolved against the relationship graph.
#[derive(Clone, Debug, PartialEq)]
pub struct AccessPath {
    pub hops: Vec<Hop>,
    pub field: String,
    pub field_type: FieldType,
    pub is_identity: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparison {
    pub fn sql(self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Neq => "<>",
            Comparison::Gt => ">",
            Comparison::Gte => ">=",
            Comparison::Lt => "<",
            Comparison::Lte => "<=",
        }
    }
}

/// Executable predicate. Paths crossing a collection match when any element matches.
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    Compare {
        path: AccessPath,
        op: Comparison,
        value: Value,
    },
    IsNull(AccessPath),
    IsNotNull(AccessPath),
    Like {
        path: AccessPath,
        pattern: String,
    },
    In {
        path: AccessPath,
        values: Vec<Value>,
    },
    Between {
        path: AccessPath,
        low: Value,
        high: Value,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    /// Matches no record.
    Never,
}

/// Resolve `dotted` from `model`. A trailing relationship name addresses that relationship's identity.
pub fn resolve_path(
    registry: &ModelRegistry,
    model: &ModelDescriptor,
    dotted: &str,
) -> Result<AccessPath, AppError> {
    let unknown = |segment: &str, on: &ModelDescriptor| {
        AppError::InvalidFilterSyntax(format!(
            "unknown field '{}' on {} in path '{}'",
            segment, on.path_segment, dotted
        ))
    };
    let segments: Vec<&str> = dotted.split('.').map(str::trim).collect();
    let mut hops = Vec::new();
    let mut current = model;

    for (i, segment) in segments.iter().copied().enumerate() {
        let last = i + 1 == segments.len();
        if last {
            if let Some(field_type) = current.field_type(segment) {
                return Ok(AccessPath {
                    hops,
                    field: segment.to_string(),
                    field_type,
                    is_identity: segment == current.identity,
                });
            }
        }
        let relation = current
            .relation(segment)
            .ok_or_else(|| unknown(segment, current))?;
        let target = registry.get(&relation.target).ok_or_else(|| {
            AppError::InvalidFilterSyntax(format!("unknown target model {}", relation.target))
        })?;
        let link = match relation.mapped_by.as_deref() {
            None => Link::Owned {
                many: relation.is_collection(),
            },
            Some(mapped_by) => Link::Mapped {
                mapped_by: mapped_by.to_string(),
                many: relation.kind == RelationKind::ManyToMany,
            },
        };
        hops.push(Hop {
            relation: relation.name.clone(),
            source_identity: current.identity.clone(),
            target: target.path_segment.clone(),
            target_identity: target.identity.clone(),
            link,
        });
        current = target;
        if last {
            return Ok(AccessPath {
                hops,
                field: current.identity.clone(),
                field_type: current.identity_type,
                is_identity: true,
            });
        }
    }
    Err(unknown(dotted, model))
}

/// `None` means no filtering.
pub fn compile(
    registry: &ModelRegistry,
    model: &ModelDescriptor,
    spec: &FilterSpecification,
) -> Result<Option<Predicate>, AppError> {
    let mut atoms = Vec::with_capacity(spec.filters.len());
    for filter in &spec.filters {
        let path = resolve_path(registry, model, &filter.field)?;
        if let Some(atom) = compile_filter(path, filter) {
            atoms.push(atom);
        }
    }
    Ok(combine(atoms, spec.logic))
}

/// Records of `model` whose owning field `relation` references `id`.
pub fn references(
    registry: &ModelRegistry,
    model: &ModelDescriptor,
    relation: &str,
    id: &Value,
) -> Result<Predicate, AppError> {
    let path = resolve_path(registry, model, relation)?;
    Ok(Predicate::Compare {
        path,
        op: Comparison::Eq,
        value: id.clone(),
    })
}

fn combine(mut atoms: Vec<Predicate>, logic: FilterLogic) -> Option<Predicate> {
    match atoms.len() {
        0 => None,
        1 => atoms.pop(),
        _ => Some(match logic {
            FilterLogic::And => Predicate::And(atoms),
            FilterLogic::Or => Predicate::Or(atoms),
        }),
    }
}

fn typed(path: &AccessPath, value: &Value) -> Value {
    coerce(value, path.field_type).unwrap_or_else(|e| {
        tracing::debug!(field = %path.field, "filter value kept as given: {}", e);
        value.clone()
    })
}

fn compile_filter(path: AccessPath, filter: &Filter) -> Option<Predicate> {
    let value = typed(&path, &filter.value);
    let ordered = |op: Comparison, path: AccessPath, value: Value| {
        if value.is_null() {
            None
        } else {
            Some(Predicate::Compare { path, op, value })
        }
    };
    match filter.operator {
        FilterOperation::Eq if value.is_null() => Some(Predicate::IsNull(path)),
        FilterOperation::Neq if value.is_null() => Some(Predicate::IsNotNull(path)),
        FilterOperation::Eq => ordered(Comparison::Eq, path, value),
        FilterOperation::Neq => ordered(Comparison::Neq, path, value),
        FilterOperation::Gt => ordered(Comparison::Gt, path, value),
        FilterOperation::Gte => ordered(Comparison::Gte, path, value),
        FilterOperation::Lt => ordered(Comparison::Lt, path, value),
        FilterOperation::Lte => ordered(Comparison::Lte, path, value),
        FilterOperation::Like => {
            let raw = match &filter.value {
                Value::Null => return None,
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let pattern = if raw.contains('%') {
                raw
            } else {
                format!("%{}%", raw)
            };
            Some(Predicate::Like { path, pattern })
        }
        FilterOperation::In => match &filter.value {
            Value::Array(items) if items.is_empty() => Some(Predicate::Never),
            Value::Array(items) => Some(Predicate::In {
                values: items.iter().map(|v| typed(&path, v)).collect(),
                path,
            }),
            Value::Null => None,
            _ => {
                tracing::warn!("in filter on {} needs a list, ignoring", filter.field);
                None
            }
        },
        FilterOperation::Between => {
            let high = filter
                .second_value
                .as_ref()
                .map(|v| typed(&path, v))
                .unwrap_or(Value::Null);
            if value.is_null() || high.is_null() {
                return None;
            }
            Some(Predicate::Between {
                path,
                low: value,
                high,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_models, resolve};
    use serde_json::json;

    fn registry() -> ModelRegistry {
        resolve(
            &parse_models(
                r#"[
            { "name": "Categoria", "path_segment": "categorias",
              "fields": [{ "name": "nombre", "type": "string" }],
              "relationships": [{ "name": "productos", "kind": "one_to_many", "target": "Producto", "mapped_by": "categoria" }] },
            { "name": "Producto", "path_segment": "productos",
              "fields": [{ "name": "nombre", "type": "string" }, { "name": "precio", "type": "double" }],
              "relationships": [{ "name": "categoria", "kind": "many_to_one", "target": "Categoria" }] }
        ]"#,
            )
            .unwrap(),
        )
        .unwrap()
    }

    fn compile_one(filter: Filter) -> Option<Predicate> {
        let r = registry();
        let m = r.resolve("productos").unwrap();
        compile(&r, m, &FilterSpecification::new().with_filter(filter)).unwrap()
    }

    #[test]
    fn empty_spec_matches_all() {
        let r = registry();
        let m = r.resolve("productos").unwrap();
        assert_eq!(compile(&r, m, &FilterSpecification::new()).unwrap(), None);
    }

    #[test]
    fn empty_in_matches_nothing() {
        assert_eq!(
            compile_one(Filter::new("precio", FilterOperation::In, json!([]))),
            Some(Predicate::Never)
        );
    }

    #[test]
    fn values_are_coerced_to_field_type() {
        match compile_one(Filter::new("precio", FilterOperation::Gt, "500")) {
            Some(Predicate::Compare { op: Comparison::Gt, value, path }) => {
                assert_eq!(value, json!(500.0));
                assert!(path.hops.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn uncoercible_values_pass_through() {
        match compile_one(Filter::new("precio", FilterOperation::Eq, "cheap")) {
            Some(Predicate::Compare { value, .. }) => assert_eq!(value, json!("cheap")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn null_handling() {
        assert!(matches!(
            compile_one(Filter::new("precio", FilterOperation::Eq, Value::Null)),
            Some(Predicate::IsNull(_))
        ));
        assert!(matches!(
            compile_one(Filter::new("precio", FilterOperation::Neq, "")),
            Some(Predicate::IsNotNull(_))
        ));
        assert_eq!(compile_one(Filter::new("precio", FilterOperation::Gt, Value::Null)), None);
        assert_eq!(compile_one(Filter::between("precio", 1, Value::Null)), None);
    }

    #[test]
    fn like_wraps_unless_wildcard_given() {
        assert!(matches!(
            compile_one(Filter::new("nombre", FilterOperation::Like, "ar")),
            Some(Predicate::Like { pattern, .. }) if pattern == "%ar%"
        ));
        assert!(matches!(
            compile_one(Filter::new("nombre", FilterOperation::Like, "Lap%")),
            Some(Predicate::Like { pattern, .. }) if pattern == "Lap%"
        ));
    }

    #[test]
    fn dotted_paths_cross_relationships() {
        let r = registry();
        let productos = r.resolve("productos").unwrap();
        let path = resolve_path(&r, productos, "categoria.nombre").unwrap();
        assert_eq!(path.hops.len(), 1);
        assert_eq!(path.hops[0].link, Link::Owned { many: false });
        assert_eq!(path.field_type, FieldType::String);

        let path = resolve_path(&r, productos, "categoria").unwrap();
        assert!(path.is_identity);
        assert_eq!(path.field, "id");

        let categorias = r.resolve("categorias").unwrap();
        let path = resolve_path(&r, categorias, "productos.precio").unwrap();
        assert_eq!(
            path.hops[0].link,
            Link::Mapped { mapped_by: "categoria".into(), many: false }
        );
    }

    #[test]
    fn unknown_field_is_rejected() {
        let r = registry();
        let m = r.resolve("productos").unwrap();
        let spec = FilterSpecification::new().with_filter(Filter::new("color", FilterOperation::Eq, "x"));
        assert!(matches!(compile(&r, m, &spec), Err(AppError::InvalidFilterSyntax(_))));
        assert!(resolve_path(&r, m, "categoria.color").is_err());
    }

    #[test]
    fn or_combines_atoms() {
        let r = registry();
        let m = r.resolve("productos").unwrap();
        let spec = FilterSpecification::new()
            .with_filter(Filter::new("nombre", FilterOperation::Eq, "Laptop"))
            .with_filter(Filter::new("nombre", FilterOperation::Eq, "Silla"))
            .with_logic(FilterLogic::Or);
        assert!(matches!(compile(&r, m, &spec).unwrap(), Some(Predicate::Or(v)) if v.len() == 2));
    }
}
