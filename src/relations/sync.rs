//! Relationship synchronizer: binds referenced instances from input, then mirrors this entity
//! onto the counterpart field of every related instance.

use crate::config::{ModelDescriptor, ModelRegistry, RelationDescriptor};
use crate::error::AppError;
use crate::relations::{from_record, same_identity, EntityInput, PendingLink};
use crate::store::UnitOfWork;
use serde_json::{Map, Value};

#[derive(Clone, Debug, PartialEq)]
pub struct Synced {
    pub entity: Value,
    /// Owning-side writes on related records, applied after the root is persisted.
    pub pending: Vec<PendingLink>,
}

pub struct RelationshipSynchronizer<'a> {
    registry: &'a ModelRegistry,
}

fn unresolved(rel: &RelationDescriptor, reason: String) {
    let e = AppError::RelationshipResolution {
        field: rel.name.clone(),
        reason,
    };
    tracing::warn!("reference skipped: {}", e);
}

fn bind(entity: &mut Value, field: &str, value: Value) {
    if let Some(m) = entity.as_object_mut() {
        m.insert(field.to_string(), value);
    }
}

/// Same related instance: by identity once it has one, by snapshot before.
fn same_entity(model: &ModelDescriptor, candidate: &Value, snapshot: &Value) -> bool {
    match (model.identity_of(candidate), model.identity_of(snapshot)) {
        (Some(a), Some(b)) => same_identity(a, b),
        (_, None) => candidate == snapshot,
        _ => false,
    }
}

/// Make `field` of `other` contain (or point to) `snapshot`. Returns whether it changed.
fn attach(model: &ModelDescriptor, other: &mut Value, field: &str, many: bool, snapshot: &Value) -> bool {
    let Some(m) = other.as_object_mut() else {
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
            Some(items) if !items.iter().any(|x| same_entity(model, x, snapshot)) => {
                items.push(snapshot.clone());
                true
            }
            _ => false,
        }
    } else {
        if m.get(field).map_or(false, |x| same_entity(model, x, snapshot)) {
            return false;
        }
        m.insert(field.to_string(), snapshot.clone());
        true
    }
}

impl<'a> RelationshipSynchronizer<'a> {
    pub fn new(registry: &'a ModelRegistry) -> Self {
        RelationshipSynchronizer { registry }
    }

    /// Resolve references named by `input` and restore bidirectional consistency.
    /// Descriptor problems leave `entity` unchanged; storage failures propagate.
    pub async fn sync(
        &self,
        model: &ModelDescriptor,
        entity: Value,
        input: &EntityInput,
        uow: &mut dyn UnitOfWork,
    ) -> Result<Synced, AppError> {
        let original = entity.clone();
        match self.passes(model, entity, input, uow).await {
            Ok(synced) => Ok(synced),
            Err(e @ AppError::Storage(_)) => Err(e),
            Err(e) => {
                tracing::warn!(model = %model.path_segment, "relationship synchronization skipped: {}", e);
                Ok(Synced {
                    entity: original,
                    pending: Vec::new(),
                })
            }
        }
    }

    async fn passes(
        &self,
        model: &ModelDescriptor,
        mut entity: Value,
        input: &EntityInput,
        uow: &mut dyn UnitOfWork,
    ) -> Result<Synced, AppError> {
        if let EntityInput::Fields(raw) = input {
            self.resolve(model, &mut entity, raw, uow).await?;
        }
        let pending = self.mirror(model, &mut entity)?;
        Ok(Synced { entity, pending })
    }

    fn target(&self, rel: &RelationDescriptor) -> Result<&'a ModelDescriptor, AppError> {
        self.registry
            .get(&rel.target)
            .ok_or_else(|| AppError::RelationshipResolution {
                field: rel.name.clone(),
                reason: format!("unknown target model {}", rel.target),
            })
    }

    /// Resolve pass. Later sources override earlier ones: embedded value, then `<field>Id` / `<field>Ids`.
    async fn resolve(
        &self,
        model: &ModelDescriptor,
        entity: &mut Value,
        raw: &Map<String, Value>,
        uow: &mut dyn UnitOfWork,
    ) -> Result<(), AppError> {
        for rel in &model.relations {
            let target = self.target(rel)?;
            if let Some(v) = raw.get(&rel.name) {
                let bound = match (rel.is_collection(), v) {
                    (_, Value::Null) if rel.is_collection() => Some(Value::Array(Vec::new())),
                    (_, Value::Null) => Some(Value::Null),
                    (true, Value::Array(items)) => Some(self.fetch_all(rel, target, items, uow).await?),
                    (true, _) => {
                        unresolved(rel, "collection expects a list".into());
                        None
                    }
                    (false, other) => self.fetch_one(rel, target, other, uow).await?,
                };
                if let Some(value) = bound {
                    bind(entity, &rel.name, value);
                }
            }

            if rel.is_collection() {
                let Some(v) = raw.get(&rel.ids_key()) else { continue };
                let bound = match v {
                    Value::Null => Value::Array(Vec::new()),
                    Value::Array(items) => self.fetch_all(rel, target, items, uow).await?,
                    single => self.fetch_all(rel, target, std::slice::from_ref(single), uow).await?,
                };
                bind(entity, &rel.name, bound);
            } else {
                let Some(v) = raw.get(&rel.id_key()) else { continue };
                if v.is_null() {
                    bind(entity, &rel.name, Value::Null);
                } else if let Some(found) = self.fetch_one(rel, target, v, uow).await? {
                    bind(entity, &rel.name, found);
                }
            }
        }
        Ok(())
    }

    /// Fetch one referenced instance from an embedded object or a bare identity.
    async fn fetch_one(
        &self,
        rel: &RelationDescriptor,
        target: &ModelDescriptor,
        reference: &Value,
        uow: &mut dyn UnitOfWork,
    ) -> Result<Option<Value>, AppError> {
        let raw = match reference {
            Value::Object(_) => target.identity_of(reference).cloned().unwrap_or(Value::Null),
            other => other.clone(),
        };
        let id = match target.coerce_identity(&raw) {
            Ok(id) => id,
            Err(e) => {
                unresolved(rel, e.to_string());
                return Ok(None);
            }
        };
        match uow.find_by_identity(target, &id).await? {
            Some(record) => Ok(Some(from_record(self.registry, target, &record))),
            None => {
                unresolved(rel, format!("{} {} not found", target.path_segment, id));
                Ok(None)
            }
        }
    }

    async fn fetch_all(
        &self,
        rel: &RelationDescriptor,
        target: &ModelDescriptor,
        references: &[Value],
        uow: &mut dyn UnitOfWork,
    ) -> Result<Value, AppError> {
        let mut found: Vec<Value> = Vec::with_capacity(references.len());
        for reference in references {
            if let Some(instance) = self.fetch_one(rel, target, reference, uow).await? {
                if !found.iter().any(|f| same_entity(target, f, &instance)) {
                    found.push(instance);
                }
            }
        }
        Ok(Value::Array(found))
    }

    /// Consistency pass: mirror a snapshot of `entity` onto each related instance's counterpart.
    fn mirror(&self, model: &ModelDescriptor, entity: &mut Value) -> Result<Vec<PendingLink>, AppError> {
        let snapshot = model.snapshot(entity);
        let mut pending = Vec::new();
        for rel in &model.relations {
            let Some(counterpart) = rel.counterpart() else { continue };
            let target = self.target(rel)?;
            let counter = target
                .relation(counterpart)
                .ok_or_else(|| AppError::RelationshipResolution {
                    field: format!("{}.{}", target.path_segment, counterpart),
                    reason: "counterpart field is not declared".into(),
                })?;
            let Some(slot) = entity.get_mut(&rel.name) else { continue };
            let related: Vec<&mut Value> = if slot.is_object() {
                vec![slot]
            } else if let Value::Array(items) = slot {
                items.iter_mut().collect()
            } else {
                Vec::new()
            };
            for other in related {
                attach(model, other, counterpart, counter.is_collection(), &snapshot);
                if !counter.is_owning() {
                    continue;
                }
                if let Some(id) = target.identity_of(other) {
                    pending.push(PendingLink {
                        model: target.path_segment.clone(),
                        id: id.clone(),
                        field: counterpart.to_string(),
                        many: counter.is_collection(),
                    });
                }
            }
        }
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_models, resolve};
    use crate::store::{EntityStore, MemoryStore};
    use serde_json::json;

    fn registry() -> ModelRegistry {
        resolve(
            &parse_models(
                r#"[
            { "name": "Categoria", "path_segment": "categorias",
              "fields": [{ "name": "nombre", "type": "string" }],
              "relationships": [{ "name": "productos", "kind": "one_to_many", "target": "Producto", "mapped_by": "categoria" }] },
            { "name": "Producto", "path_segment": "productos",
              "fields": [{ "name": "nombre", "type": "string" }],
              "relationships": [
                { "name": "categoria", "kind": "many_to_one", "target": "Categoria" },
                { "name": "etiquetas", "kind": "many_to_many", "target": "Etiqueta" }] },
            { "name": "Etiqueta", "path_segment": "etiquetas",
              "fields": [{ "name": "nombre", "type": "string" }],
              "relationships": [{ "name": "productos", "kind": "many_to_many", "target": "Producto", "mapped_by": "etiquetas" }] }
        ]"#,
            )
            .unwrap(),
        )
        .unwrap()
    }

    async fn seeded(r: &ModelRegistry) -> MemoryStore {
        let store = MemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        uow.persist(r.resolve("categorias").unwrap(), json!({ "nombre": "Hogar" }))
            .await
            .unwrap();
        for nombre in ["oferta", "nuevo"] {
            uow.persist(r.resolve("etiquetas").unwrap(), json!({ "nombre": nombre }))
                .await
                .unwrap();
        }
        uow.persist(r.resolve("productos").unwrap(), json!({ "nombre": "Mesa", "categoria": null }))
            .await
            .unwrap();
        uow.commit().await.unwrap();
        store
    }

    #[tokio::test]
    async fn id_keys_bind_and_mirror() {
        let r = registry();
        let store = seeded(&r).await;
        let productos = r.resolve("productos").unwrap();
        let input = EntityInput::from_json(json!({
            "nombre": "Silla", "categoriaId": 1, "etiquetasIds": [1, "2", 99]
        }))
        .unwrap();
        let entity = input.to_entity(productos).unwrap();
        let mut uow = store.begin().await.unwrap();
        let synced = RelationshipSynchronizer::new(&r)
            .sync(productos, entity, &input, uow.as_mut())
            .await
            .unwrap();

        assert_eq!(synced.entity["categoria"]["nombre"], json!("Hogar"));
        assert_eq!(synced.entity["categoria"]["productos"], json!([{ "nombre": "Silla" }]));
        assert_eq!(synced.entity["etiquetas"].as_array().unwrap().len(), 2);
        assert_eq!(synced.entity["etiquetas"][1]["productos"], json!([{ "nombre": "Silla" }]));
        assert!(synced.pending.is_empty());
    }

    #[tokio::test]
    async fn inverse_side_produces_pending_links() {
        let r = registry();
        let store = seeded(&r).await;
        let categorias = r.resolve("categorias").unwrap();
        let input = EntityInput::from_json(json!({ "nombre": "Oficina", "productosIds": [1] })).unwrap();
        let entity = input.to_entity(categorias).unwrap();
        let mut uow = store.begin().await.unwrap();
        let synced = RelationshipSynchronizer::new(&r)
            .sync(categorias, entity, &input, uow.as_mut())
            .await
            .unwrap();
        assert_eq!(
            synced.pending,
            vec![PendingLink {
                model: "productos".into(),
                id: json!(1),
                field: "categoria".into(),
                many: false,
            }]
        );
        assert_eq!(synced.entity["productos"][0]["categoria"], json!({ "nombre": "Oficina" }));
    }

    #[tokio::test]
    async fn second_sync_adds_nothing() {
        let r = registry();
        let store = seeded(&r).await;
        let productos = r.resolve("productos").unwrap();
        let input = EntityInput::from_json(json!({ "id": 1, "nombre": "Mesa", "etiquetasIds": [1] })).unwrap();
        let entity = input.to_entity(productos).unwrap();
        let mut uow = store.begin().await.unwrap();
        let sync = RelationshipSynchronizer::new(&r);
        let once = sync.sync(productos, entity, &input, uow.as_mut()).await.unwrap();
        let twice = sync
            .sync(productos, once.entity.clone(), &EntityInput::Instance(once.entity.clone()), uow.as_mut())
            .await
            .unwrap();
        assert_eq!(once.entity, twice.entity);
        assert_eq!(twice.entity["etiquetas"][0]["productos"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_references_are_skipped() {
        let r = registry();
        let store = seeded(&r).await;
        let productos = r.resolve("productos").unwrap();
        let input = EntityInput::from_json(json!({ "nombre": "X", "categoriaId": 42, "categoria": { "nombre": "sin id" } })).unwrap();
        let entity = input.to_entity(productos).unwrap();
        let mut uow = store.begin().await.unwrap();
        let synced = RelationshipSynchronizer::new(&r)
            .sync(productos, entity, &input, uow.as_mut())
            .await
            .unwrap();
        assert!(synced.entity.get("categoria").is_none());

        let input = EntityInput::from_json(json!({ "nombre": "X", "categoriaId": null })).unwrap();
        let entity = input.to_entity(productos).unwrap();
        let synced = RelationshipSynchronizer::new(&r)
            .sync(productos, entity, &input, uow.as_mut())
            .await
            .unwrap();
        assert_eq!(synced.entity["categoria"], Value::Null);
    }
}
