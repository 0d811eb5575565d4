//! Dynamic entity service: CRUD, listing and relationship sub-resources for any registered model.

use crate::config::{ModelDescriptor, ModelRegistry, RelationKind, Settings, MAX_PAGE_SIZE};
use crate::error::{AppError, StorageError};
use crate::filter::{compile, references, FilterSpecification};
use crate::relations::{
    clear_reference, from_record, same_identity, set_reference, to_record, EntityInput,
    PendingLink, RelationshipLoader, RelationshipSynchronizer,
};
use crate::service::{EntityEvents, NoopEvents, RequestValidator};
use crate::store::{EntityStore, Sort, SortDirection, UnitOfWork};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Zero-based page selection. `page: None` lists everything.
#[derive(Clone, Debug, PartialEq)]
pub struct PageRequest {
    pub page: Option<u32>,
    pub size: u32,
    pub sort: Option<String>,
    pub direction: SortDirection,
}

impl PageRequest {
    pub fn of(page: u32, size: u32) -> Self {
        PageRequest {
            page: Some(page),
            size,
            sort: None,
            direction: SortDirection::Asc,
        }
    }

    pub fn unpaged() -> Self {
        PageRequest {
            page: None,
            size: MAX_PAGE_SIZE,
            sort: None,
            direction: SortDirection::Asc,
        }
    }

    pub fn sorted(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort = Some(field.into());
        self.direction = direction;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub content: Vec<Value>,
    pub total_elements: u64,
    pub total_pages: u64,
    pub number: u32,
    pub size: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Listing {
    Page(Page),
    All(Vec<Value>),
}

impl Listing {
    pub fn items(&self) -> &[Value] {
        match self {
            Listing::Page(p) => &p.content,
            Listing::All(v) => v,
        }
    }
}

#[derive(Clone)]
pub struct DynamicEntityService {
    store: Arc<dyn EntityStore>,
    registry: Arc<ModelRegistry>,
    events: Arc<dyn EntityEvents>,
    settings: Settings,
}

impl DynamicEntityService {
    pub fn new(store: Arc<dyn EntityStore>, registry: Arc<ModelRegistry>, settings: Settings) -> Self {
        DynamicEntityService {
            store,
            registry,
            events: Arc::new(NoopEvents),
            settings,
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EntityEvents>) -> Self {
        self.events = events;
        self
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub async fn ping(&self) -> Result<(), AppError> {
        self.store.ping().await
    }

    fn loader(&self) -> RelationshipLoader<'_> {
        RelationshipLoader::new(&self.registry)
    }

    fn sort_of(&self, model: &ModelDescriptor, page: &PageRequest) -> Result<Option<Sort>, AppError> {
        let Some(field) = page.sort.as_deref().map(str::trim).filter(|f| !f.is_empty()) else {
            return Ok(None);
        };
        let field_type = model
            .field_type(field)
            .ok_or_else(|| AppError::BadRequest(format!("cannot sort {} by '{}'", model.path_segment, field)))?;
        Ok(Some(Sort {
            field: field.to_string(),
            field_type,
            is_identity: field == model.identity,
            direction: page.direction,
        }))
    }

    fn validate(&self, model: &ModelDescriptor, entity: &Value) -> Result<(), AppError> {
        let mut errors = BTreeMap::new();
        if !model.identity_generated && model.identity_of(entity).is_none() {
            errors.insert(model.identity.clone(), format!("{} is required", model.identity));
        }
        if self.settings.global_validation && model.validation_enabled {
            errors.extend(RequestValidator::validate(entity, &model.validation));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::ValidationFailed {
                model: model.path_segment.clone(),
                errors,
            })
        }
    }

    async fn existing(
        &self,
        model: &ModelDescriptor,
        id: &Value,
        uow: &mut dyn UnitOfWork,
    ) -> Result<Value, AppError> {
        uow.find_by_identity(model, id)
            .await?
            .ok_or_else(|| AppError::entity_not_found(&model.path_segment, id))
    }

    async fn load_all(
        &self,
        model: &ModelDescriptor,
        records: Vec<Value>,
        uow: &mut dyn UnitOfWork,
    ) -> Result<Vec<Value>, AppError> {
        let loader = self.loader();
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            let entity = from_record(&self.registry, model, &record);
            out.push(loader.load(model, entity, uow, self.settings.relation_depth).await?);
        }
        Ok(out)
    }

    /// Write the owning side of references recorded by the synchronizer.
    async fn apply_links(
        &self,
        pending: &[PendingLink],
        root_id: &Value,
        uow: &mut dyn UnitOfWork,
    ) -> Result<(), AppError> {
        for link in pending {
            let target = self.registry.resolve(&link.model)?;
            let Some(mut record) = uow.find_by_identity(target, &link.id).await? else {
                tracing::warn!(model = %link.model, id = %link.id, "linked record disappeared");
                continue;
            };
            if set_reference(&mut record, &link.field, root_id, link.many) {
                uow.merge(target, record).await?;
            }
            if !link.many {
                self.claim(target, &link.field, &link.id, root_id, uow).await?;
            }
        }
        Ok(())
    }

    /// A one-to-one reference has a single holder: clear `field` on every other record of
    /// `model` that references `referenced`.
    async fn claim(
        &self,
        model: &ModelDescriptor,
        field: &str,
        holder: &Value,
        referenced: &Value,
        uow: &mut dyn UnitOfWork,
    ) -> Result<(), AppError> {
        let Some(rel) = model.relation(field) else {
            return Ok(());
        };
        if rel.kind != RelationKind::OneToOne || !rel.is_owning() {
            return Ok(());
        }
        let predicate = references(&self.registry, model, field, referenced)?;
        let holders = uow.query(model, Some(&predicate), None, None, None).await?;
        for mut other in holders {
            if model.identity_of(&other).map_or(false, |id| same_identity(id, holder)) {
                continue;
            }
            if clear_reference(&mut other, field, referenced, false) {
                tracing::debug!(model = %model.path_segment, field, "previous one-to-one holder detached");
                uow.merge(model, other).await?;
            }
        }
        Ok(())
    }

    /// `claim` every owning one-to-one reference set on `record`.
    async fn claim_all(
        &self,
        model: &ModelDescriptor,
        id: &Value,
        record: &Value,
        uow: &mut dyn UnitOfWork,
    ) -> Result<(), AppError> {
        for rel in model
            .relations
            .iter()
            .filter(|r| r.kind == RelationKind::OneToOne && r.is_owning())
        {
            if let Some(referenced) = record.get(&rel.name).filter(|v| !v.is_null()) {
                self.claim(model, &rel.name, id, referenced, uow).await?;
            }
        }
        Ok(())
    }

    pub async fn list(
        &self,
        path: &str,
        page: &PageRequest,
        spec: &FilterSpecification,
    ) -> Result<Listing, AppError> {
        let model = self.registry.resolve(path)?;
        let predicate = compile(&self.registry, model, spec)?;
        let sort = self.sort_of(model, page)?;
        let mut uow = self.store.begin().await?;

        let listing = match page.page {
            Some(number) => {
                let size = page.size.clamp(1, MAX_PAGE_SIZE);
                let total = uow.count(model, predicate.as_ref()).await?;
                let offset = u64::from(number) * u64::from(size);
                let rows = uow
                    .query(model, predicate.as_ref(), sort.as_ref(), Some(offset), Some(u64::from(size)))
                    .await?;
                let content = self.load_all(model, rows, uow.as_mut()).await?;
                Listing::Page(Page {
                    content,
                    total_elements: total,
                    total_pages: total.div_ceil(u64::from(size)),
                    number,
                    size,
                })
            }
            None => {
                let rows = uow.query(model, predicate.as_ref(), sort.as_ref(), None, None).await?;
                Listing::All(self.load_all(model, rows, uow.as_mut()).await?)
            }
        };
        uow.commit().await?;
        Ok(listing)
    }

    pub async fn get_by_id(&self, path: &str, id: &Value) -> Result<Value, AppError> {
        let model = self.registry.resolve(path)?;
        let id = model.coerce_identity(id)?;
        let mut uow = self.store.begin().await?;
        let record = self.existing(model, &id, uow.as_mut()).await?;
        let entity = from_record(&self.registry, model, &record);
        let loaded = self
            .loader()
            .load(model, entity, uow.as_mut(), self.settings.relation_depth)
            .await?;
        uow.commit().await?;
        Ok(loaded)
    }

    pub async fn create(&self, path: &str, input: EntityInput) -> Result<Value, AppError> {
        let model = self.registry.resolve(path)?;
        let input = if model.identity_generated {
            input.without(&model.identity)
        } else {
            input
        };
        let entity = input.to_entity(model)?;
        let mut uow = self.store.begin().await?;

        let synced = RelationshipSynchronizer::new(&self.registry)
            .sync(model, entity, &input, uow.as_mut())
            .await?;
        let entity = self.events.before_create(model, synced.entity).await?;
        self.validate(model, &entity)?;
        let saved = uow.persist(model, to_record(&self.registry, model, &entity)).await?;
        let id = model.identity_of(&saved).cloned().ok_or_else(|| {
            StorageError::Corrupt(format!("{} persisted without identity", model.path_segment))
        })?;
        self.claim_all(model, &id, &saved, uow.as_mut()).await?;
        self.apply_links(&synced.pending, &id, uow.as_mut()).await?;

        let loaded = self
            .loader()
            .load(model, from_record(&self.registry, model, &saved), uow.as_mut(), self.settings.relation_depth)
            .await?;
        let created = self.events.after_create(model, loaded).await?;
        uow.commit().await?;
        tracing::debug!(model = %model.path_segment, id = %id, "created");
        Ok(created)
    }

    /// Merge update: the payload is laid over the stored entity; fields it does not name are kept.
    pub async fn update(&self, path: &str, id: &Value, input: EntityInput) -> Result<Value, AppError> {
        let model = self.registry.resolve(path)?;
        let id = model.coerce_identity(id)?;
        let input = input.without(&model.identity);
        let incoming = input.to_entity(model)?;
        let mut uow = self.store.begin().await?;
        let existing = self.existing(model, &id, uow.as_mut()).await?;

        let mut entity: Map<String, Value> = match from_record(&self.registry, model, &existing) {
            Value::Object(m) => m,
            _ => Map::new(),
        };
        if let Value::Object(fields) = incoming {
            entity.extend(fields);
        }
        entity.insert(model.identity.clone(), id.clone());

        let synced = RelationshipSynchronizer::new(&self.registry)
            .sync(model, Value::Object(entity), &input, uow.as_mut())
            .await?;
        let entity = self.events.before_update(model, &id, synced.entity).await?;
        self.validate(model, &entity)?;
        let saved = uow.merge(model, to_record(&self.registry, model, &entity)).await?;
        self.claim_all(model, &id, &saved, uow.as_mut()).await?;
        self.apply_links(&synced.pending, &id, uow.as_mut()).await?;

        let loaded = self
            .loader()
            .load(model, from_record(&self.registry, model, &saved), uow.as_mut(), self.settings.relation_depth)
            .await?;
        let updated = self.events.after_update(model, &id, loaded).await?;
        uow.commit().await?;
        Ok(updated)
    }

    /// Delete by identity. Owning references held by other records are cleared first.
    pub async fn delete(&self, path: &str, id: &Value) -> Result<(), AppError> {
        let model = self.registry.resolve(path)?;
        let id = model.coerce_identity(id)?;
        let mut uow = self.store.begin().await?;
        self.existing(model, &id, uow.as_mut()).await?;

        for other in self.registry.models() {
            for rel in other
                .relations
                .iter()
                .filter(|r| r.is_owning() && r.target == model.path_segment)
            {
                let predicate = references(&self.registry, other, &rel.name, &id)?;
                let holders = uow.query(other, Some(&predicate), None, None, None).await?;
                for mut holder in holders {
                    if clear_reference(&mut holder, &rel.name, &id, rel.is_collection()) {
                        uow.merge(other, holder).await?;
                    }
                }
            }
        }

        if !uow.remove(model, &id).await? {
            return Err(AppError::entity_not_found(&model.path_segment, &id));
        }
        uow.commit().await?;
        tracing::debug!(model = %model.path_segment, id = %id, "deleted");
        Ok(())
    }

    /// Value of one relationship field, expanded like the owning entity.
    pub async fn get_related(&self, path: &str, id: &Value, relation: &str) -> Result<Value, AppError> {
        let model = self.registry.resolve(path)?;
        let rel = model.relation(relation).ok_or_else(|| AppError::RelationNotFound {
            model: model.path_segment.clone(),
            relation: relation.to_string(),
        })?;
        let id = model.coerce_identity(id)?;
        let mut uow = self.store.begin().await?;
        let record = self.existing(model, &id, uow.as_mut()).await?;
        let loaded = self
            .loader()
            .load(
                model,
                from_record(&self.registry, model, &record),
                uow.as_mut(),
                self.settings.relation_depth.max(1),
            )
            .await?;
        uow.commit().await?;
        let empty = if rel.is_collection() {
            Value::Array(Vec::new())
        } else {
            Value::Null
        };
        Ok(loaded.get(&rel.name).cloned().unwrap_or(empty))
    }

    /// Link `related` (an identity or an object carrying one) through `relation`.
    pub async fn add_related(
        &self,
        path: &str,
        id: &Value,
        relation: &str,
        related: &Value,
    ) -> Result<Value, AppError> {
        self.edit_related(path, id, relation, related, true).await
    }

    /// Unlink `related_id` from `relation`. Not being linked is `EntityNotFound`.
    pub async fn remove_related(
        &self,
        path: &str,
        id: &Value,
        relation: &str,
        related_id: &Value,
    ) -> Result<Value, AppError> {
        self.edit_related(path, id, relation, related_id, false).await
    }

    async fn edit_related(
        &self,
        path: &str,
        id: &Value,
        relation: &str,
        related: &Value,
        link: bool,
    ) -> Result<Value, AppError> {
        let model = self.registry.resolve(path)?;
        let rel = model.relation(relation).ok_or_else(|| AppError::RelationNotFound {
            model: model.path_segment.clone(),
            relation: relation.to_string(),
        })?;
        let target = self.registry.resolve(&rel.target)?;
        let id = model.coerce_identity(id)?;
        let related_id = match related {
            Value::Object(_) => target.coerce_identity(target.identity_of(related).unwrap_or(&Value::Null))?,
            other => target.coerce_identity(other)?,
        };

        let mut uow = self.store.begin().await?;
        let mut root = self.existing(model, &id, uow.as_mut()).await?;
        let mut other = self.existing(target, &related_id, uow.as_mut()).await?;

        // the write lands on whichever side stores the reference
        let changed = match rel.mapped_by.as_deref() {
            None => {
                let changed = edit(&mut root, &rel.name, &related_id, rel.is_collection(), link);
                if changed {
                    uow.merge(model, root.clone()).await?;
                    if link {
                        self.claim(model, &rel.name, &id, &related_id, uow.as_mut()).await?;
                    }
                }
                changed
            }
            Some(mapped_by) => {
                let many = target.relation(mapped_by).map_or(false, |r| r.is_collection());
                let changed = edit(&mut other, mapped_by, &id, many, link);
                if changed {
                    uow.merge(target, other).await?;
                    if link && !many {
                        self.claim(target, mapped_by, &related_id, &id, uow.as_mut()).await?;
                    }
                }
                changed
            }
        };
        if !link && !changed {
            return Err(AppError::entity_not_found(&target.path_segment, &related_id));
        }

        let loaded = self
            .loader()
            .load(model, from_record(&self.registry, model, &root), uow.as_mut(), self.settings.relation_depth)
            .await?;
        uow.commit().await?;
        Ok(loaded)
    }
}

fn edit(record: &mut Value, field: &str, id: &Value, many: bool, link: bool) -> bool {
    if link {
        set_reference(record, field, id, many)
    } else {
        clear_reference(record, field, id, many)
    }
}
