//! In-memory provider. Units of work hold one lock for their whole life and roll back on drop.

use crate::coerce::{compare, compare_values};
use crate::config::{FieldType, ModelDescriptor};
use crate::error::{AppError, StorageError};
use crate::filter::{AccessPath, Comparison, Hop, Link, Predicate};
use crate::store::{EntityStore, Sort, SortDirection, UnitOfWork};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum RowKey {
    Int(i64),
    Text(String),
}

impl RowKey {
    fn of(v: &Value) -> Option<Self> {
        match v {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .map(RowKey::Int),
            Value::String(s) => Some(RowKey::Text(s.clone())),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default)]
struct Tables {
    rows: HashMap<String, BTreeMap<RowKey, Value>>,
    sequences: HashMap<String, i64>,
}

impl Tables {
    fn get(&self, model: &str, id: &Value) -> Option<&Value> {
        self.rows.get(model)?.get(&RowKey::of(id)?)
    }

    fn scan<'a>(&'a self, model: &str) -> impl Iterator<Item = &'a Value> + 'a {
        self.rows.get(model).into_iter().flat_map(|t| t.values())
    }

    fn bump_sequence(&mut self, model: &str, key: &RowKey) {
        if let RowKey::Int(n) = key {
            let seq = self.sequences.entry(model.to_string()).or_insert(0);
            *seq = (*seq).max(*n);
        }
    }
}

/// Process-local store; clones share the same tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, AppError> {
        let guard = self.tables.clone().lock_owned().await;
        let snapshot = guard.clone();
        Ok(Box::new(MemoryUnitOfWork {
            guard,
            snapshot: Some(snapshot),
        }))
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }
}

struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<Tables>,
    /// State at `begin`; restored unless committed.
    snapshot: Option<Tables>,
}

impl Drop for MemoryUnitOfWork {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            tracing::debug!("rolling back in-memory unit of work");
            *self.guard = snapshot;
        }
    }
}

fn into_object(model: &ModelDescriptor, record: Value) -> Result<Map<String, Value>, AppError> {
    match record {
        Value::Object(m) => Ok(m),
        _ => Err(StorageError::Corrupt(format!("{} record is not an object", model.path_segment)).into()),
    }
}

fn row_key(model: &ModelDescriptor, id: &Value) -> Result<RowKey, AppError> {
    RowKey::of(id).ok_or_else(|| {
        StorageError::Corrupt(format!("{} identity {} is not a key", model.path_segment, id)).into()
    })
}

impl MemoryUnitOfWork {
    fn next_identity(&mut self, model: &ModelDescriptor) -> Result<Value, AppError> {
        if !model.identity_generated {
            return Err(StorageError::Conflict(format!("{} requires an identity", model.path_segment)).into());
        }
        match model.identity_type {
            FieldType::Integer | FieldType::Long => {
                let seq = self.guard.sequences.entry(model.path_segment.clone()).or_insert(0);
                *seq += 1;
                Ok(Value::Number((*seq).into()))
            }
            FieldType::Uuid => Ok(Value::String(uuid::Uuid::new_v4().to_string())),
            other => Err(StorageError::Conflict(format!(
                "cannot generate {:?} identity for {}",
                other, model.path_segment
            ))
            .into()),
        }
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn find_by_identity(
        &mut self,
        model: &ModelDescriptor,
        id: &Value,
    ) -> Result<Option<Value>, AppError> {
        Ok(self.guard.get(&model.path_segment, id).cloned())
    }

    async fn persist(&mut self, model: &ModelDescriptor, record: Value) -> Result<Value, AppError> {
        let mut record = into_object(model, record)?;
        let id = match record.get(&model.identity).filter(|v| !v.is_null()) {
            Some(id) => id.clone(),
            None => self.next_identity(model)?,
        };
        let key = row_key(model, &id)?;
        let exists = self
            .guard
            .rows
            .get(&model.path_segment)
            .map_or(false, |t| t.contains_key(&key));
        if exists {
            return Err(StorageError::Conflict(format!("{} {} already exists", model.path_segment, id)).into());
        }
        record.insert(model.identity.clone(), id);
        let record = Value::Object(record);
        self.guard.bump_sequence(&model.path_segment, &key);
        self.guard
            .rows
            .entry(model.path_segment.clone())
            .or_default()
            .insert(key, record.clone());
        Ok(record)
    }

    async fn merge(&mut self, model: &ModelDescriptor, record: Value) -> Result<Value, AppError> {
        let id = model
            .identity_of(&record)
            .cloned()
            .ok_or_else(|| StorageError::Conflict(format!("merge into {} without identity", model.path_segment)))?;
        let key = row_key(model, &id)?;
        self.guard.bump_sequence(&model.path_segment, &key);
        self.guard
            .rows
            .entry(model.path_segment.clone())
            .or_default()
            .insert(key, record.clone());
        Ok(record)
    }

    async fn remove(&mut self, model: &ModelDescriptor, id: &Value) -> Result<bool, AppError> {
        let key = row_key(model, id)?;
        Ok(self
            .guard
            .rows
            .get_mut(&model.path_segment)
            .map_or(false, |t| t.remove(&key).is_some()))
    }

    async fn query(
        &mut self,
        model: &ModelDescriptor,
        predicate: Option<&Predicate>,
        sort: Option<&Sort>,
        offset: Option<u64>,
        limit: Option<u64>,
    ) -> Result<Vec<Value>, AppError> {
        let tables: &Tables = &self.guard;
        let mut rows: Vec<&Value> = tables
            .scan(&model.path_segment)
            .filter(|r| predicate.map_or(true, |p| eval(tables, r, p)))
            .collect();
        if let Some(sort) = sort {
            rows.sort_by(|a, b| order(a, b, sort));
        }
        let rows = rows.into_iter().skip(offset.unwrap_or(0) as usize);
        Ok(match limit {
            Some(n) => rows.take(n as usize).cloned().collect(),
            None => rows.cloned().collect(),
        })
    }

    async fn count(
        &mut self,
        model: &ModelDescriptor,
        predicate: Option<&Predicate>,
    ) -> Result<u64, AppError> {
        let tables: &Tables = &self.guard;
        Ok(tables
            .scan(&model.path_segment)
            .filter(|r| predicate.map_or(true, |p| eval(tables, r, p)))
            .count() as u64)
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let mut this = self;
        this.snapshot = None;
        Ok(())
    }
}

fn order(a: &Value, b: &Value, sort: &Sort) -> Ordering {
    let av = a.get(&sort.field).unwrap_or(&Value::Null);
    let bv = b.get(&sort.field).unwrap_or(&Value::Null);
    let ord = match (av.is_null(), bv.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        _ => compare(av, bv, sort.field_type).unwrap_or(Ordering::Equal),
    };
    match sort.direction {
        SortDirection::Asc => ord,
        SortDirection::Desc => ord.reverse(),
    }
}

/// Whether a stored reference slot (single id or id list) holds `id`.
fn holds_reference(slot: Option<&Value>, id: &Value) -> bool {
    match slot {
        Some(Value::Array(ids)) => ids.iter().any(|v| compare_values(v, id) == Some(Ordering::Equal)),
        Some(v) => compare_values(v, id) == Some(Ordering::Equal),
        None => false,
    }
}

fn follow<'a>(tables: &'a Tables, record: &'a Value, hop: &Hop) -> Vec<&'a Value> {
    match &hop.link {
        Link::Owned { .. } => match record.get(&hop.relation) {
            Some(Value::Array(ids)) => ids.iter().filter_map(|id| tables.get(&hop.target, id)).collect(),
            Some(id) if !id.is_null() => tables.get(&hop.target, id).into_iter().collect(),
            _ => Vec::new(),
        },
        Link::Mapped { mapped_by, .. } => match record.get(&hop.source_identity) {
            Some(source) if !source.is_null() => tables
                .scan(&hop.target)
                .filter(|row| holds_reference(row.get(mapped_by), source))
                .collect(),
            _ => Vec::new(),
        },
    }
}

/// Terminal values reached from `record` along `path`, one per reachable record.
fn reached(tables: &Tables, record: &Value, path: &AccessPath) -> Vec<Value> {
    let mut frontier = vec![record];
    for hop in &path.hops {
        frontier = frontier
            .into_iter()
            .flat_map(|r| follow(tables, r, hop))
            .collect();
    }
    frontier
        .into_iter()
        .map(|r| r.get(&path.field).cloned().unwrap_or(Value::Null))
        .collect()
}

fn text_of(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// SQL LIKE as an anchored regex: `%` matches any run, `_` one character. Case-sensitive.
fn like_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("(?s)^");
    for c in pattern.chars() {
        match c {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            c => re.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    re.push('$');
    Regex::new(&re)
        .map_err(|e| tracing::warn!("like pattern {} not usable: {}", pattern, e))
        .ok()
}

fn satisfies(v: &Value, value: &Value, ty: FieldType, op: Comparison) -> bool {
    let Some(ord) = compare(v, value, ty) else {
        return false;
    };
    match op {
        Comparison::Eq => ord == Ordering::Equal,
        Comparison::Neq => ord != Ordering::Equal,
        Comparison::Gt => ord == Ordering::Greater,
        Comparison::Gte => ord != Ordering::Less,
        Comparison::Lt => ord == Ordering::Less,
        Comparison::Lte => ord != Ordering::Greater,
    }
}

fn eval(tables: &Tables, record: &Value, predicate: &Predicate) -> bool {
    match predicate {
        Predicate::Compare { path, op, value } => reached(tables, record, path)
            .iter()
            .any(|v| satisfies(v, value, path.field_type, *op)),
        Predicate::IsNull(path) => reached(tables, record, path).iter().any(Value::is_null),
        Predicate::IsNotNull(path) => reached(tables, record, path).iter().any(|v| !v.is_null()),
        Predicate::Like { path, pattern } => {
            let Some(re) = like_regex(pattern) else {
                return false;
            };
            reached(tables, record, path)
                .iter()
                .any(|v| text_of(v).map_or(false, |s| re.is_match(&s)))
        }
        Predicate::In { path, values } => reached(tables, record, path).iter().any(|v| {
            values
                .iter()
                .any(|x| satisfies(v, x, path.field_type, Comparison::Eq))
        }),
        Predicate::Between { path, low, high } => reached(tables, record, path).iter().any(|v| {
            satisfies(v, low, path.field_type, Comparison::Gte)
                && satisfies(v, high, path.field_type, Comparison::Lte)
        }),
        Predicate::And(all) => all.iter().all(|p| eval(tables, record, p)),
        Predicate::Or(any) => any.iter().any(|p| eval(tables, record, p)),
        Predicate::Never => false,
    }
}
