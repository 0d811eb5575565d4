//! PostgreSQL provider: one JSONB document table per model; a unit of work is a transaction.

use crate::config::{ModelDescriptor, ModelRegistry};
use crate::error::{AppError, StorageError};
use crate::filter::Predicate;
use crate::sql::{self, QueryBuf};
use crate::store::{EntityStore, Sort, UnitOfWork};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{ConnectOptions, PgPool, Postgres, Row, Transaction};
use std::str::FromStr;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    schema: String,
}

impl PgStore {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        PgStore {
            pool,
            schema: schema.into(),
        }
    }

    /// Create the database if missing, then open a pool.
    pub async fn connect(database_url: &str, schema: &str) -> Result<Self, AppError> {
        ensure_database_exists(database_url).await?;
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool, schema))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the schema and one table per registered model.
    pub async fn ensure_tables(&self, registry: &ModelRegistry) -> Result<(), AppError> {
        sqlx::query(&sql::create_schema(&self.schema))
            .execute(&self.pool)
            .await?;
        for model in registry.models() {
            sqlx::query(&sql::create_table(&self.schema, model))
                .execute(&self.pool)
                .await?;
            sqlx::query(&sql::create_payload_index(&self.schema, model))
                .execute(&self.pool)
                .await?;
            tracing::info!(model = %model.path_segment, schema = %self.schema, "table ready");
        }
        Ok(())
    }
}

#[async_trait]
impl EntityStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, AppError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork {
            tx,
            schema: self.schema.clone(),
        }))
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
    schema: String,
}

/// Unique violations surface as conflicts; everything else stays a database error.
fn storage(e: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return StorageError::Conflict(db.message().to_string()).into();
        }
    }
    e.into()
}

fn record_of(model: &ModelDescriptor, row: &PgRow) -> Result<Value, AppError> {
    let id: Value = row.try_get("id")?;
    let payload: Value = row.try_get("payload")?;
    let mut record = match payload {
        Value::Object(m) => m,
        _ => {
            return Err(StorageError::Corrupt(format!(
                "{} {} payload is not an object",
                model.path_segment, id
            ))
            .into())
        }
    };
    record.insert(model.identity.clone(), id);
    Ok(Value::Object(record))
}

/// Split a record into its identity (if set) and the stored payload.
fn split(model: &ModelDescriptor, record: Value) -> Result<(Option<Value>, Value), AppError> {
    let mut m: Map<String, Value> = match record {
        Value::Object(m) => m,
        _ => {
            return Err(StorageError::Corrupt(format!("{} record is not an object", model.path_segment)).into())
        }
    };
    let id = m.remove(&model.identity).filter(|v| !v.is_null());
    Ok((id, Value::Object(m)))
}

impl PgUnitOfWork {
    async fn rows(&mut self, q: QueryBuf) -> Result<Vec<PgRow>, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(p.clone());
        }
        query.fetch_all(&mut *self.tx).await.map_err(storage)
    }

    async fn row(&mut self, q: QueryBuf) -> Result<Option<PgRow>, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(p.clone());
        }
        query.fetch_optional(&mut *self.tx).await.map_err(storage)
    }

    async fn execute(&mut self, q: QueryBuf) -> Result<u64, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "execute");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(p.clone());
        }
        let done = query.execute(&mut *self.tx).await.map_err(storage)?;
        Ok(done.rows_affected())
    }

    async fn written(&mut self, model: &ModelDescriptor, q: QueryBuf) -> Result<Value, AppError> {
        let row = self.row(q).await?.ok_or_else(|| {
            StorageError::Corrupt(format!("write to {} returned no row", model.path_segment))
        })?;
        record_of(model, &row)
    }

    async fn sync_sequence(&mut self, model: &ModelDescriptor) -> Result<(), AppError> {
        if let Some(stmt) = sql::sync_sequence(&self.schema, model) {
            sqlx::query(&stmt)
                .execute(&mut *self.tx)
                .await
                .map_err(storage)?;
        }
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn find_by_identity(
        &mut self,
        model: &ModelDescriptor,
        id: &Value,
    ) -> Result<Option<Value>, AppError> {
        let q = sql::select_by_id(&self.schema, model, id);
        match self.row(q).await? {
            Some(row) => Ok(Some(record_of(model, &row)?)),
            None => Ok(None),
        }
    }

    async fn persist(&mut self, model: &ModelDescriptor, record: Value) -> Result<Value, AppError> {
        let (id, payload) = split(model, record)?;
        if id.is_none() && !model.identity_generated {
            return Err(StorageError::Conflict(format!("{} requires an identity", model.path_segment)).into());
        }
        let q = sql::insert(&self.schema, model, id.as_ref(), payload);
        let saved = self.written(model, q).await?;
        if id.is_some() {
            self.sync_sequence(model).await?;
        }
        Ok(saved)
    }

    async fn merge(&mut self, model: &ModelDescriptor, record: Value) -> Result<Value, AppError> {
        let (id, payload) = split(model, record)?;
        let id = id.ok_or_else(|| {
            StorageError::Conflict(format!("merge into {} without identity", model.path_segment))
        })?;
        let q = sql::upsert(&self.schema, model, &id, payload);
        let saved = self.written(model, q).await?;
        self.sync_sequence(model).await?;
        Ok(saved)
    }

    async fn remove(&mut self, model: &ModelDescriptor, id: &Value) -> Result<bool, AppError> {
        let q = sql::delete(&self.schema, model, id);
        Ok(self.execute(q).await? > 0)
    }

    async fn query(
        &mut self,
        model: &ModelDescriptor,
        predicate: Option<&Predicate>,
        sort: Option<&Sort>,
        offset: Option<u64>,
        limit: Option<u64>,
    ) -> Result<Vec<Value>, AppError> {
        let q = sql::select(&self.schema, model, predicate, sort, offset, limit);
        self.rows(q)
            .await?
            .iter()
            .map(|row| record_of(model, row))
            .collect()
    }

    async fn count(
        &mut self,
        model: &ModelDescriptor,
        predicate: Option<&Predicate>,
    ) -> Result<u64, AppError> {
        let q = sql::count(&self.schema, model, predicate);
        let n: i64 = match self.row(q).await? {
            Some(row) => row.try_get(0)?,
            None => 0,
        };
        Ok(n.max(0) as u64)
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let this = *self;
        this.tx.commit().await.map_err(storage)
    }
}

/// Ensure the database in `database_url` exists; create it if not. Connects to the
/// default `postgres` database to run CREATE DATABASE. Call before creating the main pool.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), AppError> {
    let (admin_url, db_name) = parse_db_name_from_url(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = sqlx::postgres::PgConnectOptions::from_str(&admin_url)
        .map_err(|e| AppError::BadRequest(format!("invalid DATABASE_URL: {}", e)))?;
    let mut conn: sqlx::PgConnection = opts.connect().await?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists.0 {
        tracing::info!(database = %db_name, "creating database");
        sqlx::query(&format!("CREATE DATABASE {}", quote_ident(&db_name)))
            .execute(&mut conn)
            .await?;
    }
    Ok(())
}

fn parse_db_name_from_url(url: &str) -> Result<(String, String), AppError> {
    let path_start = url
        .rfind('/')
        .ok_or_else(|| AppError::BadRequest("DATABASE_URL: no path".into()))?
        + 1;
    let path_and_query = url.get(path_start..).unwrap_or("");
    let db_name = path_and_query.split('?').next().unwrap_or("").trim();
    let base = url.get(..path_start).unwrap_or(url);
    Ok((format!("{}postgres", base), db_name.to_string()))
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
