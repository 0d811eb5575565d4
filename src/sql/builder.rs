//! Builds parameterized statements over per-model document tables.
//!
//! Each model lives in `"<schema>"."<path_segment>"` with an `id` column and a JSONB `payload`
//! holding scalars and owning references. Identifiers come from config only; values are parameters.

use crate::coerce::coerce;
use crate::config::{FieldType, ModelDescriptor};
use crate::filter::{AccessPath, Hop, Link, Predicate};
use crate::sql::PgBindValue;
use crate::store::{Sort, SortDirection};
use serde_json::Value;

const ID: &str = "\"id\"";
const PAYLOAD: &str = "\"payload\"";
const ROOT: &str = "t0";

/// Quote identifier for PostgreSQL (safe: only from config).
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Quote a JSON key as a string literal.
fn literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Full qualified table name.
pub fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

/// Cast applied to a payload text value before typed comparison. `None` compares as text.
pub fn pg_cast(ty: FieldType) -> Option<&'static str> {
    match ty {
        FieldType::Boolean => Some("boolean"),
        FieldType::Integer | FieldType::Long => Some("bigint"),
        FieldType::Float | FieldType::Double => Some("double precision"),
        FieldType::Date => Some("date"),
        FieldType::Datetime => Some("timestamp"),
        FieldType::Uuid => Some("uuid"),
        FieldType::String | FieldType::Json => None,
    }
}

fn identity_cast(model: &ModelDescriptor) -> &'static str {
    pg_cast(model.identity_type).unwrap_or("text")
}

pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<PgBindValue>,
    aliases: usize,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
            aliases: 1,
        }
    }

    fn push_param(&mut self, v: PgBindValue) -> usize {
        self.params.push(v);
        self.params.len()
    }

    fn next_alias(&mut self) -> String {
        let a = format!("t{}", self.aliases);
        self.aliases += 1;
        a
    }

    /// Placeholder for `value` cast to the column type of `ty`.
    fn typed_param(&mut self, value: &Value, ty: FieldType) -> String {
        let n = self.push_param(PgBindValue::from_json(value));
        match pg_cast(ty) {
            Some(cast) => format!("${}::{}", n, cast),
            None => format!("${}", n),
        }
    }
}

/// Whether `value` already has the shape of `ty`. Other values cannot match a typed column.
fn bindable(value: &Value, ty: FieldType) -> bool {
    !value.is_null() && coerce(value, ty).map_or(false, |v| &v == value)
}

pub fn create_schema(schema: &str) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", quoted(schema))
}

/// Table DDL for one model; the identity column follows the declared identity type.
pub fn create_table(schema: &str, model: &ModelDescriptor) -> String {
    let id_column = match (model.identity_type, model.identity_generated) {
        (FieldType::Integer | FieldType::Long, true) => {
            "BIGINT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY"
        }
        (FieldType::Integer | FieldType::Long, false) => "BIGINT PRIMARY KEY",
        (FieldType::Uuid, _) => "UUID PRIMARY KEY DEFAULT gen_random_uuid()",
        _ => "TEXT PRIMARY KEY",
    };
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({} {}, {} JSONB NOT NULL DEFAULT '{{}}'::jsonb, \"updated_at\" TIMESTAMPTZ NOT NULL DEFAULT NOW())",
        qualified_table(schema, &model.path_segment),
        ID,
        id_column,
        PAYLOAD
    )
}

/// GIN index over the payload, used by containment joins on reference lists.
pub fn create_payload_index(schema: &str, model: &ModelDescriptor) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} USING GIN ({})",
        quoted(&format!("{}_payload_gin", model.path_segment)),
        qualified_table(schema, &model.path_segment),
        PAYLOAD
    )
}

/// Move the identity sequence past explicitly inserted identities.
pub fn sync_sequence(schema: &str, model: &ModelDescriptor) -> Option<String> {
    if !(model.identity_generated && model.identity_type.is_integral()) {
        return None;
    }
    let table = qualified_table(schema, &model.path_segment);
    Some(format!(
        "SELECT setval(pg_get_serial_sequence({}, 'id'), GREATEST((SELECT MAX({}) FROM {}), 1))",
        literal(&table),
        ID,
        table
    ))
}

fn returning() -> String {
    format!("to_jsonb({id}) AS {id}, {p}", id = ID, p = PAYLOAD)
}

fn select_list(alias: &str) -> String {
    format!(
        "to_jsonb({a}.{id}) AS {id}, {a}.{p} AS {p}",
        a = alias,
        id = ID,
        p = PAYLOAD
    )
}

/// SELECT by identity.
pub fn select_by_id(schema: &str, model: &ModelDescriptor, id: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let n = q.push_param(PgBindValue::from_json(id));
    q.sql = format!(
        "SELECT {} FROM {} {} WHERE {}.{} = ${}::{}",
        select_list(ROOT),
        qualified_table(schema, &model.path_segment),
        ROOT,
        ROOT,
        ID,
        n,
        identity_cast(model)
    );
    q
}

fn where_clause(q: &mut QueryBuf, schema: &str, predicate: Option<&Predicate>) -> String {
    match predicate {
        Some(p) => format!(" WHERE {}", predicate_sql(q, schema, ROOT, p)),
        None => String::new(),
    }
}

/// SELECT with optional predicate, sort (identity as tiebreaker) and window.
pub fn select(
    schema: &str,
    model: &ModelDescriptor,
    predicate: Option<&Predicate>,
    sort: Option<&Sort>,
    offset: Option<u64>,
    limit: Option<u64>,
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_clause = where_clause(&mut q, schema, predicate);
    let mut order = Vec::new();
    if let Some(sort) = sort.filter(|s| !s.is_identity) {
        let text = format!("({}.{} ->> {})", ROOT, PAYLOAD, literal(&sort.field));
        let expr = match pg_cast(sort.field_type) {
            Some(cast) => format!("({}::{})", text, cast),
            None => text,
        };
        order.push(format!("{} {}", expr, direction(sort.direction)));
    }
    let id_direction = sort
        .filter(|s| s.is_identity)
        .map_or(SortDirection::Asc, |s| s.direction);
    order.push(format!("{}.{} {}", ROOT, ID, direction(id_direction)));

    let limit_clause = limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_clause = offset
        .filter(|n| *n > 0)
        .map(|n| format!(" OFFSET {}", n))
        .unwrap_or_default();
    q.sql = format!(
        "SELECT {} FROM {} {}{} ORDER BY {}{}{}",
        select_list(ROOT),
        qualified_table(schema, &model.path_segment),
        ROOT,
        where_clause,
        order.join(", "),
        limit_clause,
        offset_clause
    );
    q
}

fn direction(d: SortDirection) -> &'static str {
    match d {
        SortDirection::Asc => "ASC",
        SortDirection::Desc => "DESC",
    }
}

pub fn count(schema: &str, model: &ModelDescriptor, predicate: Option<&Predicate>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_clause = where_clause(&mut q, schema, predicate);
    q.sql = format!(
        "SELECT COUNT(*) FROM {} {}{}",
        qualified_table(schema, &model.path_segment),
        ROOT,
        where_clause
    );
    q
}

/// INSERT one record. `id` is `None` when the database assigns the identity.
pub fn insert(schema: &str, model: &ModelDescriptor, id: Option<&Value>, payload: Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(schema, &model.path_segment);
    q.sql = match id {
        Some(id) => {
            let n = q.push_param(PgBindValue::from_json(id));
            let p = q.push_param(PgBindValue::Json(payload));
            format!(
                "INSERT INTO {} ({}, {}) VALUES (${}::{}, ${}) RETURNING {}",
                table,
                ID,
                PAYLOAD,
                n,
                identity_cast(model),
                p,
                returning()
            )
        }
        None => {
            let p = q.push_param(PgBindValue::Json(payload));
            format!(
                "INSERT INTO {} ({}) VALUES (${}) RETURNING {}",
                table,
                PAYLOAD,
                p,
                returning()
            )
        }
    };
    q
}

/// INSERT or replace the payload by identity.
pub fn upsert(schema: &str, model: &ModelDescriptor, id: &Value, payload: Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let n = q.push_param(PgBindValue::from_json(id));
    let p = q.push_param(PgBindValue::Json(payload));
    q.sql = format!(
        "INSERT INTO {table} ({id}, {pl}) VALUES (${n}::{cast}, ${p}) ON CONFLICT ({id}) DO UPDATE SET {pl} = EXCLUDED.{pl}, \"updated_at\" = NOW() RETURNING {ret}",
        table = qualified_table(schema, &model.path_segment),
        id = ID,
        pl = PAYLOAD,
        n = n,
        cast = identity_cast(model),
        p = p,
        ret = returning()
    );
    q
}

/// DELETE by identity.
pub fn delete(schema: &str, model: &ModelDescriptor, id: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let n = q.push_param(PgBindValue::from_json(id));
    q.sql = format!(
        "DELETE FROM {} WHERE {} = ${}::{}",
        qualified_table(schema, &model.path_segment),
        ID,
        n,
        identity_cast(model)
    );
    q
}

/// Join condition linking `child` (hop target) to `parent`.
fn join_sql(parent: &str, child: &str, hop: &Hop) -> String {
    match &hop.link {
        Link::Owned { many: false } => format!(
            "{}.{} -> {} = to_jsonb({}.{})",
            parent, PAYLOAD, literal(&hop.relation), child, ID
        ),
        Link::Owned { many: true } => format!(
            "{}.{} -> {} @> jsonb_build_array({}.{})",
            parent, PAYLOAD, literal(&hop.relation), child, ID
        ),
        Link::Mapped { mapped_by, many: false } => format!(
            "{}.{} -> {} = to_jsonb({}.{})",
            child, PAYLOAD, literal(mapped_by), parent, ID
        ),
        Link::Mapped { mapped_by, many: true } => format!(
            "{}.{} -> {} @> jsonb_build_array({}.{})",
            child, PAYLOAD, literal(mapped_by), parent, ID
        ),
    }
}

/// Terminal expressions for `path` on `alias`: (text form, typed form).
fn terminal(alias: &str, path: &AccessPath) -> (String, String) {
    if path.is_identity {
        return (format!("{}.{}::text", alias, ID), format!("{}.{}", alias, ID));
    }
    let text = format!("({}.{} ->> {})", alias, PAYLOAD, literal(&path.field));
    let typed = match pg_cast(path.field_type) {
        Some(cast) => format!("({}::{})", text, cast),
        None => text.clone(),
    };
    (text, typed)
}

/// Wrap the terminal condition in one EXISTS per hop; any related record may satisfy it.
fn within(
    q: &mut QueryBuf,
    schema: &str,
    alias: &str,
    path: &AccessPath,
    condition: impl FnOnce(&mut QueryBuf, String, String) -> String,
) -> String {
    let mut prefix = String::new();
    let mut current = alias.to_string();
    for hop in &path.hops {
        let next = q.next_alias();
        prefix.push_str(&format!(
            "EXISTS (SELECT 1 FROM {} {} WHERE {} AND ",
            qualified_table(schema, &hop.target),
            next,
            join_sql(&current, &next, hop)
        ));
        current = next;
    }
    let (text, typed) = terminal(&current, path);
    let cond = condition(q, text, typed);
    format!("{}{}{}", prefix, cond, ")".repeat(path.hops.len()))
}

fn predicate_sql(q: &mut QueryBuf, schema: &str, alias: &str, p: &Predicate) -> String {
    match p {
        Predicate::Compare { path, op, value } => {
            let ty = path.field_type;
            within(q, schema, alias, path, |q, _, typed| {
                if bindable(value, ty) {
                    format!("{} {} {}", typed, op.sql(), q.typed_param(value, ty))
                } else {
                    "FALSE".to_string()
                }
            })
        }
        Predicate::IsNull(path) => within(q, schema, alias, path, |_, text, _| format!("{} IS NULL", text)),
        Predicate::IsNotNull(path) => {
            within(q, schema, alias, path, |_, text, _| format!("{} IS NOT NULL", text))
        }
        Predicate::Like { path, pattern } => within(q, schema, alias, path, |q, text, _| {
            let n = q.push_param(PgBindValue::Text(pattern.clone()));
            format!("{} LIKE ${}", text, n)
        }),
        Predicate::In { path, values } => {
            let ty = path.field_type;
            within(q, schema, alias, path, |q, _, typed| {
                let placeholders: Vec<String> = values
                    .iter()
                    .filter(|v| bindable(v, ty))
                    .map(|v| q.typed_param(v, ty))
                    .collect();
                if placeholders.is_empty() {
                    "FALSE".to_string()
                } else {
                    format!("{} IN ({})", typed, placeholders.join(", "))
                }
            })
        }
        Predicate::Between { path, low, high } => {
            let ty = path.field_type;
            within(q, schema, alias, path, |q, _, typed| {
                if bindable(low, ty) && bindable(high, ty) {
                    let lo = q.typed_param(low, ty);
                    let hi = q.typed_param(high, ty);
                    format!("{} BETWEEN {} AND {}", typed, lo, hi)
                } else {
                    "FALSE".to_string()
                }
            })
        }
        Predicate::And(all) if all.is_empty() => "TRUE".to_string(),
        Predicate::Or(any) if any.is_empty() => "FALSE".to_string(),
        Predicate::And(all) => group(q, schema, alias, all, " AND "),
        Predicate::Or(any) => group(q, schema, alias, any, " OR "),
        Predicate::Never => "FALSE".to_string(),
    }
}

fn group(q: &mut QueryBuf, schema: &str, alias: &str, parts: &[Predicate], sep: &str) -> String {
    let parts: Vec<String> = parts
        .iter()
        .map(|p| predicate_sql(q, schema, alias, p))
        .collect();
    format!("({})", parts.join(sep))
}
