//! Shared type coercion for filter values, identities and payload scalars.

use crate::config::FieldType;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike};
use serde_json::{Number, Value};
use std::cmp::Ordering;
use thiserror::Error;

/// Accepted date inputs, first match wins.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y", "%d/%m/%Y"];

/// Accepted date-time inputs without offset, first match wins.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
];

const TRUTHY: &[&str] = &["true", "yes", "1", "on"];

#[derive(Debug, Error)]
#[error("cannot convert {value} to {target:?}")]
pub struct CoerceError {
    pub value: String,
    pub target: FieldType,
}

fn fail(value: &Value, target: FieldType) -> CoerceError {
    CoerceError {
        value: value.to_string(),
        target,
    }
}

/// Convert `value` to the representation of `target`. Null stays null; blank strings become null for non-string targets.
pub fn coerce(value: &Value, target: FieldType) -> Result<Value, CoerceError> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    match target {
        FieldType::Json => return Ok(value.clone()),
        FieldType::String => return Ok(to_string_value(value)),
        _ => {}
    }
    if let Value::String(s) = value {
        let t = s.trim();
        if t.is_empty() {
            return Ok(Value::Null);
        }
        return from_text(t, value, target);
    }
    match (value, target) {
        (Value::Number(n), FieldType::Integer | FieldType::Long) => {
            let i = match n.as_i64() {
                Some(i) => i,
                None => match n.as_f64() {
                    Some(f) if f.is_finite() && f.abs() < i64::MAX as f64 => f.trunc() as i64,
                    _ => return Err(fail(value, target)),
                },
            };
            integral(i, value, target)
        }
        (Value::Number(n), FieldType::Float | FieldType::Double) => n
            .as_f64()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| fail(value, target)),
        (Value::Number(n), FieldType::Boolean) => {
            Ok(Value::Bool(n.as_f64().map(|f| f != 0.0).unwrap_or(false)))
        }
        (Value::Bool(b), FieldType::Boolean) => Ok(Value::Bool(*b)),
        _ => Err(fail(value, target)),
    }
}

fn integral(i: i64, value: &Value, target: FieldType) -> Result<Value, CoerceError> {
    if target == FieldType::Integer && i32::try_from(i).is_err() {
        return Err(fail(value, target));
    }
    Ok(Value::Number(i.into()))
}

fn from_text(t: &str, value: &Value, target: FieldType) -> Result<Value, CoerceError> {
    match target {
        FieldType::Integer | FieldType::Long => {
            if let Ok(i) = t.parse::<i64>() {
                return integral(i, value, target);
            }
            match t.parse::<f64>() {
                Ok(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                    integral(f as i64, value, target)
                }
                _ => Err(fail(value, target)),
            }
        }
        FieldType::Float | FieldType::Double => t
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| fail(value, target)),
        FieldType::Boolean => Ok(Value::Bool(
            TRUTHY.contains(&t.to_ascii_lowercase().as_str()),
        )),
        FieldType::Date => parse_date(t)
            .or_else(|| parse_datetime(t).map(|dt| dt.date()))
            .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
            .ok_or_else(|| fail(value, target)),
        FieldType::Datetime => parse_datetime(t)
            .or_else(|| parse_date(t).and_then(|d| d.and_hms_opt(0, 0, 0)))
            .map(|dt| Value::String(format_datetime(&dt)))
            .ok_or_else(|| fail(value, target)),
        FieldType::Uuid => uuid::Uuid::parse_str(t)
            .map(|u| Value::String(u.hyphenated().to_string()))
            .map_err(|_| fail(value, target)),
        FieldType::String | FieldType::Json => Ok(value.clone()),
    }
}

fn to_string_value(value: &Value) -> Value {
    match value {
        Value::String(_) => value.clone(),
        Value::Number(n) => Value::String(n.to_string()),
        Value::Bool(b) => Value::String(b.to_string()),
        other => Value::String(other.to_string()),
    }
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
}

pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .or_else(|| {
            DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z")
                .or_else(|_| DateTime::parse_from_rfc3339(s))
                .ok()
                .map(|dt| dt.naive_utc())
        })
}

fn format_datetime(dt: &NaiveDateTime) -> String {
    if dt.nanosecond() == 0 {
        dt.format("%Y-%m-%dT%H:%M:%S").to_string()
    } else {
        dt.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()
    }
}

/// Order two values as `ty`; values that do not coerce are compared as given. `None` when incomparable.
pub fn compare(a: &Value, b: &Value, ty: FieldType) -> Option<Ordering> {
    let a = coerce(a, ty).unwrap_or_else(|_| a.clone());
    let b = coerce(b, ty).unwrap_or_else(|_| b.clone());
    compare_values(&a, &b)
}

pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => Some(i.cmp(&j)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, _) | (_, Value::Null) => None,
        _ if a == b => Some(Ordering::Equal),
        _ => None,
    }
}
