//! Entity validation from model rules.

use crate::config::ValidationRule;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

pub struct RequestValidator;

impl RequestValidator {
    /// Check `entity` against per-field rules. Returns the first violation of each field; empty means valid.
    pub fn validate(
        entity: &Value,
        rules: &HashMap<String, ValidationRule>,
    ) -> BTreeMap<String, String> {
        let mut errors = BTreeMap::new();
        for (field, rule) in rules {
            let val = entity.get(field).unwrap_or(&Value::Null);
            if let Err(message) = validate_field(field, val, rule) {
                errors.insert(field.clone(), rule.message.clone().unwrap_or(message));
            }
        }
        errors
    }
}

fn validate_field(field: &str, v: &Value, rule: &ValidationRule) -> Result<(), String> {
    if v.is_null() {
        if rule.required == Some(true) || rule.not_blank == Some(true) {
            return Err(format!("{} is required", field));
        }
        return Ok(());
    }
    if rule.not_blank == Some(true) && v.as_str().map_or(false, |s| s.trim().is_empty()) {
        return Err(format!("{} must not be blank", field));
    }
    if let Some(format) = &rule.format {
        validate_format(field, v, format)?;
    }
    if let Some(max) = rule.max_length {
        if let Some(s) = v.as_str() {
            if s.chars().count() > max as usize {
                return Err(format!("{} must be at most {} characters", field, max));
            }
        }
    }
    if let Some(min) = rule.min_length {
        if let Some(s) = v.as_str() {
            if s.chars().count() < min as usize {
                return Err(format!("{} must be at least {} characters", field, min));
            }
        }
    }
    if let Some(ref pattern) = rule.pattern {
        let re = Regex::new(pattern).map_err(|_| format!("invalid pattern for {}", field))?;
        if let Some(s) = v.as_str() {
            if !re.is_match(s) {
                return Err(format!("{} does not match required pattern", field));
            }
        }
    }
    if let Some(ref allowed) = rule.allowed {
        if !allowed.iter().any(|a| value_eq(v, a)) {
            return Err(format!(
                "{} must be one of: {:?}",
                field,
                allowed.iter().take(5).collect::<Vec<_>>()
            ));
        }
    }
    if let Some(min) = rule.minimum {
        if let Some(n) = v.as_f64() {
            if n < min {
                return Err(format!("{} must be at least {}", field, min));
            }
        }
    }
    if let Some(max) = rule.maximum {
        if let Some(n) = v.as_f64() {
            if n > max {
                return Err(format!("{} must be at most {}", field, max));
            }
        }
    }
    Ok(())
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}

fn validate_format(field: &str, v: &Value, format: &str) -> Result<(), String> {
    let Some(s) = v.as_str() else {
        return Ok(());
    };
    match format.to_lowercase().as_str() {
        "email" if !s.contains('@') || s.len() < 3 => Err(format!("{} must be a valid email", field)),
        "uuid" if uuid::Uuid::parse_str(s).is_err() => Err(format!("{} must be a valid UUID", field)),
        _ => Ok(()),
    }
}
