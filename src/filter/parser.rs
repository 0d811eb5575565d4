//! Filter parsing from flat query parameters and from JSON documents.

use crate::error::AppError;
use crate::filter::{Filter, FilterLogic, FilterOperation, FilterSpecification};
use serde_json::Value;
use std::collections::HashMap;

/// Query key selecting the combinator.
pub const LOGIC_KEY: &str = "filter_logic";

const PREFIX: &str = "filter_";

/// Group repeated query pairs by key, keeping value order.
pub fn group_params(pairs: Vec<(String, String)>) -> HashMap<String, Vec<String>> {
    let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
    for (k, v) in pairs {
        grouped.entry(k).or_default().push(v);
    }
    grouped
}

/// Best-effort parse of `filter_<field>_<op>` keys. Malformed keys are logged and dropped.
pub fn parse_from_parameters(params: &HashMap<String, Vec<String>>) -> FilterSpecification {
    let logic = params
        .get(LOGIC_KEY)
        .and_then(|v| v.first())
        .map(|s| FilterLogic::parse(s))
        .unwrap_or_default();

    let mut keys: Vec<&String> = params
        .keys()
        .filter(|k| k.starts_with(PREFIX) && k.as_str() != LOGIC_KEY)
        .collect();
    keys.sort();

    let mut filters = Vec::new();
    for key in keys {
        let values = &params[key];
        match parse_entry(key, values) {
            Ok(parsed) => filters.extend(parsed),
            Err(reason) => tracing::warn!("skipping filter parameter {}: {}", key, reason),
        }
    }
    FilterSpecification { filters, logic }
}

/// Repeated values of a scalar operator yield one filter each.
fn parse_entry(key: &str, values: &[String]) -> Result<Vec<Filter>, String> {
    let rest = &key[PREFIX.len()..];
    let (field, code) = rest
        .rsplit_once('_')
        .ok_or_else(|| "expected filter_<field>_<operator>".to_string())?;
    if field.is_empty() {
        return Err("field is empty".into());
    }
    let operator = FilterOperation::from_code(code)
        .ok_or_else(|| format!("unknown operator '{}'", code))?;
    let first = values.first().ok_or_else(|| "no value".to_string())?;

    let filters = match operator {
        FilterOperation::Between => {
            let (low, high) = match values {
                [low, high, ..] => (low.trim(), high.trim()),
                [single] => single
                    .split_once(',')
                    .filter(|(_, high)| !high.contains(','))
                    .map(|(low, high)| (low.trim(), high.trim()))
                    .ok_or_else(|| "between needs two values".to_string())?,
                [] => return Err("no value".into()),
            };
            vec![Filter::between(field, low, high)]
        }
        FilterOperation::In => {
            let items: Vec<Value> = if values.len() > 1 {
                values.iter().map(|v| Value::String(v.trim().to_string())).collect()
            } else {
                first
                    .split(',')
                    .map(|v| Value::String(v.trim().to_string()))
                    .collect()
            };
            vec![Filter::new(field, operator, Value::Array(items))]
        }
        _ => values
            .iter()
            .map(|v| Filter::new(field, operator, v.trim()))
            .collect(),
    };
    Ok(filters)
}

/// Parse a JSON filter document. Blank input is an empty specification.
pub fn parse_from_json(text: &str) -> Result<FilterSpecification, AppError> {
    if text.trim().is_empty() {
        return Ok(FilterSpecification::default());
    }
    let spec: FilterSpecification =
        serde_json::from_str(text).map_err(|e| AppError::InvalidFilterSyntax(e.to_string()))?;
    for f in &spec.filters {
        f.check().map_err(AppError::InvalidFilterSyntax)?;
    }
    Ok(spec)
}
