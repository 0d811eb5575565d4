//! Filter model: one comparison per `Filter`, combined uniformly by a `FilterSpecification`.

pub mod compiler;
pub mod parser;

pub use compiler::{compile, references, resolve_path, AccessPath, Comparison, Hop, Link, Predicate};
pub use parser::{group_params, parse_from_json, parse_from_parameters, LOGIC_KEY};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FilterOperation {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    In,
    Between,
}

impl FilterOperation {
    pub const ALL: [FilterOperation; 9] = [
        FilterOperation::Eq,
        FilterOperation::Neq,
        FilterOperation::Gt,
        FilterOperation::Gte,
        FilterOperation::Lt,
        FilterOperation::Lte,
        FilterOperation::Like,
        FilterOperation::In,
        FilterOperation::Between,
    ];

    /// Short code used in `filter_<field>_<code>` keys.
    pub fn code(self) -> &'static str {
        match self {
            FilterOperation::Eq => "eq",
            FilterOperation::Neq => "neq",
            FilterOperation::Gt => "gt",
            FilterOperation::Gte => "gte",
            FilterOperation::Lt => "lt",
            FilterOperation::Lte => "lte",
            FilterOperation::Like => "like",
            FilterOperation::In => "in",
            FilterOperation::Between => "between",
        }
    }

    fn long_name(self) -> &'static str {
        match self {
            FilterOperation::Eq => "equal",
            FilterOperation::Neq => "not_equal",
            FilterOperation::Gt => "greater_than",
            FilterOperation::Gte => "greater_than_or_equal",
            FilterOperation::Lt => "less_than",
            FilterOperation::Lte => "less_than_or_equal",
            FilterOperation::Like => "like",
            FilterOperation::In => "in",
            FilterOperation::Between => "between",
        }
    }

    /// Case-insensitive lookup by short code or long name (`gt`, `GREATER_THAN`).
    pub fn from_code(code: &str) -> Option<Self> {
        let code = code.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|op| op.code() == code || op.long_name() == code)
    }
}

impl fmt::Display for FilterOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for FilterOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_code(s).ok_or_else(|| format!("unknown filter operator: {}", s))
    }
}

impl Serialize for FilterOperation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for FilterOperation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Combinator applied uniformly across all filters of a specification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FilterLogic {
    #[default]
    And,
    Or,
}

impl FilterLogic {
    /// `"or"` in any case selects OR; anything else is AND.
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("or") {
            FilterLogic::Or
        } else {
            FilterLogic::And
        }
    }
}

impl Serialize for FilterLogic {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(match self {
            FilterLogic::And => "AND",
            FilterLogic::Or => "OR",
        })
    }
}

impl<'de> Deserialize<'de> for FilterLogic {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.trim().to_ascii_lowercase().as_str() {
            "and" => Ok(FilterLogic::And),
            "or" => Ok(FilterLogic::Or),
            other => Err(serde::de::Error::custom(format!("unknown filter logic: {}", other))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Dotted path; each dot crosses one relationship (`categoria.nombre`).
    pub field: String,
    #[serde(alias = "operation")]
    pub operator: FilterOperation,
    #[serde(default)]
    pub value: Value,
    #[serde(
        default,
        rename = "secondValue",
        alias = "second_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub second_value: Option<Value>,
}

impl Filter {
    pub fn new(field: impl Into<String>, operator: FilterOperation, value: impl Into<Value>) -> Self {
        Filter {
            field: field.into(),
            operator,
            value: value.into(),
            second_value: None,
        }
    }

    pub fn between(field: impl Into<String>, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Filter {
            field: field.into(),
            operator: FilterOperation::Between,
            value: low.into(),
            second_value: Some(high.into()),
        }
    }

    /// Shape check: `between` needs both bounds, `in` needs a list.
    pub fn check(&self) -> Result<(), String> {
        if self.field.trim().is_empty() {
            return Err("filter field is empty".into());
        }
        match self.operator {
            FilterOperation::Between
                if self.value.is_null() || self.second_value.as_ref().map_or(true, Value::is_null) =>
            {
                Err(format!("between on {} requires value and secondValue", self.field))
            }
            FilterOperation::In if !self.value.is_array() => {
                Err(format!("in on {} requires a list value", self.field))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSpecification {
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub logic: FilterLogic,
}

impl FilterSpecification {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_logic(mut self, logic: FilterLogic) -> Self {
        self.logic = logic;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}
