//! Raw model definition types matching the JSON model files.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Declared type of a scalar or identity field. Drives coercion and SQL casts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Boolean,
    Integer,
    Long,
    Float,
    Double,
    String,
    Date,
    #[serde(alias = "timestamp", alias = "date_time")]
    Datetime,
    Uuid,
    Json,
}

impl FieldType {
    pub fn is_integral(self) -> bool {
        matches!(self, FieldType::Integer | FieldType::Long)
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            FieldType::Integer | FieldType::Long | FieldType::Float | FieldType::Double
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    ManyToOne,
    OneToMany,
    ManyToMany,
    OneToOne,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_identity_name")]
    pub name: String,
    #[serde(rename = "type", default = "default_identity_type")]
    pub type_: FieldType,
    /// When true the store assigns the identity on persist.
    #[serde(default = "default_true")]
    pub generated: bool,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        IdentityConfig {
            name: default_identity_name(),
            type_: default_identity_type(),
            generated: true,
        }
    }
}

fn default_identity_name() -> String {
    "id".into()
}

fn default_identity_type() -> FieldType {
    FieldType::Long
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: FieldType,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelationshipConfig {
    pub name: String,
    pub kind: RelationKind,
    /// Type name of the related model.
    pub target: String,
    /// Set on the inverse side: name of the owning field on the target.
    #[serde(default)]
    pub mapped_by: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub not_blank: Option<bool>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub allowed: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
    /// Overrides the generated message for any violation of this rule.
    #[serde(default)]
    pub message: Option<String>,
}

/// One model definition: a type name exposed under a path segment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub path_segment: String,
    #[serde(default = "default_true")]
    pub validation_enabled: bool,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub fields: Vec<FieldConfig>,
    #[serde(default)]
    pub relationships: Vec<RelationshipConfig>,
    #[serde(default)]
    pub validation: HashMap<String, ValidationRule>,
}
