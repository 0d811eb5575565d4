//! Load model definitions from JSON files and resolve them into a registry.

use crate::config::resolved::{FieldDescriptor, ModelDescriptor, ModelRegistry, RelationDescriptor};
use crate::config::types::ModelConfig;
use crate::config::validate;
use crate::error::ConfigError;
use std::collections::HashMap;
use std::path::Path;

/// Build the registry from model definitions (validates first).
pub fn resolve(models: &[ModelConfig]) -> Result<ModelRegistry, ConfigError> {
    validate(models)?;
    let path_by_name: HashMap<&str, String> = models
        .iter()
        .map(|m| (m.name.as_str(), m.path_segment.trim_matches('/').to_string()))
        .collect();

    // owning (model, field) -> inverse field name on the target
    let mut inverse_of: HashMap<(&str, &str), &str> = HashMap::new();
    for m in models {
        for r in &m.relationships {
            if let Some(mapped_by) = r.mapped_by.as_deref() {
                inverse_of.insert((r.target.as_str(), mapped_by), r.name.as_str());
            }
        }
    }

    let mut registry = ModelRegistry::new();
    for m in models {
        let relations = m
            .relationships
            .iter()
            .map(|r| {
                let target = path_by_name
                    .get(r.target.as_str())
                    .cloned()
                    .ok_or_else(|| ConfigError::MissingReference {
                        kind: "model",
                        id: r.target.clone(),
                    })?;
                Ok(RelationDescriptor {
                    name: r.name.clone(),
                    kind: r.kind,
                    target,
                    mapped_by: r.mapped_by.clone(),
                    inverse: inverse_of
                        .get(&(m.name.as_str(), r.name.as_str()))
                        .map(|s| s.to_string()),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        let fields = m
            .fields
            .iter()
            .map(|f| FieldDescriptor {
                name: f.name.clone(),
                field_type: f.type_,
            })
            .collect();
        registry.register(ModelDescriptor {
            type_name: m.name.clone(),
            path_segment: m.path_segment.trim_matches('/').to_string(),
            validation_enabled: m.validation_enabled,
            identity: m.identity.name.clone(),
            identity_type: m.identity.type_,
            identity_generated: m.identity.generated,
            fields,
            relations,
            validation: m.validation.clone(),
        })?;
    }
    Ok(registry)
}

/// Parse one file's content: a single model definition or an array of them.
pub fn parse_models(text: &str) -> Result<Vec<ModelConfig>, ConfigError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| ConfigError::Load(e.to_string()))?;
    let models = if value.is_array() {
        serde_json::from_value(value)
    } else {
        serde_json::from_value(value).map(|m| vec![m])
    };
    models.map_err(|e| ConfigError::Load(e.to_string()))
}

/// Read every `*.json` file in `dir` (sorted by name) as model definitions.
pub async fn load_from_dir(dir: impl AsRef<Path>) -> Result<Vec<ModelConfig>, ConfigError> {
    let dir = dir.as_ref();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", dir.display(), e)))?;
    let mut paths = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| ConfigError::Load(e.to_string()))?
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut models = Vec::new();
    for path in paths {
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
        let parsed = parse_models(&text)
            .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
        tracing::debug!(file = %path.display(), count = parsed.len(), "loaded model definitions");
        models.extend(parsed);
    }
    Ok(models)
}
