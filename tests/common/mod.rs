#![allow(dead_code)]

use restmodel_sdk::{
    parse_models, resolve, DynamicEntityService, EntityInput, MemoryStore, ModelRegistry, Settings,
};
use serde_json::{json, Value};
use std::sync::Arc;

pub fn registry() -> ModelRegistry {
    let mut models = Vec::new();
    for text in [
        include_str!("../../demos/models/categoria.json"),
        include_str!("../../demos/models/producto.json"),
        include_str!("../../demos/models/etiqueta.json"),
    ] {
        models.extend(parse_models(text).unwrap());
    }
    resolve(&models).unwrap()
}

pub fn service() -> DynamicEntityService {
    DynamicEntityService::new(Arc::new(MemoryStore::new()), Arc::new(registry()), Settings::default())
}

pub fn input(v: Value) -> EntityInput {
    EntityInput::from_json(v).unwrap()
}

/// Electrónica (1) and Hogar (2), with seven products:
///
/// | id | nombre      | precio | categoria |
/// |----|-------------|--------|-----------|
/// | 1  | Laptop      | 1200   | 1         |
/// | 2  | Smartphone  | 800    | 1         |
/// | 3  | Auriculares | 150    | 1         |
/// | 4  | Tablet      | 600    | 1         |
/// | 5  | Mesa        | 350    | 2         |
/// | 6  | Silla       | 90     | 2         |
/// | 7  | Cojín       | 45     | 2         |
pub async fn catalog() -> DynamicEntityService {
    let svc = service();
    for nombre in ["Electrónica", "Hogar"] {
        svc.create("categorias", input(json!({ "nombre": nombre }))).await.unwrap();
    }
    for (nombre, precio, categoria) in [
        ("Laptop", 1200, 1),
        ("Smartphone", 800, 1),
        ("Auriculares", 150, 1),
        ("Tablet", 600, 1),
        ("Mesa", 350, 2),
        ("Silla", 90, 2),
        ("Cojín", 45, 2),
    ] {
        svc.create(
            "productos",
            input(json!({ "nombre": nombre, "precio": precio, "stock": 10, "categoriaId": categoria })),
        )
        .await
        .unwrap();
    }
    svc
}

pub fn names(items: &[Value]) -> Vec<String> {
    let mut out: Vec<String> = items
        .iter()
        .filter_map(|v| v["nombre"].as_str().map(str::to_string))
        .collect();
    out.sort();
    out
}

/// Personas own a one-to-one reference to their pasaporte.
pub fn identity_documents() -> DynamicEntityService {
    let models = parse_models(
        r#"[
        { "name": "Persona", "path_segment": "personas",
          "fields": [{ "name": "nombre", "type": "string" }],
          "relationships": [{ "name": "pasaporte", "kind": "one_to_one", "target": "Pasaporte" }] },
        { "name": "Pasaporte", "path_segment": "pasaportes",
          "fields": [{ "name": "numero", "type": "string" }],
          "relationships": [{ "name": "persona", "kind": "one_to_one", "target": "Persona", "mapped_by": "pasaporte" }] }
    ]"#,
    )
    .unwrap();
    DynamicEntityService::new(
        Arc::new(MemoryStore::new()),
        Arc::new(resolve(&models).unwrap()),
        Settings::default(),
    )
}
