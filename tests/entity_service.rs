mod common;

use common::{catalog, identity_documents, input, names, service};
use restmodel_sdk::{AppError, FilterSpecification, Listing, PageRequest};
use serde_json::{json, Value};

fn all(listing: Listing) -> Vec<Value> {
    match listing {
        Listing::All(items) => items,
        Listing::Page(p) => panic!("expected a full listing, got page {}", p.number),
    }
}

#[tokio::test]
async fn create_read_update_delete() {
    let svc = service();
    let created = svc
        .create("categorias", input(json!({ "nombre": "Hogar", "descripcion": "Casa" })))
        .await
        .unwrap();
    assert_eq!(created["id"], json!(1));
    assert_eq!(created["productos"], json!([]));

    let read = svc.get_by_id("categorias", &json!("1")).await.unwrap();
    assert_eq!(read["nombre"], json!("Hogar"));

    let updated = svc
        .update("categorias", &json!(1), input(json!({ "descripcion": "Muebles" })))
        .await
        .unwrap();
    assert_eq!(updated["nombre"], json!("Hogar"));
    assert_eq!(updated["descripcion"], json!("Muebles"));

    svc.delete("categorias", &json!(1)).await.unwrap();
    assert!(matches!(
        svc.get_by_id("categorias", &json!(1)).await,
        Err(AppError::EntityNotFound { .. })
    ));
    assert!(matches!(
        svc.delete("categorias", &json!(1)).await,
        Err(AppError::EntityNotFound { .. })
    ));
}

#[tokio::test]
async fn generated_identity_from_client_is_ignored() {
    let svc = service();
    svc.create("categorias", input(json!({ "nombre": "A" }))).await.unwrap();
    let second = svc
        .create("categorias", input(json!({ "id": 1, "nombre": "B" })))
        .await
        .unwrap();
    assert_eq!(second["id"], json!(2));
}

#[tokio::test]
async fn validation_reports_every_field() {
    let svc = service();
    match svc.create("productos", input(json!({ "precio": -5 }))).await {
        Err(AppError::ValidationFailed { model, errors }) => {
            assert_eq!(model, "productos");
            assert!(errors.contains_key("nombre"));
            assert!(errors.contains_key("precio"));
        }
        other => panic!("expected validation failure, got {:?}", other),
    }
    assert!(matches!(
        svc.create("categorias", input(json!({ "nombre": "   " }))).await,
        Err(AppError::ValidationFailed { .. })
    ));
}

#[tokio::test]
async fn scalar_type_errors_are_validation_failures() {
    let svc = service();
    assert!(matches!(
        svc.create("productos", input(json!({ "nombre": "Mesa", "precio": "barato" }))).await,
        Err(AppError::ValidationFailed { .. })
    ));
}

#[tokio::test]
async fn assigned_identity_is_required() {
    let svc = service();
    assert!(matches!(
        svc.create("etiquetas", input(json!({ "nombre": "Oferta" }))).await,
        Err(AppError::ValidationFailed { .. })
    ));
    let created = svc
        .create("etiquetas", input(json!({ "codigo": "oferta", "nombre": "Oferta" })))
        .await
        .unwrap();
    assert_eq!(created["codigo"], json!("oferta"));
    assert!(matches!(
        svc.create("etiquetas", input(json!({ "codigo": "oferta", "nombre": "Otra" }))).await,
        Err(AppError::Storage(_))
    ));
}

#[tokio::test]
async fn pages_over_fifteen_records() {
    let svc = service();
    for i in 1..=15 {
        svc.create("categorias", input(json!({ "nombre": format!("Categoria {:02}", i) })))
            .await
            .unwrap();
    }
    let spec = FilterSpecification::new();

    let Listing::Page(first) = svc.list("categorias", &PageRequest::of(0, 10), &spec).await.unwrap() else {
        panic!("expected a page");
    };
    assert_eq!(first.content.len(), 10);
    assert_eq!(first.total_elements, 15);
    assert_eq!(first.total_pages, 2);
    assert_eq!(first.content[0]["id"], json!(1));

    let Listing::Page(second) = svc.list("categorias", &PageRequest::of(1, 10), &spec).await.unwrap() else {
        panic!("expected a page");
    };
    assert_eq!(second.content.len(), 5);
    assert_eq!(second.number, 1);

    let Listing::Page(past) = svc.list("categorias", &PageRequest::of(5, 10), &spec).await.unwrap() else {
        panic!("expected a page");
    };
    assert!(past.content.is_empty());
    assert_eq!(past.total_elements, 15);

    let everything = all(svc.list("categorias", &PageRequest::unpaged(), &spec).await.unwrap());
    assert_eq!(everything.len(), 15);
}

#[tokio::test]
async fn sorting_by_scalar_and_rejecting_relations() {
    let svc = catalog().await;
    let spec = FilterSpecification::new();
    let sorted = all(
        svc.list(
            "productos",
            &PageRequest::unpaged().sorted("precio", restmodel_sdk::store::SortDirection::Desc),
            &spec,
        )
        .await
        .unwrap(),
    );
    assert_eq!(sorted[0]["nombre"], json!("Laptop"));
    assert_eq!(sorted[6]["nombre"], json!("Cojín"));

    assert!(matches!(
        svc.list("productos", &PageRequest::unpaged().sorted("categoria", Default::default()), &spec)
            .await,
        Err(AppError::BadRequest(_))
    ));
}

#[tokio::test]
async fn reference_by_identity_key_round_trips() {
    let svc = service();
    svc.create("categorias", input(json!({ "nombre": "Hogar" }))).await.unwrap();
    let mesa = svc
        .create("productos", input(json!({ "nombre": "Mesa", "precio": 350, "categoriaId": 1 })))
        .await
        .unwrap();
    assert_eq!(mesa["categoria"]["id"], json!(1));
    assert_eq!(mesa["categoria"]["nombre"], json!("Hogar"));

    let hogar = svc.get_by_id("categorias", &json!(1)).await.unwrap();
    assert_eq!(names(hogar["productos"].as_array().unwrap()), vec!["Mesa"]);
}

#[tokio::test]
async fn unresolvable_reference_is_left_unset() {
    let svc = service();
    let mesa = svc
        .create("productos", input(json!({ "nombre": "Mesa", "categoriaId": 42 })))
        .await
        .unwrap();
    assert_eq!(mesa["categoria"], Value::Null);
}

#[tokio::test]
async fn many_to_many_is_visible_from_both_sides() {
    let svc = service();
    for (codigo, nombre) in [("oferta", "Oferta"), ("nuevo", "Nuevo")] {
        svc.create("etiquetas", input(json!({ "codigo": codigo, "nombre": nombre })))
            .await
            .unwrap();
    }
    let laptop = svc
        .create(
            "productos",
            input(json!({ "nombre": "Laptop", "precio": 1200, "etiquetasIds": ["oferta", "nuevo"] })),
        )
        .await
        .unwrap();
    assert_eq!(laptop["etiquetas"].as_array().unwrap().len(), 2);

    let oferta = svc.get_by_id("etiquetas", &json!("oferta")).await.unwrap();
    assert_eq!(names(oferta["productos"].as_array().unwrap()), vec!["Laptop"]);

    // written from the inverse side: the owning product record is updated
    svc.create("productos", input(json!({ "nombre": "Mesa", "precio": 350 })))
        .await
        .unwrap();
    svc.create(
        "etiquetas",
        input(json!({ "codigo": "hogar", "nombre": "Hogar", "productos": [{ "id": 2 }] })),
    )
    .await
    .unwrap();
    let mesa = svc.get_by_id("productos", &json!(2)).await.unwrap();
    let codigos: Vec<&Value> = mesa["etiquetas"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| &e["codigo"])
        .collect();
    assert_eq!(codigos, vec![&json!("hogar")]);
}

#[tokio::test]
async fn repeated_updates_do_not_duplicate_links() {
    let svc = service();
    svc.create("categorias", input(json!({ "nombre": "Hogar" }))).await.unwrap();
    svc.create("etiquetas", input(json!({ "codigo": "oferta", "nombre": "Oferta" })))
        .await
        .unwrap();
    svc.create("productos", input(json!({ "nombre": "Mesa", "precio": 350 })))
        .await
        .unwrap();
    for _ in 0..3 {
        svc.update(
            "productos",
            &json!(1),
            input(json!({ "categoriaId": 1, "etiquetasIds": ["oferta", "oferta"] })),
        )
        .await
        .unwrap();
    }
    let mesa = svc.get_by_id("productos", &json!(1)).await.unwrap();
    assert_eq!(mesa["etiquetas"].as_array().unwrap().len(), 1);
    let hogar = svc.get_by_id("categorias", &json!(1)).await.unwrap();
    assert_eq!(hogar["productos"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn update_keeps_unnamed_references() {
    let svc = catalog().await;
    let mesa = svc
        .update("productos", &json!(5), input(json!({ "precio": 399.5 })))
        .await
        .unwrap();
    assert_eq!(mesa["precio"], json!(399.5));
    assert_eq!(mesa["categoria"]["nombre"], json!("Hogar"));

    let mesa = svc
        .update("productos", &json!(5), input(json!({ "categoriaId": null })))
        .await
        .unwrap();
    assert_eq!(mesa["categoria"], Value::Null);
}

#[tokio::test]
async fn delete_detaches_references() {
    let svc = catalog().await;
    svc.delete("categorias", &json!(2)).await.unwrap();
    let mesa = svc.get_by_id("productos", &json!(5)).await.unwrap();
    assert_eq!(mesa["categoria"], Value::Null);
    let laptop = svc.get_by_id("productos", &json!(1)).await.unwrap();
    assert_eq!(laptop["categoria"]["id"], json!(1));
}

#[tokio::test]
async fn related_sub_resources() {
    let svc = catalog().await;
    svc.create("etiquetas", input(json!({ "codigo": "oferta", "nombre": "Oferta" })))
        .await
        .unwrap();

    let related = svc.get_related("categorias", &json!(2), "productos").await.unwrap();
    assert_eq!(names(related.as_array().unwrap()), vec!["Cojín", "Mesa", "Silla"]);

    // inverse side: the link lands on the product
    svc.add_related("categorias", &json!(1), "productos", &json!(5)).await.unwrap();
    let mesa = svc.get_by_id("productos", &json!(5)).await.unwrap();
    assert_eq!(mesa["categoria"]["id"], json!(1));

    // owning side, by object
    let laptop = svc
        .add_related("productos", &json!(1), "etiquetas", &json!({ "codigo": "oferta" }))
        .await
        .unwrap();
    assert_eq!(laptop["etiquetas"][0]["codigo"], json!("oferta"));

    svc.remove_related("productos", &json!(1), "etiquetas", &json!("oferta"))
        .await
        .unwrap();
    assert_eq!(
        svc.get_related("productos", &json!(1), "etiquetas").await.unwrap(),
        json!([])
    );
    assert!(matches!(
        svc.remove_related("productos", &json!(1), "etiquetas", &json!("oferta")).await,
        Err(AppError::EntityNotFound { .. })
    ));
    assert!(matches!(
        svc.get_related("productos", &json!(1), "proveedor").await,
        Err(AppError::RelationNotFound { .. })
    ));
}

#[tokio::test]
async fn unknown_model_and_bad_identity() {
    let svc = service();
    assert!(matches!(
        svc.get_by_id("clientes", &json!(1)).await,
        Err(AppError::ModelNotFound(_))
    ));
    assert!(matches!(
        svc.get_by_id("productos", &json!("uno")).await,
        Err(AppError::InvalidIdentity { .. })
    ));
}

struct Stamping;

#[async_trait::async_trait]
impl restmodel_sdk::EntityEvents for Stamping {
    async fn before_create(
        &self,
        _model: &restmodel_sdk::ModelDescriptor,
        mut entity: Value,
    ) -> Result<Value, AppError> {
        entity["descripcion"] = json!("creada");
        Ok(entity)
    }

    async fn after_update(
        &self,
        _model: &restmodel_sdk::ModelDescriptor,
        _id: &Value,
        mut entity: Value,
    ) -> Result<Value, AppError> {
        entity["actualizada"] = json!(true);
        Ok(entity)
    }
}

#[tokio::test]
async fn event_hooks_can_rewrite_entities() {
    let svc = service().with_events(std::sync::Arc::new(Stamping));
    let created = svc.create("categorias", input(json!({ "nombre": "Hogar" }))).await.unwrap();
    assert_eq!(created["descripcion"], json!("creada"));

    let updated = svc
        .update("categorias", &json!(1), input(json!({ "nombre": "Casa" })))
        .await
        .unwrap();
    assert_eq!(updated["actualizada"], json!(true));
    // after_update output is returned, not stored
    let stored = svc.get_by_id("categorias", &json!(1)).await.unwrap();
    assert_eq!(stored["nombre"], json!("Casa"));
    assert!(stored.get("actualizada").is_none());
}

#[tokio::test]
async fn one_to_one_has_a_single_holder() {
    let svc = identity_documents();
    svc.create("pasaportes", input(json!({ "numero": "X1" }))).await.unwrap();
    for nombre in ["A1", "A2"] {
        svc.create("personas", input(json!({ "nombre": nombre, "pasaporteId": 1 })))
            .await
            .unwrap();
    }
    let pasaporte = svc.get_by_id("pasaportes", &json!(1)).await.unwrap();
    assert_eq!(pasaporte["persona"]["nombre"], json!("A2"));
    let a1 = svc.get_by_id("personas", &json!(1)).await.unwrap();
    assert_eq!(a1["pasaporte"], Value::Null);

    // owning side through the sub-resource
    svc.add_related("personas", &json!(1), "pasaporte", &json!(1)).await.unwrap();
    let pasaporte = svc.get_by_id("pasaportes", &json!(1)).await.unwrap();
    assert_eq!(pasaporte["persona"]["nombre"], json!("A1"));
    let a2 = svc.get_by_id("personas", &json!(2)).await.unwrap();
    assert_eq!(a2["pasaporte"], Value::Null);
}

#[tokio::test]
async fn one_to_one_claimed_from_the_inverse_side() {
    let svc = identity_documents();
    for nombre in ["A1", "A2"] {
        svc.create("personas", input(json!({ "nombre": nombre }))).await.unwrap();
    }
    let pasaporte = svc
        .create("pasaportes", input(json!({ "numero": "X1", "personaId": 1 })))
        .await
        .unwrap();
    assert_eq!(pasaporte["persona"]["nombre"], json!("A1"));

    svc.add_related("pasaportes", &json!(1), "persona", &json!(2)).await.unwrap();
    let pasaporte = svc.get_by_id("pasaportes", &json!(1)).await.unwrap();
    assert_eq!(pasaporte["persona"]["nombre"], json!("A2"));
    let a1 = svc.get_by_id("personas", &json!(1)).await.unwrap();
    assert_eq!(a1["pasaporte"], Value::Null);

    // reassigning through an update detaches the current holder as well
    svc.update("personas", &json!(1), input(json!({ "pasaporteId": 1 }))).await.unwrap();
    let a2 = svc.get_by_id("personas", &json!(2)).await.unwrap();
    assert_eq!(a2["pasaporte"], Value::Null);
    let pasaporte = svc.get_by_id("pasaportes", &json!(1)).await.unwrap();
    assert_eq!(pasaporte["persona"]["nombre"], json!("A1"));
}
