mod common;

use common::{catalog, names};
use restmodel_sdk::filter::{group_params, parse_from_json, parse_from_parameters};
use restmodel_sdk::{AppError, DynamicEntityService, Filter, FilterLogic, FilterOperation, FilterSpecification, Listing, PageRequest};
use serde_json::json;

async fn matching(svc: &DynamicEntityService, spec: &FilterSpecification) -> Vec<String> {
    let listing = svc.list("productos", &PageRequest::unpaged(), spec).await.unwrap();
    names(listing.items())
}

fn from_query(pairs: &[(&str, &str)]) -> FilterSpecification {
    parse_from_parameters(&group_params(
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
    ))
}

#[tokio::test]
async fn greater_than() {
    let svc = catalog().await;
    let spec = from_query(&[("filter_precio_gt", "500")]);
    assert_eq!(matching(&svc, &spec).await, vec!["Laptop", "Smartphone", "Tablet"]);
}

#[tokio::test]
async fn less_than_or_equal() {
    let svc = catalog().await;
    let spec = from_query(&[("filter_precio_lte", "100")]);
    assert_eq!(matching(&svc, &spec).await, vec!["Cojín", "Silla"]);
}

#[tokio::test]
async fn like_is_a_substring_match() {
    let svc = catalog().await;
    let spec = from_query(&[("filter_nombre_like", "ar")]);
    assert_eq!(matching(&svc, &spec).await, vec!["Auriculares", "Smartphone"]);
}

#[tokio::test]
async fn nested_identity_path() {
    let svc = catalog().await;
    let spec = from_query(&[("filter_categoria.id_eq", "2")]);
    assert_eq!(matching(&svc, &spec).await, vec!["Cojín", "Mesa", "Silla"]);

    // the bare relationship name means its identity
    let spec = from_query(&[("filter_categoria_eq", "2")]);
    assert_eq!(matching(&svc, &spec).await.len(), 3);
}

#[tokio::test]
async fn or_is_a_union() {
    let svc = catalog().await;
    let spec = from_query(&[
        ("filter_precio_gt", "1000"),
        ("filter_precio_lt", "50"),
        ("filter_logic", "or"),
    ]);
    assert_eq!(matching(&svc, &spec).await, vec!["Cojín", "Laptop"]);

    let spec = from_query(&[("filter_precio_gt", "1000"), ("filter_precio_lt", "50")]);
    assert!(matching(&svc, &spec).await.is_empty());
}

#[tokio::test]
async fn repeated_equality_key_with_or() {
    let svc = catalog().await;
    let spec = from_query(&[
        ("filter_logic", "or"),
        ("filter_nombre_eq", "Laptop"),
        ("filter_nombre_eq", "Silla"),
    ]);
    assert_eq!(spec.filters.len(), 2);
    assert_eq!(matching(&svc, &spec).await, vec!["Laptop", "Silla"]);

    // under AND the same key cannot match two names at once
    let spec = from_query(&[("filter_nombre_eq", "Laptop"), ("filter_nombre_eq", "Silla")]);
    assert!(matching(&svc, &spec).await.is_empty());
}

#[tokio::test]
async fn between_and_in() {
    let svc = catalog().await;
    let spec = from_query(&[("filter_precio_between", "100,400")]);
    assert_eq!(matching(&svc, &spec).await, vec!["Auriculares", "Mesa"]);

    let spec = from_query(&[("filter_nombre_in", "Mesa"), ("filter_nombre_in", "Silla")]);
    assert_eq!(matching(&svc, &spec).await, vec!["Mesa", "Silla"]);

    let spec = FilterSpecification::new().with_filter(Filter::new("id", FilterOperation::In, json!([])));
    assert!(matching(&svc, &spec).await.is_empty());
}

#[tokio::test]
async fn filtered_pages_count_only_matches() {
    let svc = catalog().await;
    let spec = from_query(&[("filter_categoria.id_eq", "1")]);
    let Listing::Page(page) = svc.list("productos", &PageRequest::of(1, 3), &spec).await.unwrap() else {
        panic!("expected a page");
    };
    assert_eq!(page.total_elements, 4);
    assert_eq!(page.total_pages, 2);
    assert_eq!(names(&page.content), vec!["Tablet"]);
}

#[tokio::test]
async fn json_document_over_nested_name() {
    let svc = catalog().await;
    let spec = parse_from_json(
        r#"{
            "filters": [
                { "field": "categoria.nombre", "operator": "EQUAL", "value": "Hogar" },
                { "field": "precio", "operator": "GREATER_THAN", "value": 200 }
            ],
            "logic": "AND"
        }"#,
    )
    .unwrap();
    assert_eq!(spec.logic, FilterLogic::And);
    assert_eq!(matching(&svc, &spec).await, vec!["Mesa"]);
}

#[tokio::test]
async fn inverse_collection_path() {
    let svc = catalog().await;
    let spec = FilterSpecification::new()
        .with_filter(Filter::new("productos.nombre", FilterOperation::Eq, "Silla"));
    let listing = svc.list("categorias", &PageRequest::unpaged(), &spec).await.unwrap();
    assert_eq!(names(listing.items()), vec!["Hogar"]);
}

#[tokio::test]
async fn mismatched_values_match_nothing() {
    let svc = catalog().await;
    let spec = from_query(&[("filter_precio_gt", "caro")]);
    assert!(matching(&svc, &spec).await.is_empty());
}

#[tokio::test]
async fn unknown_fields_are_rejected() {
    let svc = catalog().await;
    let spec = from_query(&[("filter_color_eq", "rojo")]);
    assert!(matches!(
        svc.list("productos", &PageRequest::unpaged(), &spec).await,
        Err(AppError::InvalidFilterSyntax(_))
    ));
    assert!(matches!(
        parse_from_json(r#"{"filters":[{"field":"precio","operator":"between","value":1}]}"#),
        Err(AppError::InvalidFilterSyntax(_))
    ));
}
