//! Entity handlers: list, create, read, update, delete and relationship sub-resources.

use crate::error::AppError;
use crate::filter::{group_params, parse_from_json, parse_from_parameters, FilterSpecification};
use crate::relations::EntityInput;
use crate::response::{success_listing, success_one, success_one_ok};
use crate::service::PageRequest;
use crate::state::AppState;
use crate::store::SortDirection;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::Value;
use std::collections::HashMap;

type Params = HashMap<String, Vec<String>>;

fn first<'a>(params: &'a Params, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(|v| v.first())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}

/// `page`/`size`/`sort`/`direction`. No `page` and no `size`, or a negative `page`, lists everything.
pub fn page_request(params: &Params, default_size: u32) -> Result<PageRequest, AppError> {
    let page = first(params, "page")
        .map(|s| {
            s.parse::<i64>()
                .map_err(|_| AppError::BadRequest(format!("page must be an integer, got '{}'", s)))
        })
        .transpose()?;
    let size = first(params, "size")
        .map(|s| {
            s.parse::<u32>()
                .map_err(|_| AppError::BadRequest(format!("size must be a positive integer, got '{}'", s)))
        })
        .transpose()?;

    let mut request = match (page, size) {
        (Some(n), _) if n < 0 => PageRequest::unpaged(),
        (None, None) => PageRequest::unpaged(),
        (page, size) => PageRequest::of(
            page.map_or(0, |n| u32::try_from(n).unwrap_or(u32::MAX)),
            size.unwrap_or(default_size),
        ),
    };

    if let Some(sort) = first(params, "sort") {
        let (field, dir) = match sort.split_once(',') {
            Some((field, dir)) => (field.trim(), Some(dir)),
            None => (sort, None),
        };
        let direction = dir
            .or_else(|| first(params, "direction"))
            .map(SortDirection::parse)
            .unwrap_or(SortDirection::Asc);
        request = request.sorted(field, direction);
    }
    Ok(request)
}

/// A `filter` JSON document wins over `filter_*` parameters.
pub fn filter_spec(params: &Params) -> Result<FilterSpecification, AppError> {
    match params.get("filter").and_then(|v| v.first()) {
        Some(doc) => parse_from_json(doc),
        None => Ok(parse_from_parameters(params)),
    }
}

pub async fn list(
    State(state): State<AppState>,
    Path(model): Path<String>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<impl IntoResponse, AppError> {
    let params = group_params(pairs);
    let page = page_request(&params, state.service.settings().default_page_size)?;
    let spec = filter_spec(&params)?;
    let listing = state.service.list(&model, &page, &spec).await?;
    Ok(success_listing(listing))
}

pub async fn create(
    State(state): State<AppState>,
    Path(model): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let input = EntityInput::from_json(body)?;
    let created = state.service.create(&model, input).await?;
    Ok(success_one(created))
}

pub async fn read(
    State(state): State<AppState>,
    Path((model, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let entity = state.service.get_by_id(&model, &Value::String(id)).await?;
    Ok(success_one_ok(entity))
}

pub async fn update(
    State(state): State<AppState>,
    Path((model, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let input = EntityInput::from_json(body)?;
    let updated = state.service.update(&model, &Value::String(id), input).await?;
    Ok(success_one_ok(updated))
}

pub async fn delete(
    State(state): State<AppState>,
    Path((model, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    state.service.delete(&model, &Value::String(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn read_related(
    State(state): State<AppState>,
    Path((model, id, relation)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let related = state
        .service
        .get_related(&model, &Value::String(id), &relation)
        .await?;
    Ok(success_one_ok(related))
}

pub async fn add_related(
    State(state): State<AppState>,
    Path((model, id, relation)): Path<(String, String, String)>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let entity = state
        .service
        .add_related(&model, &Value::String(id), &relation, &body)
        .await?;
    Ok(success_one_ok(entity))
}

pub async fn remove_related(
    State(state): State<AppState>,
    Path((model, id, relation, related_id)): Path<(String, String, String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let entity = state
        .service
        .remove_related(&model, &Value::String(id), &relation, &Value::String(related_id))
        .await?;
    Ok(success_one_ok(entity))
}
