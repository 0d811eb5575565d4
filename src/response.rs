//! Standard response envelope helpers.

use crate::service::{Listing, Page};
use axum::{http::StatusCode, Json};
use serde::Serialize;
use serde_json::Value;

#[derive(Serialize)]
pub struct SuccessOne<T> {
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

#[derive(Serialize)]
pub struct SuccessMany<T> {
    pub data: Vec<T>,
    pub meta: PageMeta,
}

/// `count` is the number of items in `data`; page fields are present only for paged listings.
#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_elements: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u64>,
}

pub fn success_one<T: Serialize>(data: T) -> (StatusCode, Json<SuccessOne<T>>) {
    (StatusCode::CREATED, Json(SuccessOne { data, meta: None }))
}

pub fn success_one_ok<T: Serialize>(data: T) -> (StatusCode, Json<SuccessOne<T>>) {
    (StatusCode::OK, Json(SuccessOne { data, meta: None }))
}

pub fn success_many<T: Serialize>(data: Vec<T>) -> (StatusCode, Json<SuccessMany<T>>) {
    let count = data.len() as u64;
    (
        StatusCode::OK,
        Json(SuccessMany {
            data,
            meta: PageMeta {
                count,
                ..PageMeta::default()
            },
        }),
    )
}

pub fn success_page(page: Page) -> (StatusCode, Json<SuccessMany<Value>>) {
    let meta = PageMeta {
        count: page.content.len() as u64,
        page: Some(page.number),
        size: Some(page.size),
        total_elements: Some(page.total_elements),
        total_pages: Some(page.total_pages),
    };
    (StatusCode::OK, Json(SuccessMany { data: page.content, meta }))
}

pub fn success_listing(listing: Listing) -> (StatusCode, Json<SuccessMany<Value>>) {
    match listing {
        Listing::Page(page) => success_page(page),
        Listing::All(items) => success_many(items),
    }
}

pub fn error_body(code: &str, message: String, details: Option<Value>) -> Value {
    serde_json::json!({
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}
