use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};

use crate::application::error::HttpError;
use crate::cache::{CacheStats, Tag};
use crate::catalog::{CreateProductCommand, UpdateCategoryCommand, UpdateProductCommand};
use crate::domain::entities::{CategoryRecord, ProductRecord};

use super::HttpState;

#[derive(Debug, Deserialize)]
pub(super) struct InvalidateTagsRequest {
    tags: Vec<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct InvalidationSummary {
    evicted: usize,
}

pub(super) async fn create_product(
    State(state): State<HttpState>,
    Json(command): Json<CreateProductCommand>,
) -> Result<(StatusCode, Json<ProductRecord>), HttpError> {
    let product = state.catalog.create_product(command).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

pub(super) async fn update_product(
    State(state): State<HttpState>,
    Path(sku): Path<String>,
    Json(command): Json<UpdateProductCommand>,
) -> Result<Json<ProductRecord>, HttpError> {
    Ok(Json(state.catalog.update_product(&sku, command).await?))
}

pub(super) async fn delete_product(
    State(state): State<HttpState>,
    Path(sku): Path<String>,
) -> Result<Json<ProductRecord>, HttpError> {
    Ok(Json(state.catalog.delete_product(&sku).await?))
}

pub(super) async fn update_category(
    State(state): State<HttpState>,
    Path(id): Path<u64>,
    Json(command): Json<UpdateCategoryCommand>,
) -> Result<Json<CategoryRecord>, HttpError> {
    Ok(Json(state.catalog.update_category(id, command).await?))
}

pub(super) async fn invalidate_tags(
    State(state): State<HttpState>,
    Json(request): Json<InvalidateTagsRequest>,
) -> Result<Json<InvalidationSummary>, HttpError> {
    let tags: Vec<Tag> = request
        .tags
        .iter()
        .map(|tag| tag.trim())
        .filter(|tag| !tag.is_empty())
        .map(Tag::from)
        .collect();
    if tags.is_empty() {
        return Err(HttpError::new(
            "infra::http::admin::invalidate_tags",
            StatusCode::BAD_REQUEST,
            "No tags supplied",
            "request body listed no non-empty tags",
        ));
    }

    let evicted = state.listener.invalidate_tags(&tags).await?;
    Ok(Json(InvalidationSummary { evicted }))
}

pub(super) async fn flush_cache(
    State(state): State<HttpState>,
) -> Result<Json<InvalidationSummary>, HttpError> {
    let evicted = state.listener.flush().await?;
    Ok(Json(InvalidationSummary { evicted }))
}

pub(super) async fn cache_stats(
    State(state): State<HttpState>,
) -> Result<Json<CacheStats>, HttpError> {
    Ok(Json(state.backend.stats().await?))
}
