//! In-memory catalog that the cache sits in front of.
//!
//! The repository is the write path (its saves drive invalidation through
//! [`SaveHook`](crate::application::repos::SaveHook)s) and [`CatalogEngine`]
//! answers the product and category queries the storefront issues.

mod engine;
mod query;
mod repository;
mod seed;

use thiserror::Error;

use crate::application::repos::HookError;
use crate::domain::error::DomainError;

pub use engine::CatalogEngine;
pub use repository::{
    CATEGORY_PRODUCTS_ATTRIBUTE, CatalogRepository, CreateProductCommand, UpdateCategoryCommand,
    UpdateProductCommand,
};
pub use seed::demo_catalog;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    /// The write was committed but dependent caches could not be invalidated.
    #[error("write committed but invalidation failed: {0}")]
    Invalidation(#[from] HookError),
}
