use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::application::repos::SaveHook;
use crate::cache::lock::{rw_read, rw_write};
use crate::cache::{InvalidationEvent, SaveKind};
use crate::domain::entities::{CategoryRecord, EntityRef, ProductRecord};
use crate::domain::error::DomainError;

use super::CatalogError;

const SOURCE: &str = "catalog::repository";

/// Attribute recorded on category events when its product membership changes.
pub const CATEGORY_PRODUCTS_ATTRIBUTE: &str = "products";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProductCommand {
    pub name: Option<String>,
    pub url_key: Option<String>,
    pub price: Option<f64>,
    pub category_ids: Option<Vec<u64>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProductCommand {
    pub sku: String,
    pub name: String,
    pub url_key: String,
    pub price: f64,
    #[serde(default)]
    pub category_ids: Vec<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateCategoryCommand {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Default)]
struct CatalogState {
    products: BTreeMap<u64, ProductRecord>,
    categories: BTreeMap<u64, CategoryRecord>,
}

impl CatalogState {
    fn product_by_sku(&self, sku: &str) -> Option<&ProductRecord> {
        self.products.values().find(|product| product.sku == sku)
    }

    fn product_id(&self, sku: &str) -> Result<u64, DomainError> {
        self.product_by_sku(sku)
            .map(|product| product.id)
            .ok_or_else(|| DomainError::not_found("product", sku))
    }

    fn ensure_categories(&self, ids: &[u64]) -> Result<(), DomainError> {
        match ids.iter().find(|id| !self.categories.contains_key(id)) {
            Some(missing) => Err(DomainError::not_found("category", missing)),
            None => Ok(()),
        }
    }
}

/// In-memory products and categories.
///
/// Every committed write notifies the registered [`SaveHook`]s and waits for
/// them before returning, so cached responses never outlive the data they
/// were built from.
pub struct CatalogRepository {
    state: RwLock<CatalogState>,
    hooks: Vec<Arc<dyn SaveHook>>,
}

impl Default for CatalogRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogRepository {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CatalogState::default()),
            hooks: Vec::new(),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn SaveHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Insert records without notifying hooks. Intended for seeding.
    pub fn insert_category(&self, category: CategoryRecord) {
        rw_write(&self.state, SOURCE, "insert_category")
            .categories
            .insert(category.id, category);
    }

    /// Insert records without notifying hooks. Intended for seeding.
    pub fn insert_product(&self, product: ProductRecord) {
        rw_write(&self.state, SOURCE, "insert_product")
            .products
            .insert(product.id, product);
    }

    pub fn product_by_sku(&self, sku: &str) -> Option<ProductRecord> {
        rw_read(&self.state, SOURCE, "product_by_sku")
            .product_by_sku(sku)
            .cloned()
    }

    pub fn product(&self, id: u64) -> Option<ProductRecord> {
        rw_read(&self.state, SOURCE, "product")
            .products
            .get(&id)
            .cloned()
    }

    pub fn category(&self, id: u64) -> Option<CategoryRecord> {
        rw_read(&self.state, SOURCE, "category")
            .categories
            .get(&id)
            .cloned()
    }

    /// Products assigned to `category_id`, ordered by id.
    pub fn products_in_category(&self, category_id: u64) -> Vec<ProductRecord> {
        rw_read(&self.state, SOURCE, "products_in_category")
            .products
            .values()
            .filter(|product| product.category_ids.contains(&category_id))
            .cloned()
            .collect()
    }

    #[instrument(skip(self, command))]
    pub async fn update_product(
        &self,
        sku: &str,
        command: UpdateProductCommand,
    ) -> Result<ProductRecord, CatalogError> {
        validate_product_update(&command)?;

        let (product, changed, membership) = {
            let mut state = rw_write(&self.state, SOURCE, "update_product");
            let id = state.product_id(sku)?;
            if let Some(ids) = &command.category_ids {
                state.ensure_categories(ids)?;
            }

            let Some(product) = state.products.get_mut(&id) else {
                return Err(DomainError::not_found("product", sku).into());
            };
            let before = product.category_ids.clone();
            let changed = apply_product_update(product, command);
            let membership = symmetric_difference(&before, &product.category_ids);
            (product.clone(), changed, membership)
        };

        if changed.is_empty() {
            debug!("Product update changed nothing");
            return Ok(product);
        }

        let mut events = vec![InvalidationEvent::updated(
            EntityRef::product(product.id),
            changed,
        )];
        events.extend(membership_events(membership));
        self.notify(events).await?;
        Ok(product)
    }

    #[instrument(skip(self, command), fields(sku = %command.sku))]
    pub async fn create_product(
        &self,
        command: CreateProductCommand,
    ) -> Result<ProductRecord, CatalogError> {
        ensure_non_empty(&command.sku, "sku")?;
        ensure_non_empty(&command.name, "name")?;
        ensure_price(command.price)?;

        let product = {
            let mut state = rw_write(&self.state, SOURCE, "create_product");
            if state.product_by_sku(&command.sku).is_some() {
                return Err(DomainError::conflict("product", &command.sku).into());
            }
            state.ensure_categories(&command.category_ids)?;

            let id = state.products.keys().next_back().map_or(1, |last| last + 1);
            let product = ProductRecord {
                id,
                sku: command.sku,
                name: command.name,
                url_key: command.url_key,
                price: command.price,
                category_ids: dedup(command.category_ids),
            };
            state.products.insert(id, product.clone());
            product
        };

        let mut events = vec![InvalidationEvent::new(
            EntityRef::product(product.id),
            SaveKind::Created,
        )];
        events.extend(membership_events(product.category_ids.iter().copied().collect()));
        self.notify(events).await?;
        Ok(product)
    }

    #[instrument(skip(self))]
    pub async fn delete_product(&self, sku: &str) -> Result<ProductRecord, CatalogError> {
        let product = {
            let mut state = rw_write(&self.state, SOURCE, "delete_product");
            let id = state.product_id(sku)?;
            state
                .products
                .remove(&id)
                .ok_or_else(|| DomainError::not_found("product", sku))?
        };

        let mut events = vec![InvalidationEvent::new(
            EntityRef::product(product.id),
            SaveKind::Deleted,
        )];
        events.extend(membership_events(product.category_ids.iter().copied().collect()));
        self.notify(events).await?;
        Ok(product)
    }

    #[instrument(skip(self, command))]
    pub async fn update_category(
        &self,
        id: u64,
        command: UpdateCategoryCommand,
    ) -> Result<CategoryRecord, CatalogError> {
        if let Some(name) = &command.name {
            ensure_non_empty(name, "name")?;
        }

        let (category, changed) = {
            let mut state = rw_write(&self.state, SOURCE, "update_category");
            let category = state
                .categories
                .get_mut(&id)
                .ok_or_else(|| DomainError::not_found("category", id))?;

            let mut changed = Vec::new();
            if let Some(name) = command.name
                && name != category.name
            {
                category.name = name;
                changed.push("name");
            }
            if let Some(description) = command.description
                && description != category.description
            {
                category.description = description;
                changed.push("description");
            }
            (category.clone(), changed)
        };

        if changed.is_empty() {
            debug!("Category update changed nothing");
            return Ok(category);
        }

        self.notify(vec![InvalidationEvent::updated(
            EntityRef::category(category.id),
            changed,
        )])
        .await?;
        Ok(category)
    }

    /// Deliver every event to every hook, then report the first failure.
    async fn notify(&self, events: Vec<InvalidationEvent>) -> Result<(), CatalogError> {
        let mut first_error = None;
        for event in &events {
            for hook in &self.hooks {
                if let Err(err) = hook.after_save(event).await {
                    warn!(entity = %event.entity, error = %err, "After-save hook failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}

fn apply_product_update(product: &mut ProductRecord, command: UpdateProductCommand) -> Vec<&'static str> {
    let mut changed = Vec::new();
    if let Some(name) = command.name
        && name != product.name
    {
        product.name = name;
        changed.push("name");
    }
    if let Some(url_key) = command.url_key
        && url_key != product.url_key
    {
        product.url_key = url_key;
        changed.push("url_key");
    }
    if let Some(price) = command.price
        && price != product.price
    {
        product.price = price;
        changed.push("price");
    }
    if let Some(ids) = command.category_ids {
        let ids = dedup(ids);
        if ids != product.category_ids {
            product.category_ids = ids;
            changed.push("category_ids");
        }
    }
    changed
}

fn membership_events(categories: BTreeSet<u64>) -> impl Iterator<Item = InvalidationEvent> {
    categories.into_iter().map(|id| {
        InvalidationEvent::updated(EntityRef::category(id), [CATEGORY_PRODUCTS_ATTRIBUTE])
    })
}

fn symmetric_difference(before: &[u64], after: &[u64]) -> BTreeSet<u64> {
    let before: BTreeSet<u64> = before.iter().copied().collect();
    let after: BTreeSet<u64> = after.iter().copied().collect();
    before.symmetric_difference(&after).copied().collect()
}

fn dedup(ids: Vec<u64>) -> Vec<u64> {
    let mut seen = BTreeSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

fn validate_product_update(command: &UpdateProductCommand) -> Result<(), DomainError> {
    if let Some(name) = &command.name {
        ensure_non_empty(name, "name")?;
    }
    if let Some(price) = command.price {
        ensure_price(price)?;
    }
    Ok(())
}

fn ensure_non_empty(value: &str, field: &'static str) -> Result<(), DomainError> {
    if value.trim().is_empty() {
        return Err(DomainError::validation(format!("`{field}` must not be empty")));
    }
    Ok(())
}

fn ensure_price(price: f64) -> Result<(), DomainError> {
    if !price.is_finite() || price < 0.0 {
        return Err(DomainError::validation(format!(
            "`price` must be a non-negative number, got {price}"
        )));
    }
    Ok(())
}
