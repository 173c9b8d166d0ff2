use std::sync::Arc;

use async_graphql_parser::types::{Field, OperationType};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::{debug, instrument};

use crate::application::engine::{
    ContentEngine, EngineError, GraphQlRequest, Resolution, select_operation,
};
use crate::domain::entities::{CategoryRecord, EntityFamily, EntityRef, ProductRecord};

use super::CatalogRepository;
use super::query::{QueryScope, response_key};

const DEFAULT_PAGE_SIZE: u64 = 20;

/// Answers `products(filter: {sku: {eq: ...}})` and `category(id: ...)`
/// queries from the in-memory catalog, recording every entity it reads.
pub struct CatalogEngine {
    repository: Arc<CatalogRepository>,
}

impl CatalogEngine {
    pub fn new(repository: Arc<CatalogRepository>) -> Self {
        Self { repository }
    }

    fn products<'a>(
        &self,
        scope: &QueryScope<'a>,
        field: &'a Field,
        resolution: &mut Resolution,
    ) -> Result<Value, EngineError> {
        let filter = scope.argument(field, "filter")?;
        let sku = filter
            .as_ref()
            .and_then(|filter| filter.get("sku"))
            .and_then(|sku| sku.get("eq"))
            .ok_or_else(|| {
                EngineError::UnsupportedQuery("products requires filter.sku.eq".to_string())
            })?;
        let sku = string_value(sku, "filter.sku.eq")?;

        let items: Vec<ProductRecord> = self.repository.product_by_sku(&sku).into_iter().collect();
        if items.is_empty() {
            resolution.touch_family(EntityFamily::Product);
        }
        for product in &items {
            resolution.touch(EntityRef::product(product.id));
        }

        product_page(scope, field, &items, items.len())
    }

    fn category<'a>(
        &self,
        scope: &QueryScope<'a>,
        field: &'a Field,
        resolution: &mut Resolution,
    ) -> Result<Value, EngineError> {
        let id = scope
            .argument(field, "id")?
            .ok_or_else(|| EngineError::UnsupportedQuery("category requires id".to_string()))?;
        let id = u64_value(&id, "id")?;

        let Some(category) = self.repository.category(id) else {
            resolution.touch_family(EntityFamily::Category);
            return Ok(Value::Null);
        };
        resolution.touch(EntityRef::category(category.id));

        let members = self.repository.products_in_category(category.id);
        let mut object = Map::new();
        for child in scope.fields(&field.selection_set.node)? {
            let value = match child.name.node.as_str() {
                "products" => self.category_products(scope, child, &members, resolution)?,
                "product_count" => json!(members.len()),
                other => category_field(&category, other),
            };
            object.insert(response_key(child).to_string(), value);
        }
        Ok(Value::Object(object))
    }

    fn category_products<'a>(
        &self,
        scope: &QueryScope<'a>,
        field: &'a Field,
        members: &[ProductRecord],
        resolution: &mut Resolution,
    ) -> Result<Value, EngineError> {
        let page_size = optional_u64(scope, field, "pageSize")?.unwrap_or(DEFAULT_PAGE_SIZE);
        let current_page = optional_u64(scope, field, "currentPage")?.unwrap_or(1);
        if page_size == 0 || current_page == 0 {
            return Err(EngineError::InvalidVariables(
                "pageSize and currentPage must be positive".to_string(),
            ));
        }

        let page: Vec<ProductRecord> = members
            .iter()
            .skip((current_page - 1).saturating_mul(page_size) as usize)
            .take(page_size as usize)
            .cloned()
            .collect();

        if page.is_empty() {
            resolution.touch_family(EntityFamily::Product);
        }
        for product in &page {
            resolution.touch(EntityRef::product(product.id));
        }

        product_page(scope, field, &page, members.len())
    }
}

#[async_trait]
impl ContentEngine for CatalogEngine {
    #[instrument(skip_all, fields(operation = request.operation_name.as_deref().unwrap_or("")))]
    async fn resolve(&self, request: &GraphQlRequest) -> Result<Resolution, EngineError> {
        let document = request
            .parse()
            .map_err(|err| EngineError::UnsupportedQuery(err.to_string()))?;
        let operation = select_operation(&document, request.operation_name.as_deref())
            .ok_or_else(|| {
                EngineError::UnsupportedQuery(
                    "operationName does not select an operation".to_string(),
                )
            })?;
        if operation.ty != OperationType::Query {
            return Err(EngineError::UnsupportedQuery(format!(
                "{} operations are not supported",
                operation.ty
            )));
        }
        let scope = QueryScope::new(&document, operation, &request.variables)?;

        let mut resolution = Resolution::default();
        let mut data = Map::new();
        for field in scope.fields(&operation.selection_set.node)? {
            let value = match field.name.node.as_str() {
                "products" => self.products(&scope, field, &mut resolution)?,
                "category" => self.category(&scope, field, &mut resolution)?,
                "__typename" => json!("Query"),
                other => {
                    return Err(EngineError::UnsupportedQuery(format!(
                        "unknown root field `{other}`"
                    )));
                }
            };
            data.insert(response_key(field).to_string(), value);
        }

        let body = serde_json::to_vec(&json!({ "data": data }))
            .map_err(|err| EngineError::failed(err.to_string()))?;
        resolution.body = body.into();
        debug!(touched = resolution.touched.len(), "Resolved catalog query");
        Ok(resolution)
    }
}

fn product_page<'a>(
    scope: &QueryScope<'a>,
    field: &'a Field,
    items: &[ProductRecord],
    total: usize,
) -> Result<Value, EngineError> {
    let mut object = Map::new();
    for child in scope.fields(&field.selection_set.node)? {
        let value = match child.name.node.as_str() {
            "items" => {
                let selection = scope.fields(&child.selection_set.node)?;
                Value::Array(
                    items
                        .iter()
                        .map(|product| project_product(product, &selection))
                        .collect(),
                )
            }
            "total_count" => json!(total),
            "__typename" => json!("Products"),
            _ => Value::Null,
        };
        object.insert(response_key(child).to_string(), value);
    }
    Ok(Value::Object(object))
}

fn project_product(product: &ProductRecord, selection: &[&Field]) -> Value {
    let mut object = Map::new();
    for field in selection {
        let value = match field.name.node.as_str() {
            "id" => json!(product.id),
            "sku" => json!(product.sku),
            "name" => json!(product.name),
            "url_key" => json!(product.url_key),
            "price" => json!(product.price),
            "__typename" => json!("SimpleProduct"),
            _ => Value::Null,
        };
        object.insert(response_key(field).to_string(), value);
    }
    Value::Object(object)
}

fn category_field(category: &CategoryRecord, name: &str) -> Value {
    match name {
        "id" => json!(category.id),
        "name" => json!(category.name),
        "description" => json!(category.description),
        "__typename" => json!("CategoryTree"),
        _ => Value::Null,
    }
}

fn string_value(value: &Value, name: &str) -> Result<String, EngineError> {
    match value {
        Value::String(text) => Ok(text.clone()),
        Value::Number(number) => Ok(number.to_string()),
        other => Err(EngineError::InvalidVariables(format!(
            "`{name}` must be a string, got {other}"
        ))),
    }
}

fn u64_value(value: &Value, name: &str) -> Result<u64, EngineError> {
    let parsed = match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        EngineError::InvalidVariables(format!(
            "`{name}` must be a non-negative integer, got {value}"
        ))
    })
}

fn optional_u64(
    scope: &QueryScope<'_>,
    field: &Field,
    name: &str,
) -> Result<Option<u64>, EngineError> {
    match scope.argument(field, name)? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => u64_value(&value, name).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::application::engine::Touched;
    use crate::catalog::demo_catalog;

    const CATEGORY_QUERY: &str = "query GetCategoryQuery($id: Int!, $pageSize: Int!, $currentPage: Int!) {
        category(id: $id) {
            id
            description
            name
            product_count
            products(pageSize: $pageSize, currentPage: $currentPage) {
                items { id name url_key }
                total_count
            }
        }
    }";

    fn engine() -> CatalogEngine {
        CatalogEngine::new(Arc::new(demo_catalog(CatalogRepository::new())))
    }

    fn body(resolution: &Resolution) -> Value {
        serde_json::from_slice(&resolution.body).expect("json body")
    }

    #[tokio::test]
    async fn product_lookup_touches_the_product() {
        let request = GraphQlRequest::new(
            r#"{ products(filter: {sku: {eq: "simple2"}}) { items { id name sku } } }"#,
        );
        let resolution = engine().resolve(&request).await.expect("resolved");

        assert_eq!(
            resolution.touched,
            vec![Touched::Entity(EntityRef::product(6))]
        );
        assert_eq!(
            body(&resolution),
            json!({"data": {"products": {"items": [
                {"id": 6, "name": "Simple Product Two", "sku": "simple2"}
            ]}}})
        );
    }

    #[tokio::test]
    async fn unknown_sku_depends_on_the_family() {
        let request = GraphQlRequest::new(
            r#"{ products(filter: {sku: {eq: "missing"}}) { items { id } total_count } }"#,
        );
        let resolution = engine().resolve(&request).await.expect("resolved");

        assert_eq!(
            resolution.touched,
            vec![Touched::Family(EntityFamily::Product)]
        );
        assert_eq!(
            body(&resolution),
            json!({"data": {"products": {"items": [], "total_count": 0}}})
        );
    }

    #[tokio::test]
    async fn category_page_touches_category_then_products() {
        let request = GraphQlRequest::new(CATEGORY_QUERY)
            .with_variables(json!({"id": 10, "pageSize": 10, "currentPage": 1}));
        let resolution = engine().resolve(&request).await.expect("resolved");

        assert_eq!(
            resolution.touched,
            vec![
                Touched::Entity(EntityRef::category(10)),
                Touched::Entity(EntityRef::product(101)),
                Touched::Entity(EntityRef::product(102)),
            ]
        );
        let body = body(&resolution);
        assert_eq!(body["data"]["category"]["product_count"], json!(2));
        assert_eq!(body["data"]["category"]["products"]["total_count"], json!(2));
        assert_eq!(
            body["data"]["category"]["products"]["items"][1]["url_key"],
            json!("simple-5")
        );
    }

    #[tokio::test]
    async fn pagination_limits_touched_products() {
        let request = GraphQlRequest::new(CATEGORY_QUERY)
            .with_variables(json!({"id": 10, "pageSize": 1, "currentPage": 2}));
        let resolution = engine().resolve(&request).await.expect("resolved");

        assert_eq!(
            resolution.touched,
            vec![
                Touched::Entity(EntityRef::category(10)),
                Touched::Entity(EntityRef::product(102)),
            ]
        );
    }

    #[tokio::test]
    async fn missing_variable_is_rejected() {
        let request = GraphQlRequest::new(CATEGORY_QUERY).with_variables(json!({"id": 10}));
        let err = engine().resolve(&request).await.expect_err("missing pageSize");
        assert!(matches!(err, EngineError::InvalidVariables(_)));
    }

    #[tokio::test]
    async fn unknown_roots_are_unsupported() {
        let err = engine()
            .resolve(&GraphQlRequest::new("{ customer { email } }"))
            .await
            .expect_err("unsupported");
        assert!(matches!(err, EngineError::UnsupportedQuery(_)));

        let err = engine()
            .resolve(&GraphQlRequest::new("mutation { noop }"))
            .await
            .expect_err("unsupported");
        assert!(matches!(err, EngineError::UnsupportedQuery(_)));
    }

    #[tokio::test]
    async fn fragments_and_operation_name_are_honoured() {
        let request = GraphQlRequest::new(
            r#"query Other { category(id: 10) { id } }
            query Lookup($sku: String!) {
                products(filter: {sku: {eq: $sku}}) { items { ...Card } }
            }
            fragment Card on SimpleProduct { id sku }"#,
        )
        .with_variables(json!({"sku": "simple2"}))
        .with_operation_name("Lookup");
        let resolution = engine().resolve(&request).await.expect("resolved");

        assert_eq!(
            body(&resolution),
            json!({"data": {"products": {"items": [{"id": 6, "sku": "simple2"}]}}})
        );
        assert_eq!(
            resolution.touched,
            vec![Touched::Entity(EntityRef::product(6))]
        );
    }

    #[tokio::test]
    async fn sku_literals_are_matched_exactly() {
        let request = GraphQlRequest::new(
            r#"{ products(filter: {sku: {eq: "simple 2"}}) { items { id } } }"#,
        );
        let resolution = engine().resolve(&request).await.expect("resolved");
        assert_eq!(
            resolution.touched,
            vec![Touched::Family(EntityFamily::Product)]
        );
    }

    #[tokio::test]
    async fn unknown_category_is_null() {
        let resolution = engine()
            .resolve(&GraphQlRequest::new("{ category(id: 404) { id } }"))
            .await
            .expect("resolved");
        assert_eq!(body(&resolution), json!({"data": {"category": null}}));
        assert_eq!(
            resolution.touched,
            vec![Touched::Family(EntityFamily::Category)]
        );
    }
}
