use crate::domain::entities::{CategoryRecord, ProductRecord};

use super::CatalogRepository;

/// Populate `repository` with the storefront demo data.
///
/// Category 10 holds `simple-4` (101) and `simple-5` (102); `simple2` is not
/// assigned to any category.
pub fn demo_catalog(repository: CatalogRepository) -> CatalogRepository {
    repository.insert_category(CategoryRecord {
        id: 10,
        name: "Category 1.1".to_string(),
        description: "Category 1.1 description.".to_string(),
    });
    repository.insert_category(CategoryRecord {
        id: 11,
        name: "Category 1.1.1".to_string(),
        description: "Category 1.1.1 description.".to_string(),
    });

    let products = [
        (6, "simple2", "Simple Product Two", 10.0, vec![]),
        (101, "simple-4", "Simple Product Four", 10.0, vec![10]),
        (102, "simple-5", "Simple Product Five", 10.0, vec![10]),
    ];
    for (id, sku, name, price, category_ids) in products {
        repository.insert_product(ProductRecord {
            id,
            sku: sku.to_string(),
            name: name.to_string(),
            url_key: sku.to_string(),
            price,
            category_ids,
        });
    }
    repository
}
