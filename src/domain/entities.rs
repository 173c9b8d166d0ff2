//! Catalog entity identities and records.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Entity families that can contribute cache tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityFamily {
    Product,
    Category,
}

impl EntityFamily {
    /// Prefix used for both the umbrella tag and entity-scoped tags.
    pub const fn tag_prefix(self) -> &'static str {
        match self {
            EntityFamily::Product => "cat_p",
            EntityFamily::Category => "cat_c",
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            EntityFamily::Product => "product",
            EntityFamily::Category => "category",
        }
    }
}

impl fmt::Display for EntityFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single entity instance touched while resolving a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub family: EntityFamily,
    pub id: String,
}

impl EntityRef {
    pub fn new(family: EntityFamily, id: impl ToString) -> Self {
        Self {
            family,
            id: id.to_string(),
        }
    }

    pub fn product(id: impl ToString) -> Self {
        Self::new(EntityFamily::Product, id)
    }

    pub fn category(id: impl ToString) -> Self {
        Self::new(EntityFamily::Category, id)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.family, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: u64,
    pub sku: String,
    pub name: String,
    pub url_key: String,
    pub price: f64,
    pub category_ids: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRecord {
    pub id: u64,
    pub name: String,
    pub description: String,
}
