//! Cache key definitions.
//!
//! A `CacheKey` is a SHA-256 digest over everything that changes what the
//! content engine would answer: the canonical form of the parsed document,
//! the variables in sorted order, the operation name, and the request scope.
//!
//! The canonical form is printed from the syntax tree, so insignificant
//! whitespace, commas and comments never split a key while string literals
//! keep their exact contents.

use std::fmt::{self, Write as _};

use async_graphql_parser::Positioned;
use async_graphql_parser::types::{
    Directive, DocumentOperations, ExecutableDocument, OperationDefinition, OperationType,
    Selection, SelectionSet,
};
use async_graphql_value::{Name, Value as GraphQlValue};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::application::engine::{GraphQlRequest, select_operation};

/// Header carrying the store view code of a request.
pub const STORE_HEADER: &str = "Store";
/// Header carrying the display currency of a request.
pub const CURRENCY_HEADER: &str = "Content-Currency";

const DEFAULT_STORE: &str = "default";

/// Identity of a cacheable request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request context that partitions the cache besides the query itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestScope {
    pub store: String,
    pub currency: Option<String>,
}

impl Default for RequestScope {
    fn default() -> Self {
        Self {
            store: DEFAULT_STORE.to_string(),
            currency: None,
        }
    }
}

impl RequestScope {
    pub fn new(store: Option<&str>, currency: Option<&str>) -> Self {
        let store = store
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_STORE)
            .to_string();
        let currency = currency
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_ascii_uppercase);
        Self { store, currency }
    }
}

/// What a request's document looks like once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryShape {
    operation: Option<OperationType>,
    canonical: Option<String>,
}

impl QueryShape {
    pub fn of(request: &GraphQlRequest) -> Self {
        match request.parse() {
            Ok(document) => Self {
                operation: select_operation(&document, request.operation_name.as_deref())
                    .map(|operation| operation.ty),
                canonical: Some(CanonicalDocument(&document).to_string()),
            },
            Err(_) => Self {
                operation: None,
                canonical: None,
            },
        }
    }

    pub fn operation(&self) -> Option<OperationType> {
        self.operation
    }

    /// Only a selectable query operation may be stored. Mutations,
    /// subscriptions and documents that do not parse always bypass.
    pub fn is_cacheable(&self) -> bool {
        self.operation == Some(OperationType::Query)
    }
}

/// Builds cache keys from inbound requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheKeyBuilder;

impl CacheKeyBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build(&self, request: &GraphQlRequest, scope: &RequestScope) -> CacheKey {
        self.build_for(&QueryShape::of(request), request, scope)
    }

    pub fn build_for(
        &self,
        shape: &QueryShape,
        request: &GraphQlRequest,
        scope: &RequestScope,
    ) -> CacheKey {
        let mut hasher = Sha256::new();

        match shape.canonical.as_deref() {
            Some(canonical) => {
                hasher.update([b'd']);
                hasher.update(canonical.as_bytes());
            }
            None => {
                hasher.update([b'r']);
                hasher.update(request.query.as_bytes());
            }
        }
        hasher.update([0u8]);

        // serde_json maps iterate in key order, so this is order-independent.
        let variables = Value::Object(request.variables.clone()).to_string();
        hasher.update(variables.as_bytes());
        hasher.update([0u8]);

        if let Some(name) = request.operation_name.as_deref() {
            hasher.update(name.as_bytes());
        }
        hasher.update([0u8]);

        hasher.update(scope.store.as_bytes());
        hasher.update([0u8]);
        if let Some(currency) = scope.currency.as_deref() {
            hasher.update(currency.as_bytes());
        }

        CacheKey(hex::encode(hasher.finalize().as_slice()))
    }
}

/// Single-line rendering of a document with operations and fragments in
/// name order and the shorthand `{ ... }` spelled as `query`.
struct CanonicalDocument<'a>(&'a ExecutableDocument);

impl fmt::Display for CanonicalDocument<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.operations {
            DocumentOperations::Single(operation) => write_operation(f, None, &operation.node)?,
            DocumentOperations::Multiple(operations) => {
                let mut named: Vec<_> = operations.iter().collect();
                named.sort_by(|(a, _), (b, _)| a.as_str().cmp(b.as_str()));
                for (name, operation) in named {
                    write_operation(f, Some(name), &operation.node)?;
                }
            }
        }

        let mut fragments: Vec<_> = self.0.fragments.iter().collect();
        fragments.sort_by(|(a, _), (b, _)| a.as_str().cmp(b.as_str()));
        for (name, fragment) in fragments {
            let fragment = &fragment.node;
            write!(f, " fragment {name} on {}", fragment.type_condition.node.on.node)?;
            write_directives(f, &fragment.directives)?;
            write_selection_set(f, &fragment.selection_set.node)?;
        }
        Ok(())
    }
}

fn write_operation(
    f: &mut fmt::Formatter<'_>,
    name: Option<&Name>,
    operation: &OperationDefinition,
) -> fmt::Result {
    f.write_str(match operation.ty {
        OperationType::Query => "query",
        OperationType::Mutation => "mutation",
        OperationType::Subscription => "subscription",
    })?;
    if let Some(name) = name {
        write!(f, " {name}")?;
    }
    if !operation.variable_definitions.is_empty() {
        f.write_char('(')?;
        for (index, definition) in operation.variable_definitions.iter().enumerate() {
            let definition = &definition.node;
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "${}: {}", definition.name.node, definition.var_type.node)?;
            if let Some(default) = &definition.default_value {
                write!(f, " = {}", default.node)?;
            }
            write_directives(f, &definition.directives)?;
        }
        f.write_char(')')?;
    }
    write_directives(f, &operation.directives)?;
    write_selection_set(f, &operation.selection_set.node)
}

fn write_selection_set(f: &mut fmt::Formatter<'_>, set: &SelectionSet) -> fmt::Result {
    if set.items.is_empty() {
        return Ok(());
    }
    f.write_str(" {")?;
    for selection in &set.items {
        f.write_char(' ')?;
        match &selection.node {
            Selection::Field(field) => {
                let field = &field.node;
                if let Some(alias) = &field.alias {
                    write!(f, "{}: ", alias.node)?;
                }
                f.write_str(field.name.node.as_str())?;
                write_arguments(f, &field.arguments)?;
                write_directives(f, &field.directives)?;
                write_selection_set(f, &field.selection_set.node)?;
            }
            Selection::FragmentSpread(spread) => {
                write!(f, "...{}", spread.node.fragment_name.node)?;
                write_directives(f, &spread.node.directives)?;
            }
            Selection::InlineFragment(fragment) => {
                let fragment = &fragment.node;
                f.write_str("...")?;
                if let Some(condition) = &fragment.type_condition {
                    write!(f, " on {}", condition.node.on.node)?;
                }
                write_directives(f, &fragment.directives)?;
                write_selection_set(f, &fragment.selection_set.node)?;
            }
        }
    }
    f.write_str(" }")
}

fn write_arguments(
    f: &mut fmt::Formatter<'_>,
    arguments: &[(Positioned<Name>, Positioned<GraphQlValue>)],
) -> fmt::Result {
    if arguments.is_empty() {
        return Ok(());
    }
    f.write_char('(')?;
    for (index, (name, value)) in arguments.iter().enumerate() {
        if index > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}: {}", name.node, value.node)?;
    }
    f.write_char(')')
}

fn write_directives(f: &mut fmt::Formatter<'_>, directives: &[Positioned<Directive>]) -> fmt::Result {
    for directive in directives {
        write!(f, " @{}", directive.node.name.node)?;
        write_arguments(f, &directive.node.arguments)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn request(query: &str, variables: Value) -> GraphQlRequest {
        GraphQlRequest {
            query: query.to_string(),
            variables: variables.as_object().cloned().unwrap_or_default(),
            operation_name: None,
        }
    }

    fn key(query: &str) -> CacheKey {
        CacheKeyBuilder::new().build(&request(query, json!({})), &RequestScope::default())
    }

    #[test]
    fn formatting_differences_share_a_key() {
        let compact = key("{ products { items { id } } }");
        assert_eq!(compact, key("{\n  products {\n items { id }\n  }\n}"));
        assert_eq!(compact, key("query { products { items { id, } } }"));
        assert_eq!(compact, key("# storefront\n{ products { items { id } } } # trailing"));
    }

    #[test]
    fn string_literals_keep_their_whitespace() {
        let single = key(r#"{ products(filter: {sku: {eq: "x y"}}) { items { id } } }"#);
        let double = key(r#"{ products(filter: {sku: {eq: "x  y"}}) { items { id } } }"#);
        let padded = key(r#"{ products(filter: {sku: {eq: " x y"}}) { items { id } } }"#);
        assert_ne!(single, double);
        assert_ne!(single, padded);
    }

    #[test]
    fn aliases_and_arguments_are_part_of_the_key() {
        assert_ne!(key("{ a: category(id: 1) { id } }"), key("{ b: category(id: 1) { id } }"));
        assert_ne!(key("{ category(id: 1) { id } }"), key("{ category(id: 2) { id } }"));
        assert_ne!(key("{ category(id: 1) { id } }"), key(r#"{ category(id: "1") { id } }"#));
    }

    #[test]
    fn unparseable_queries_hash_their_raw_text() {
        assert_ne!(key("{ products "), key("{  products "));
        assert_ne!(key("{ products "), key("{ products }"));
    }

    #[test]
    fn variable_order_does_not_matter() {
        let builder = CacheKeyBuilder::new();
        let scope = RequestScope::default();
        let a = builder.build(
            &request("query Q($id: Int!) { category(id: $id) { id } }", json!({"id": 10, "pageSize": 10})),
            &scope,
        );
        let b = builder.build(
            &request("query Q($id: Int!) { category(id: $id) { id } }", json!({"pageSize": 10, "id": 10})),
            &scope,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn different_variables_produce_different_keys() {
        let builder = CacheKeyBuilder::new();
        let scope = RequestScope::default();
        let query = "query Q($id: Int!) { category(id: $id) { id } }";
        let a = builder.build(&request(query, json!({"id": 10})), &scope);
        let b = builder.build(&request(query, json!({"id": 11})), &scope);
        assert_ne!(a, b);
    }

    #[test]
    fn scope_partitions_keys() {
        let builder = CacheKeyBuilder::new();
        let req = request("{ products { items { id } } }", json!({}));
        let default = builder.build(&req, &RequestScope::default());
        let french = builder.build(&req, &RequestScope::new(Some("fr"), None));
        let euro = builder.build(&req, &RequestScope::new(None, Some("eur")));
        assert_ne!(default, french);
        assert_ne!(default, euro);
    }

    #[test]
    fn operation_name_is_part_of_the_key() {
        let builder = CacheKeyBuilder::new();
        let scope = RequestScope::default();
        let mut named = request("query A { x } query B { y }", json!({}));
        let unnamed = builder.build(&named, &scope);
        named.operation_name = Some("B".to_string());
        assert_ne!(unnamed, builder.build(&named, &scope));
    }

    #[test]
    fn blank_scope_headers_fall_back_to_defaults() {
        let scope = RequestScope::new(Some("  "), Some(""));
        assert_eq!(scope, RequestScope::default());
    }

    #[test]
    fn only_query_operations_are_cacheable() {
        let shape = |query: &str| QueryShape::of(&GraphQlRequest::new(query));

        assert!(shape("{ products { items { id } } }").is_cacheable());
        assert!(shape("query mutationLog { id }").is_cacheable());
        assert!(!shape("mutation { setPrice }").is_cacheable());
        assert!(!shape("mutation{x}").is_cacheable());
        assert!(!shape("# audit\nmutation SetPrice($p: Float) { setPrice(p: $p) }").is_cacheable());
        assert!(!shape("subscription { priceChanged { id } }").is_cacheable());
        assert!(!shape("mutationsLog { id }").is_cacheable());
        assert_eq!(shape("mutation { x }").operation(), Some(OperationType::Mutation));
    }

    #[test]
    fn operation_name_selects_what_bypasses() {
        let document = "query Read { a } mutation Write { b }";
        let read = GraphQlRequest::new(document).with_operation_name("Read");
        let write = GraphQlRequest::new(document).with_operation_name("Write");

        assert!(QueryShape::of(&read).is_cacheable());
        assert!(!QueryShape::of(&write).is_cacheable());
        assert!(!QueryShape::of(&GraphQlRequest::new(document)).is_cacheable());
    }

    #[test]
    fn key_is_hex_sha256() {
        let key = key("{ a }");
        assert_eq!(key.as_str().len(), 64);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
