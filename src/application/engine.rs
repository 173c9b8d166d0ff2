//! Content engine interface consumed by the cache gateway.

use async_graphql_parser::parse_query;
use async_graphql_parser::types::{DocumentOperations, ExecutableDocument, OperationDefinition};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::entities::{EntityFamily, EntityRef};

/// An inbound GraphQL request.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQlRequest {
    pub query: String,
    #[serde(default, deserialize_with = "deserialize_variables")]
    pub variables: Map<String, Value>,
    #[serde(default)]
    pub operation_name: Option<String>,
}

impl GraphQlRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_variables(mut self, variables: Value) -> Self {
        if let Value::Object(map) = variables {
            self.variables = map;
        }
        self
    }

    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    pub fn parse(&self) -> Result<ExecutableDocument, async_graphql_parser::Error> {
        parse_query(&self.query)
    }
}

/// The operation a request executes: the one named by `operation_name`, or
/// the only operation in the document.
pub fn select_operation<'a>(
    document: &'a ExecutableDocument,
    operation_name: Option<&str>,
) -> Option<&'a OperationDefinition> {
    match &document.operations {
        DocumentOperations::Single(operation) => Some(&operation.node),
        DocumentOperations::Multiple(operations) => match operation_name {
            Some(wanted) => operations
                .iter()
                .find(|(name, _)| name.as_str() == wanted)
                .map(|(_, operation)| &operation.node),
            None if operations.len() == 1 => {
                operations.values().next().map(|operation| &operation.node)
            }
            None => None,
        },
    }
}

fn deserialize_variables<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map),
        Some(other) => Err(serde::de::Error::custom(format!(
            "variables must be an object, got {other}"
        ))),
    }
}

/// Something the engine read while producing a response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Touched {
    /// A concrete entity instance.
    Entity(EntityRef),
    /// A listing over a family, independent of which instances matched.
    Family(EntityFamily),
}

/// A resolved response plus everything it depended on, in resolution order.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub body: Bytes,
    pub touched: Vec<Touched>,
}

impl Resolution {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            touched: Vec::new(),
        }
    }

    pub fn touch(&mut self, entity: EntityRef) -> &mut Self {
        self.touched.push(Touched::Entity(entity));
        self
    }

    pub fn touch_family(&mut self, family: EntityFamily) -> &mut Self {
        self.touched.push(Touched::Family(family));
        self
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unsupported query: {0}")]
    UnsupportedQuery(String),
    #[error("invalid variables: {0}")]
    InvalidVariables(String),
    #[error("content engine failed: {0}")]
    Failed(String),
}

impl EngineError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Resolves a request into a body and the entities it touched.
#[async_trait]
pub trait ContentEngine: Send + Sync {
    async fn resolve(&self, request: &GraphQlRequest) -> Result<Resolution, EngineError>;
}
