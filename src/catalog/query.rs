//! Selection walking over a parsed operation.
//!
//! Fragment spreads and inline fragments are flattened into their parent
//! selection, `@skip` and `@include` are honoured, and argument values are
//! resolved against the request variables with declared defaults filled in.

use std::collections::HashMap;

use async_graphql_parser::Positioned;
use async_graphql_parser::types::{
    Directive, ExecutableDocument, Field, FragmentDefinition, OperationDefinition, Selection,
    SelectionSet,
};
use async_graphql_value::{ConstValue, Name, Value as GraphQlValue};
use serde_json::{Map, Value};

use crate::application::engine::EngineError;

const MAX_FRAGMENT_DEPTH: usize = 16;

/// Fragments and variables of the operation being executed.
pub struct QueryScope<'a> {
    fragments: &'a HashMap<Name, Positioned<FragmentDefinition>>,
    variables: Map<String, Value>,
}

impl<'a> QueryScope<'a> {
    pub fn new(
        document: &'a ExecutableDocument,
        operation: &OperationDefinition,
        provided: &Map<String, Value>,
    ) -> Result<Self, EngineError> {
        let mut variables = provided.clone();
        for definition in &operation.variable_definitions {
            let definition = &definition.node;
            let name = definition.name.node.as_str();
            if variables.contains_key(name) {
                continue;
            }
            let fallback = match &definition.default_value {
                Some(default) => default
                    .node
                    .clone()
                    .into_json()
                    .map_err(|err| EngineError::InvalidVariables(err.to_string()))?,
                None if definition.var_type.node.nullable => Value::Null,
                None => continue,
            };
            variables.insert(name.to_string(), fallback);
        }

        Ok(Self {
            fragments: &document.fragments,
            variables,
        })
    }

    /// Fields selected by `set`, fragments inlined, in document order.
    pub fn fields(&self, set: &'a SelectionSet) -> Result<Vec<&'a Field>, EngineError> {
        let mut fields = Vec::new();
        self.collect(set, 0, &mut fields)?;
        Ok(fields)
    }

    fn collect(
        &self,
        set: &'a SelectionSet,
        depth: usize,
        fields: &mut Vec<&'a Field>,
    ) -> Result<(), EngineError> {
        if depth > MAX_FRAGMENT_DEPTH {
            return Err(EngineError::UnsupportedQuery(
                "fragments nest too deeply".to_string(),
            ));
        }

        for selection in &set.items {
            match &selection.node {
                Selection::Field(field) => {
                    if self.included(&field.node.directives)? {
                        fields.push(&field.node);
                    }
                }
                Selection::FragmentSpread(spread) => {
                    let spread = &spread.node;
                    if !self.included(&spread.directives)? {
                        continue;
                    }
                    let name = &spread.fragment_name.node;
                    let fragment = self.fragments.get(name).ok_or_else(|| {
                        EngineError::UnsupportedQuery(format!("unknown fragment `{name}`"))
                    })?;
                    self.collect(&fragment.node.selection_set.node, depth + 1, fields)?;
                }
                Selection::InlineFragment(fragment) => {
                    let fragment = &fragment.node;
                    if self.included(&fragment.directives)? {
                        self.collect(&fragment.selection_set.node, depth + 1, fields)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Argument `name` of `field`, variables substituted.
    pub fn argument(&self, field: &Field, name: &str) -> Result<Option<Value>, EngineError> {
        field
            .get_argument(name)
            .map(|value| self.resolve(&value.node))
            .transpose()
    }

    fn included(&self, directives: &[Positioned<Directive>]) -> Result<bool, EngineError> {
        for directive in directives {
            let directive = &directive.node;
            let name = directive.name.node.as_str();
            let keep_when = match name {
                "skip" => false,
                "include" => true,
                _ => continue,
            };
            let condition = directive.get_argument("if").ok_or_else(|| {
                EngineError::UnsupportedQuery(format!("@{name} requires an `if` argument"))
            })?;
            match self.resolve(&condition.node)? {
                Value::Bool(flag) if flag != keep_when => return Ok(false),
                Value::Bool(_) => {}
                other => {
                    return Err(EngineError::InvalidVariables(format!(
                        "@{name}(if:) must be a boolean, got {other}"
                    )));
                }
            }
        }
        Ok(true)
    }

    fn resolve(&self, value: &GraphQlValue) -> Result<Value, EngineError> {
        let constant = value.clone().into_const_with(|variable: Name| {
            let provided = self.variables.get(variable.as_str()).ok_or_else(|| {
                EngineError::InvalidVariables(format!("variable `${variable}` was not provided"))
            })?;
            ConstValue::from_json(provided.clone())
                .map_err(|err| EngineError::InvalidVariables(err.to_string()))
        })?;
        constant
            .into_json()
            .map_err(|err| EngineError::InvalidVariables(err.to_string()))
    }
}

/// Key the field's value is reported under.
pub fn response_key(field: &Field) -> &str {
    field.response_key().node.as_str()
}
