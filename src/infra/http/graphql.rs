use axum::{
    extract::{Query, State},
    http::{
        HeaderMap, HeaderName, HeaderValue, StatusCode,
        header::{CONTENT_TYPE, VARY},
    },
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::application::engine::GraphQlRequest;
use crate::application::error::HttpError;
use crate::cache::{CURRENCY_HEADER, GatewayResponse, RequestScope, STORE_HEADER};

use super::HttpState;

const SOURCE: &str = "infra::http::graphql";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GraphQlParams {
    query: String,
    #[serde(default)]
    variables: Option<String>,
    #[serde(default)]
    operation_name: Option<String>,
}

impl GraphQlParams {
    fn into_request(self) -> Result<GraphQlRequest, HttpError> {
        let mut request = GraphQlRequest::new(self.query);
        if let Some(raw) = self.variables.filter(|raw| !raw.trim().is_empty()) {
            match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Null) => {}
                Ok(value @ Value::Object(_)) => request = request.with_variables(value),
                Ok(_) => {
                    return Err(HttpError::new(
                        SOURCE,
                        StatusCode::BAD_REQUEST,
                        "Invalid variables",
                        "variables must be a JSON object",
                    ));
                }
                Err(err) => {
                    return Err(HttpError::from_error(
                        SOURCE,
                        StatusCode::BAD_REQUEST,
                        "Invalid variables",
                        &err,
                    ));
                }
            }
        }
        if let Some(name) = self.operation_name.filter(|name| !name.is_empty()) {
            request = request.with_operation_name(name);
        }
        Ok(request)
    }
}

pub(super) async fn graphql_get(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Query(params): Query<GraphQlParams>,
) -> Response {
    match params.into_request() {
        Ok(request) => execute(&state, &headers, request).await,
        Err(err) => err.into_response(),
    }
}

pub(super) async fn graphql_post(
    State(state): State<HttpState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match serde_json::from_slice::<GraphQlRequest>(&body) {
        Ok(request) => execute(&state, &headers, request).await,
        Err(err) => HttpError::from_error(
            SOURCE,
            StatusCode::BAD_REQUEST,
            "Invalid GraphQL request",
            &err,
        )
        .into_response(),
    }
}

async fn execute(state: &HttpState, headers: &HeaderMap, request: GraphQlRequest) -> Response {
    let scope = scope_from_headers(headers);
    match state.gateway.handle(&request, &scope).await {
        Ok(outcome) => graphql_response(outcome),
        Err(err) => HttpError::from(err).into_response(),
    }
}

fn scope_from_headers(headers: &HeaderMap) -> RequestScope {
    RequestScope::new(
        header_str(headers, STORE_HEADER),
        header_str(headers, CURRENCY_HEADER),
    )
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn graphql_response(outcome: GatewayResponse) -> Response {
    let debug_headers = outcome.debug_headers();
    let mut response = (
        StatusCode::OK,
        [
            (CONTENT_TYPE, "application/json"),
            (VARY, "Store, Content-Currency"),
        ],
        outcome.body,
    )
        .into_response();

    for (name, value) in debug_headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().insert(name, value);
            }
            _ => warn!(header = name, "Skipping debug header with invalid value"),
        }
    }
    response
}
