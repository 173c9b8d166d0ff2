use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    application::engine::EngineError, cache::CacheError, catalog::CatalogError,
    config::LoadError, domain::error::DomainError, infra::error::InfraError,
};

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: &'static str,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        let report = ErrorReport::from_message(source, status, detail);
        Self {
            status,
            public_message,
            report,
        }
    }

    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        error: &dyn StdError,
    ) -> Self {
        let report = ErrorReport::from_error(source, status, error);
        Self {
            status,
            public_message,
            report,
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.public_message).into_response();
        self.report.attach(&mut response);
        response
    }
}

impl HttpError {
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<EngineError> for HttpError {
    fn from(error: EngineError) -> Self {
        const SOURCE: &str = "application::error::engine_error_to_http_error";
        match error {
            EngineError::UnsupportedQuery(_) => HttpError::from_error(
                SOURCE,
                StatusCode::BAD_REQUEST,
                "Unsupported query",
                &error,
            ),
            EngineError::InvalidVariables(_) => HttpError::from_error(
                SOURCE,
                StatusCode::BAD_REQUEST,
                "Invalid variables",
                &error,
            ),
            EngineError::Failed(_) => HttpError::from_error(
                SOURCE,
                StatusCode::BAD_GATEWAY,
                "Upstream failure",
                &error,
            ),
        }
    }
}

impl From<CatalogError> for HttpError {
    fn from(error: CatalogError) -> Self {
        const SOURCE: &str = "application::error::catalog_error_to_http_error";
        let (status, message) = match &error {
            CatalogError::Domain(DomainError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, "Resource not found")
            }
            CatalogError::Domain(DomainError::Conflict { .. }) => {
                (StatusCode::CONFLICT, "Duplicate record")
            }
            CatalogError::Domain(DomainError::Validation { .. }) => {
                (StatusCode::BAD_REQUEST, "Invalid input")
            }
            CatalogError::Invalidation(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Saved, but cached responses could not be invalidated",
            ),
        };
        HttpError::from_error(SOURCE, status, message, &error)
    }
}

impl From<CacheError> for HttpError {
    fn from(error: CacheError) -> Self {
        HttpError::from_error(
            "application::error::cache_error_to_http_error",
            StatusCode::SERVICE_UNAVAILABLE,
            "Cache unavailable",
            &error,
        )
    }
}

/// Process-level failure reported by `main` before exiting.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
}
