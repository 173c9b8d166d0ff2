//! Persistence-side interfaces.

use async_trait::async_trait;
use thiserror::Error;

use crate::cache::InvalidationEvent;

#[derive(Debug, Error)]
#[error("after-save hook `{hook}` failed: {message}")]
pub struct HookError {
    pub hook: &'static str,
    pub message: String,
}

impl HookError {
    pub fn new(hook: &'static str, message: impl Into<String>) -> Self {
        Self {
            hook,
            message: message.into(),
        }
    }
}

/// Invoked once per committed entity write, before the write is acknowledged.
#[async_trait]
pub trait SaveHook: Send + Sync {
    async fn after_save(&self, event: &InvalidationEvent) -> Result<(), HookError>;
}
