//! Request/response shapes and the provider invocation boundary
//!
//! The router decides *which* provider to call; talking to it is delegated to
//! a [`ProviderInvoker`]. Vendor wire protocols live behind that trait.

mod budget;
mod client;
mod request;
mod response;

pub use budget::invoke_within;
pub use client::OpenAiCompatInvoker;
pub use request::{Action, ChatOptions, ChatRequest, DispatchRequest, Message, Role, VisionRequest};
pub use response::{ChatResponse, DispatchResponse, FallbackFlag, TokenUsage, VisionResponse};

use crate::routing::ProviderConfig;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InvokeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Rate limited: retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Not implemented for provider '{0}'")]
    NotImplemented(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Performs the actual upstream call for a selected provider
#[async_trait]
pub trait ProviderInvoker: Send + Sync {
    async fn chat(
        &self,
        provider: &ProviderConfig,
        request: &ChatRequest,
    ) -> Result<ChatResponse, InvokeError>;

    /// Object detection on an image. Invokers without a vision protocol
    /// report `NotImplemented`.
    async fn recognize(
        &self,
        provider: &ProviderConfig,
        _request: &VisionRequest,
    ) -> Result<VisionResponse, InvokeError> {
        Err(InvokeError::NotImplemented(provider.id.clone()))
    }

    /// Invoker name for logging
    fn name(&self) -> &str;
}
