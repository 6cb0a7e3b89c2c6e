//! Language-model backend implementations for Legion.
//!
//! All backends implement the `legion_core::Provider` trait.

pub mod openai_compat;
pub mod retry;

pub use openai_compat::OpenAiCompatProvider;
pub use retry::{RetryPolicy, RetryProvider};

use legion_config::AppConfig;
use legion_core::{Provider, ProviderError};
use std::sync::Arc;

/// Build the configured backend, wrapped in the configured retry policy.
pub fn from_config(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let inner = OpenAiCompatProvider::from_config(&config.provider)?;
    let policy = RetryPolicy::from(&config.retry);
    Ok(Arc::new(RetryProvider::new(Arc::new(inner), policy)))
}
