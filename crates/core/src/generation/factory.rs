// crates/core/src/generation/factory.rs
//! Provider factory: creates a GenerationProvider from configuration.

use std::sync::Arc;

use super::command::CommandProvider;
use super::config::{GenerationConfig, ProviderKind};
use super::gemini::GeminiProvider;
use super::provider::GenerationProvider;
use super::scripted::ScriptedProvider;
use crate::error::GenerationError;

/// Create a generation provider based on the given configuration.
///
/// Gemini needs an API key and Command needs a command line; both fail
/// fast with `NotAvailable` so misconfiguration surfaces at startup.
pub fn create_provider(
    config: &GenerationConfig,
) -> Result<Arc<dyn GenerationProvider>, GenerationError> {
    match config.provider {
        ProviderKind::Gemini => {
            let api_key = config
                .api_key
                .as_deref()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| GenerationError::NotAvailable("GEMINI_API_KEY is not set".into()))?;
            let mut provider = GeminiProvider::new(api_key, &config.model)?
                .with_timeout(config.timeout_secs);
            if let Some(endpoint) = &config.endpoint {
                provider = provider.with_endpoint(endpoint);
            }
            Ok(Arc::new(provider))
        }
        ProviderKind::Command => {
            let command = config.command.as_deref().unwrap_or_default();
            Ok(Arc::new(
                CommandProvider::parse(command)?.with_timeout(config.timeout_secs),
            ))
        }
        ProviderKind::Scripted => Ok(Arc::new(ScriptedProvider::demo())),
    }
}
