// crates/core/src/generation/config.rs
//! Generation provider configuration types.

use std::str::FromStr;

use crate::error::GenerationError;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash-latest";
pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Configuration for a generation provider instance.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
    /// Command line for `ProviderKind::Command`; the prompt is appended as
    /// the last argument.
    pub command: Option<String>,
    pub timeout_secs: u64,
}

/// Supported generation backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Gemini,
    Command,
    Scripted,
}

impl FromStr for ProviderKind {
    type Err = GenerationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gemini" => Ok(ProviderKind::Gemini),
            "command" => Ok(ProviderKind::Command),
            "scripted" => Ok(ProviderKind::Scripted),
            other => Err(GenerationError::NotAvailable(format!(
                "unknown provider '{other}' (expected gemini, command or scripted)"
            ))),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Gemini,
            model: DEFAULT_GEMINI_MODEL.into(),
            api_key: None,
            endpoint: None,
            command: None,
            timeout_secs: 120,
        }
    }
}
