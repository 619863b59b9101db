// crates/core/src/generation/mod.rs
//! Code generation collaborators.
//!
//! Provides the `GenerationProvider` trait and its implementations for
//! calling the Gemini API, spawning a local command, or replaying a fixed
//! script. Both generation modes are consumed as one `ChunkStream`.

pub mod command;
pub mod config;
pub mod factory;
pub mod gemini;
pub mod prompt;
pub mod provider;
pub mod scripted;

pub use command::CommandProvider;
pub use config::{GenerationConfig, ProviderKind, DEFAULT_GEMINI_ENDPOINT, DEFAULT_GEMINI_MODEL};
pub use factory::create_provider;
pub use gemini::GeminiProvider;
pub use prompt::strip_code_fences;
pub use provider::{produce, ChunkStream, GenerationProvider};
pub use scripted::ScriptedProvider;
