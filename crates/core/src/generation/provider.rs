// crates/core/src/generation/provider.rs
//! GenerationProvider trait defining the interface for code generation backends.

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};

use crate::error::GenerationError;
use crate::types::GenerationMode;

/// Sequence of content chunks in production order.
pub type ChunkStream = BoxStream<'static, Result<String, GenerationError>>;

/// Trait for backends that turn a prompt into Manim code.
///
/// Implementations include:
/// - `GeminiProvider`: Google Generative Language REST API
/// - `CommandProvider`: spawns a local command
/// - `ScriptedProvider`: fixed output for offline runs and tests
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Produce the complete content in one call.
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;

    /// Produce content incrementally. Backends without native streaming
    /// yield the bulk result as a single chunk.
    async fn generate_streaming(&self, prompt: &str) -> Result<ChunkStream, GenerationError> {
        let content = self.generate(prompt).await?;
        Ok(single_chunk(content))
    }

    /// Provider name for logging/display (e.g. "gemini", "command").
    fn name(&self) -> &str;

    /// Model identifier.
    fn model(&self) -> &str;
}

/// Drive `provider` in `mode`, presenting both modes as one chunk stream.
pub async fn produce(
    provider: &dyn GenerationProvider,
    mode: GenerationMode,
    prompt: &str,
) -> Result<ChunkStream, GenerationError> {
    match mode {
        GenerationMode::Bulk => Ok(single_chunk(provider.generate(prompt).await?)),
        GenerationMode::Streaming => provider.generate_streaming(prompt).await,
    }
}

fn single_chunk(content: String) -> ChunkStream {
    Box::pin(stream::once(async move { Ok(content) }))
}

/// Characters of provider output kept in a log line.
const LOG_EXCERPT_CHARS: usize = 500;

/// Leading part of `text` for logging, cut on a character boundary.
pub(crate) fn log_excerpt(text: &str) -> &str {
    text.char_indices()
        .nth(LOG_EXCERPT_CHARS)
        .map_or(text, |(end, _)| &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    struct Echo;

    #[async_trait]
    impl GenerationProvider for Echo {
        async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
            Ok(format!("echo: {prompt}"))
        }

        fn name(&self) -> &str {
            "echo"
        }

        fn model(&self) -> &str {
            "none"
        }
    }

    #[tokio::test]
    async fn test_default_streaming_yields_one_chunk() {
        let chunks: Vec<_> = Echo.generate_streaming("hi").await.unwrap().collect().await;
        assert_eq!(chunks, vec![Ok("echo: hi".to_string())]);
    }

    #[tokio::test]
    async fn test_bulk_mode_is_single_chunk() {
        let chunks: Vec<_> = produce(&Echo, GenerationMode::Bulk, "x")
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_log_excerpt_cuts_on_char_boundary() {
        let text = format!("{}é tail", "a".repeat(499));
        let excerpt = log_excerpt(&text);
        assert_eq!(excerpt.chars().count(), 500);
        assert!(excerpt.ends_with('é'));

        assert_eq!(log_excerpt("short"), "short");
        assert_eq!(log_excerpt(&"ü".repeat(600)).chars().count(), 500);
    }
}
