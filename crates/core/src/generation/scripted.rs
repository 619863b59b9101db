// crates/core/src/generation/scripted.rs
//! Scripted provider: replays a fixed chunk sequence or a fixed error.
//!
//! Used for offline development (`GENERATION_PROVIDER=scripted`) and as a
//! deterministic collaborator in tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::provider::{ChunkStream, GenerationProvider};
use crate::error::GenerationError;

pub struct ScriptedProvider {
    outcome: Result<Vec<String>, GenerationError>,
    chunk_delay: Option<Duration>,
    gate: Option<Arc<Notify>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    /// Succeed with `chunks`, in order.
    pub fn chunks<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            outcome: Ok(chunks.into_iter().map(Into::into).collect()),
            chunk_delay: None,
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail every call with `error`.
    pub fn failing(error: GenerationError) -> Self {
        Self {
            outcome: Err(error),
            chunk_delay: None,
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// A small, valid Manim scene delivered in a few chunks.
    pub fn demo() -> Self {
        Self::chunks([
            "from manim import *\n\n",
            "class RedBox(Scene):\n",
            "    def construct(self):\n",
            "        box = Square(color=RED, fill_opacity=1)\n",
            "        self.play(Create(box))\n",
            "        self.wait(1)\n",
        ])
        .with_chunk_delay(Duration::from_millis(50))
    }

    /// Sleep before each chunk.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Hold output until `gate` is notified.
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Number of generation calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn begin(&self) -> Result<Vec<String>, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.outcome.clone()
    }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
        let chunks = self.begin().await?;
        if let Some(delay) = self.chunk_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(chunks.concat())
    }

    async fn generate_streaming(&self, _prompt: &str) -> Result<ChunkStream, GenerationError> {
        let chunks = self.begin().await?;
        let delay = self.chunk_delay;
        Ok(Box::pin(async_stream::stream! {
            for chunk in chunks {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(chunk);
            }
        }))
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted"
    }
}
