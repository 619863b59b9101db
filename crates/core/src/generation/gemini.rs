// crates/core/src/generation/gemini.rs
//! Gemini provider: Google Generative Language REST API.
//!
//! Bulk calls hit `models/{model}:generateContent`; streaming calls hit
//! `models/{model}:streamGenerateContent?alt=sse` and relay the text of
//! every SSE `data:` frame as one chunk.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::time::{timeout, Duration};

use super::config::DEFAULT_GEMINI_ENDPOINT;
use super::prompt::{FEW_SHOT_PROMPT, FEW_SHOT_RESPONSE, MANIM_SYSTEM_INSTRUCTION};
use super::provider::{log_excerpt, ChunkStream, GenerationProvider};
use crate::error::GenerationError;

pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
    timeout_secs: u64,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| GenerationError::NotAvailable(format!("http client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            endpoint: DEFAULT_GEMINI_ENDPOINT.to_string(),
            timeout_secs: 120,
        })
    }

    /// Override the API base URL (tests, proxies).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    fn url(&self, method: &str) -> String {
        format!("{}/models/{}:{}", self.endpoint, self.model, method)
    }

    async fn post(&self, url: String, prompt: &str) -> Result<reqwest::Response, GenerationError> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&GenerateRequest::manim(prompt))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Timeout(self.timeout_secs)
                } else {
                    GenerationError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), body = %log_excerpt(&body), "gemini: request rejected");
            return Err(GenerationError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl GenerationProvider for GeminiProvider {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let t0 = std::time::Instant::now();
        tracing::info!(model = %self.model, "gemini: generateContent");

        let request = async {
            let response = self.post(self.url("generateContent"), prompt).await?;
            response
                .json::<GenerateResponse>()
                .await
                .map_err(|e| GenerationError::ParseFailed(e.to_string()))
        };
        let parsed = timeout(Duration::from_secs(self.timeout_secs), request)
            .await
            .map_err(|_| GenerationError::Timeout(self.timeout_secs))??;

        let text = parsed.text();
        tracing::info!(
            elapsed_ms = t0.elapsed().as_millis() as u64,
            text_len = text.len(),
            "gemini: response received"
        );
        if text.trim().is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(text)
    }

    async fn generate_streaming(&self, prompt: &str) -> Result<ChunkStream, GenerationError> {
        tracing::info!(model = %self.model, "gemini: streamGenerateContent");

        let gap = Duration::from_secs(self.timeout_secs);
        let timeout_secs = self.timeout_secs;
        let url = format!("{}?alt=sse", self.url("streamGenerateContent"));
        let response = timeout(gap, self.post(url, prompt))
            .await
            .map_err(|_| GenerationError::Timeout(timeout_secs))??;

        let mut bytes = response.bytes_stream();
        Ok(Box::pin(async_stream::stream! {
            let mut buffer: Vec<u8> = Vec::new();
            loop {
                let piece = match timeout(gap, bytes.next()).await {
                    Err(_) => {
                        yield Err(GenerationError::Timeout(timeout_secs));
                        return;
                    }
                    Ok(None) => break,
                    Ok(Some(Err(e))) => {
                        yield Err(GenerationError::Request(e.to_string()));
                        return;
                    }
                    Ok(Some(Ok(piece))) => piece,
                };
                buffer.extend_from_slice(&piece);

                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    match parse_sse_line(&String::from_utf8_lossy(&line)) {
                        Ok(Some(text)) => {
                            yield Ok(text);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }
            match parse_sse_line(&String::from_utf8_lossy(&buffer)) {
                Ok(Some(text)) => {
                    yield Ok(text);
                }
                Ok(None) => {}
                Err(e) => {
                    yield Err(e);
                }
            }
        }))
    }

    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Extract the text of one SSE line. Non-data lines and frames without
/// text yield `None`.
fn parse_sse_line(line: &str) -> Result<Option<String>, GenerationError> {
    let Some(data) = line.trim_end().strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(None);
    }
    let frame: GenerateResponse =
        serde_json::from_str(data).map_err(|e| GenerationError::ParseFailed(e.to_string()))?;
    let text = frame.text();
    Ok((!text.is_empty()).then_some(text))
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

impl<'a> GenerateRequest<'a> {
    fn manim(prompt: &'a str) -> Self {
        Self {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: MANIM_SYSTEM_INSTRUCTION,
                }],
            },
            contents: vec![
                turn("user", FEW_SHOT_PROMPT),
                turn("model", FEW_SHOT_RESPONSE),
                turn("user", prompt),
            ],
        }
    }
}

fn turn<'a>(role: &'a str, text: &'a str) -> Content<'a> {
    Content {
        role: Some(role),
        parts: vec![Part { text }],
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateResponse {
    /// Concatenated text of the first candidate.
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.iter().filter_map(|p| p.text.as_deref()).collect())
            .unwrap_or_default()
    }
}
