//! HTTP-level job flows: prompt admission, worker generation, renderer
//! reports, and what status and content SSE subscribers observe.
//!
//! Workers run with a `ScriptedProvider`; a `Notify` gate holds generation
//! until a subscriber is connected so every later transition is observed.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use pretty_assertions::assert_eq;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use manimate_core::generation::ScriptedProvider;
use manimate_core::{GenerationError, GenerationMode, JobId, JobStatus};
use manimate_jobs::{
    spawn_workers, JobQueue, JobStore, MemoryJobStore, MemoryQueue, NotifyingWatcher,
    QueueConfig, WorkerConfig,
};
use manimate_server::{cors_layer, create_app, AppState};

struct TestServer {
    app: Router,
    store: Arc<MemoryJobStore>,
    queue: Arc<MemoryQueue>,
    provider: Arc<ScriptedProvider>,
    shutdown: CancellationToken,
}

impl TestServer {
    fn start(provider: ScriptedProvider) -> Self {
        let store = Arc::new(MemoryJobStore::new());
        let queue = Arc::new(MemoryQueue::new(store.clone(), QueueConfig::default()));
        let watcher = Arc::new(NotifyingWatcher::new(store.clone()));
        let provider = Arc::new(provider);
        let shutdown = CancellationToken::new();

        spawn_workers(
            2,
            queue.clone(),
            store.clone(),
            provider.clone(),
            WorkerConfig::default(),
            shutdown.clone(),
        );

        let state = AppState::new(
            store.clone(),
            queue.clone(),
            watcher,
            GenerationMode::Streaming,
            shutdown.clone(),
        );
        let app = create_app(state, cors_layer(None).unwrap());
        Self {
            app,
            store,
            queue,
            provider,
            shutdown,
        }
    }

    async fn call(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    async fn get(&self, uri: &str) -> (StatusCode, String) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        read(self.call(request).await).await
    }

    async fn post(&self, uri: &str, json: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap();
        read(self.call(request).await).await
    }

    async fn submit(&self, json: &str) -> JobId {
        let (status, body) = self.post("/api/v1/prompt/send", json).await;
        assert_eq!(status, StatusCode::ACCEPTED, "{body}");
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        JobId::from(json["jobId"].as_str().unwrap())
    }

    /// Open an SSE endpoint. The subscription exists once this returns;
    /// the body is read to the end in the background.
    async fn subscribe(&self, uri: &str) -> JoinHandle<Vec<SseEvent>> {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = self.call(request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );
        tokio::spawn(async move {
            let (_, body) = read(response).await;
            parse_sse(&body)
        })
    }

    async fn wait_for(&self, id: &JobId, status: JobStatus) {
        let mut rx = self.store.watch_status(id).await.unwrap();
        tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|log| log.iter().any(|u| u.status == status)),
        )
        .await
        .expect("status reached in time")
        .unwrap();
    }

    async fn report(&self, id: &JobId, json: &str) -> StatusCode {
        self.post(&format!("/api/v1/jobs/{id}/render"), json).await.0
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.queue.close();
    }
}

async fn read(response: Response<Body>) -> (StatusCode, String) {
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[derive(Debug, Clone, PartialEq)]
struct SseEvent {
    name: Option<String>,
    data: String,
}

/// Minimal SSE parser: blank-line separated events, comment lines skipped,
/// multiple `data` lines joined with `\n`.
fn parse_sse(body: &str) -> Vec<SseEvent> {
    body.split("\n\n")
        .filter_map(|block| {
            let mut name = None;
            let mut data: Vec<&str> = Vec::new();
            for line in block.lines() {
                if let Some(value) = line.strip_prefix("event:") {
                    name = Some(value.strip_prefix(' ').unwrap_or(value).to_string());
                } else if let Some(value) = line.strip_prefix("data:") {
                    data.push(value.strip_prefix(' ').unwrap_or(value));
                }
            }
            (!data.is_empty()).then(|| SseEvent {
                name,
                data: data.join("\n"),
            })
        })
        .collect()
}

fn named<'a>(events: &'a [SseEvent], name: &str) -> Vec<&'a SseEvent> {
    events
        .iter()
        .filter(|e| e.name.as_deref() == Some(name))
        .collect()
}

#[tokio::test]
async fn red_circle_reaches_completed_with_single_done() {
    let gate = Arc::new(Notify::new());
    let server = TestServer::start(
        ScriptedProvider::chunks(["from manim import *\n", "class RedCircle(Scene): ..."])
            .with_gate(gate.clone()),
    );

    let id = server.submit(r#"{"prompt":"a red circle"}"#).await;
    // The worker marks the job processing, then blocks on the gate.
    server.wait_for(&id, JobStatus::Processing).await;
    let status_events = server.subscribe(&format!("/api/v1/status/job/{id}")).await;
    gate.notify_one();

    server.wait_for(&id, JobStatus::ReadyForRender).await;
    let (_, body) = server.get("/api/v1/jobs?status=ready_for_render").await;
    assert!(body.contains(id.as_str()), "render hand-off lists the job");

    assert_eq!(server.report(&id, r#"{"status":"rendering"}"#).await, StatusCode::OK);
    assert_eq!(server.report(&id, r#"{"status":"uploading"}"#).await, StatusCode::OK);
    assert_eq!(
        server
            .report(&id, r#"{"status":"completed","videoUrl":"https://cdn/v/red.mp4"}"#)
            .await,
        StatusCode::OK
    );

    let events = status_events.await.unwrap();
    let statuses: Vec<String> = named(&events, "status")
        .iter()
        .map(|e| {
            let json: serde_json::Value = serde_json::from_str(&e.data).unwrap();
            json["status"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(
        statuses,
        vec![
            "processing",
            "ready_for_render",
            "rendering",
            "uploading",
            "completed"
        ]
    );

    let done = named(&events, "done");
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].data, r#"{"video_url":"https://cdn/v/red.mp4"}"#);
    assert_eq!(events.last().unwrap().name.as_deref(), Some("done"));
    assert!(named(&events, "error").is_empty());

    let (_, body) = server.get(&format!("/api/v1/jobs/{id}")).await;
    let job: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(job["status"], "completed");
    assert_eq!(job["progress"], 100);
    assert_eq!(job["videoUrl"], "https://cdn/v/red.mp4");
    assert_eq!(job["subscribers"]["status"], 0);
}

#[tokio::test]
async fn generation_error_yields_one_error_and_no_done() {
    let server = TestServer::start(ScriptedProvider::failing(GenerationError::Api {
        status: 429,
        body: "quota exceeded".into(),
    }));

    let id = server.submit(r#"{"prompt":"a red circle","mode":"bulk"}"#).await;
    let events = server
        .subscribe(&format!("/api/v1/status/job/{id}"))
        .await
        .await
        .unwrap();

    let errors = named(&events, "error");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].data.contains("429"), "{}", errors[0].data);
    assert!(named(&events, "done").is_empty());
    assert_eq!(events.last().unwrap().name.as_deref(), Some("error"));

    let status = server
        .report(&id, r#"{"status":"completed","videoUrl":"https://cdn/v/late.mp4"}"#)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn content_stream_relays_chunks_in_order() {
    let gate = Arc::new(Notify::new());
    let server = TestServer::start(
        ScriptedProvider::chunks(["from m", "anim import *", "\n..."]).with_gate(gate.clone()),
    );

    let id = server.submit(r#"{"prompt":"a red circle","mode":"streaming"}"#).await;
    let content = server.subscribe(&format!("/api/v1/stream/job/{id}")).await;
    gate.notify_one();

    server.wait_for(&id, JobStatus::ReadyForRender).await;
    server
        .report(&id, r#"{"status":"completed","videoUrl":"https://cdn/v/x.mp4"}"#)
        .await;

    let chunks: Vec<String> = content
        .await
        .unwrap()
        .into_iter()
        .map(|e| {
            assert_eq!(e.name, None, "content events are unlabeled");
            e.data
        })
        .collect();
    assert_eq!(chunks, vec!["from m", "anim import *", "\n..."]);
}

#[tokio::test]
async fn bulk_result_is_stored_without_fences() {
    let server = TestServer::start(ScriptedProvider::chunks([
        "```python\n",
        "from manim import *\n",
        "```",
    ]));

    let id = server.submit(r#"{"prompt":"a square","mode":"bulk"}"#).await;
    server.wait_for(&id, JobStatus::ReadyForRender).await;

    let (status, body) = server.get(&format!("/api/v1/jobs/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    let job: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(job["content"], "from manim import *");
    assert_eq!(job["mode"], "bulk");
    assert_eq!(server.provider.calls(), 1);
}

#[tokio::test]
async fn disconnect_releases_content_subscriber() {
    let gate = Arc::new(Notify::new());
    let server = TestServer::start(ScriptedProvider::chunks(["x"]).with_gate(gate));

    let id = server.submit(r#"{"prompt":"a red circle"}"#).await;
    let request = Request::builder()
        .uri(format!("/api/v1/stream/job/{id}"))
        .body(Body::empty())
        .unwrap();
    let response = server.call(request).await;

    let (_, body) = server.get(&format!("/api/v1/jobs/{id}")).await;
    let job: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(job["subscribers"]["content"], 1);

    drop(response);

    let (_, body) = server.get(&format!("/api/v1/jobs/{id}")).await;
    let job: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(job["subscribers"]["content"], 0);
}

#[tokio::test]
async fn shutdown_closes_open_streams_and_admission() {
    let gate = Arc::new(Notify::new());
    let server = TestServer::start(ScriptedProvider::chunks(["x"]).with_gate(gate));

    let id = server.submit(r#"{"prompt":"a red circle"}"#).await;
    let status_events = server.subscribe(&format!("/api/v1/status/job/{id}")).await;

    server.shutdown.cancel();
    server.queue.close();

    let events = tokio::time::timeout(Duration::from_secs(5), status_events)
        .await
        .expect("stream ends on shutdown")
        .unwrap();
    assert!(named(&events, "done").is_empty());

    let (status, _) = server.post("/api/v1/prompt/send", r#"{"prompt":"late"}"#).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn unknown_job_endpoints_return_404() {
    let server = TestServer::start(ScriptedProvider::chunks(["x"]));
    for uri in [
        "/api/v1/jobs/ghost",
        "/api/v1/status/job/ghost",
        "/api/v1/stream/job/ghost",
    ] {
        let (status, body) = server.get(uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["error"], "Job not found");
    }
}
